//! Engine-wide error kinds.
//!
//! This is the shared error enum referenced by spec §7: every other crate's
//! local error type (`BusError`, `StoreError`, `ClientError`, ...) eventually
//! gets folded into one of these variants at the worker boundary so the base
//! worker layer (chapterforge-worker) can apply one retry/fail policy uniformly.

use serde::{Deserialize, Serialize};

/// Abstract error kind from spec §7, used to decide retry vs. fail-fast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed event, missing required field, bad configuration. Non-retryable.
    Validation { message: String },

    /// Network error, timeout, rate-limited. Retryable up to `max_retries`.
    Transient { message: String },

    /// Typed HTTP error from a downstream service.
    RemoteService {
        status: u16,
        body: Option<String>,
        message: String,
    },

    /// A media converter failed; recovered locally by skipping that diagram.
    ConverterFailure { kind: String, message: String },

    /// Workflow did not reach completion before its deadline.
    AggregatorIncomplete { workflow_id: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn converter_failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConverterFailure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Map an HTTP status code to the correct abstract kind per spec §4.7/§7:
    /// 429 is transient (rate-limited), 4xx is validation, 5xx is transient.
    pub fn from_status(status: u16, body: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::Transient {
                message: format!("rate limited: {message}"),
            },
            400..=499 => Self::RemoteService {
                status,
                body,
                message,
            },
            500..=599 => Self::Transient {
                message: format!("server error {status}: {message}"),
            },
            _ => Self::RemoteService {
                status,
                body,
                message,
            },
        }
    }

    /// Whether the base worker layer should retry this error (spec §4.2/§7).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation { .. } => false,
            Self::Transient { .. } => true,
            Self::RemoteService { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::ConverterFailure { .. } => false,
            Self::AggregatorIncomplete { .. } => false,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message } => message,
            Self::Transient { message } => message,
            Self::RemoteService { message, .. } => message,
            Self::ConverterFailure { message, .. } => message,
            Self::AggregatorIncomplete { .. } => "workflow aggregation incomplete at deadline",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EngineError {}
