//! `WorkflowExecution` / `StepExecution` (spec §3, §6): the orchestrator's and
//! StateStore's view of one attempt at running a workflow. Distinct from
//! `WorkflowState` (crate::state), which is the Aggregator's accumulator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initialized,
    Running,
    Completed,
    Failed,
    Suspended,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub task_id: Option<String>,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub metadata: serde_json::Value,
}

impl StepExecution {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            task_id: None,
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            retry_count: 0,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Running;
        self.start_time = Some(now);
    }

    /// Transition to a terminal status, setting `end_time` (spec §3 invariant:
    /// "terminal statuses set end_time").
    pub fn finish(&mut self, status: StepStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.end_time = Some(now);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub context: HashMap<String, serde_json::Value>,
    pub mode: ExecutionMode,
    pub step_executions: HashMap<String, StepExecution>,
    pub metadata: serde_json::Value,
}

impl WorkflowExecution {
    pub fn new(workflow_id: Uuid, mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Initialized,
            start_time: None,
            end_time: None,
            context: HashMap::new(),
            mode,
            step_executions: HashMap::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.start_time = Some(now);
    }

    pub fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        debug_assert!(matches!(
            status,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Suspended
        ));
        self.status = status;
        self.end_time = Some(now);
    }

    pub fn step(&mut self, step_id: &str) -> &mut StepExecution {
        self.step_executions
            .entry(step_id.to_string())
            .or_insert_with(|| StepExecution::pending(step_id))
    }
}
