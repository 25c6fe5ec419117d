//! Sliding-window rate limiter (spec §4.4/§4.7), ported from
//! `examples/original_source/src/utils/rate_limiter.py::RateLimiter`.
//!
//! Two independent constraints are enforced on every `acquire`: no more than
//! `requests_per_minute` requests in the trailing 60-second window, and at
//! least `window / requests_per_minute` between any two consecutive requests.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

struct State {
    request_times: VecDeque<Instant>,
    last_request_at: Option<DateTime<Utc>>,
    hits: u64,
    waits: u64,
}

pub struct RateLimiter {
    requests_per_minute: u32,
    service_name: String,
    min_interval: Duration,
    state: Mutex<State>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub service_name: String,
    pub requests_per_minute: u32,
    pub current_requests_in_window: usize,
    pub remaining_requests: u32,
    pub total_acquired: u64,
    pub total_waited: u64,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, service_name: impl Into<String>) -> Self {
        let min_interval = if requests_per_minute > 0 {
            WINDOW / requests_per_minute
        } else {
            Duration::ZERO
        };

        Self {
            requests_per_minute,
            service_name: service_name.into(),
            min_interval,
            state: Mutex::new(State {
                request_times: VecDeque::new(),
                last_request_at: None,
                hits: 0,
                waits: 0,
            }),
        }
    }

    /// Block until the caller is clear to issue one request.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let mut now = Instant::now();

        let cutoff = now.checked_sub(WINDOW).unwrap_or(now);
        while state
            .request_times
            .front()
            .is_some_and(|t| *t <= cutoff)
        {
            state.request_times.pop_front();
        }

        if state.request_times.len() as u32 >= self.requests_per_minute
            && self.requests_per_minute > 0
        {
            let oldest = *state.request_times.front().expect("len checked above");
            let wait_until = oldest + WINDOW;
            if wait_until > now {
                let wait = wait_until - now;
                debug!(service = %self.service_name, wait_ms = wait.as_millis(), "rate limit window full");
                state.waits += 1;
                tokio::time::sleep(wait).await;
                now = Instant::now();
                let cutoff = now.checked_sub(WINDOW).unwrap_or(now);
                while state
                    .request_times
                    .front()
                    .is_some_and(|t| *t <= cutoff)
                {
                    state.request_times.pop_front();
                }
            }
        }

        if let Some(&last) = state.request_times.back() {
            if self.min_interval > Duration::ZERO {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < self.min_interval {
                    let wait = self.min_interval - elapsed;
                    debug!(service = %self.service_name, wait_ms = wait.as_millis(), "enforcing minimum interval");
                    state.waits += 1;
                    tokio::time::sleep(wait).await;
                    now = Instant::now();
                }
            }
        }

        state.request_times.push_back(now);
        state.last_request_at = Some(Utc::now());
        state.hits += 1;
    }

    /// No-op hook kept for symmetry with the original API and for callers
    /// that want to pair `acquire`/`release` around a request span.
    pub fn release(&self) {}

    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        let cutoff = now.checked_sub(WINDOW).unwrap_or(now);
        let in_window = state.request_times.iter().filter(|t| **t > cutoff).count();

        RateLimiterStats {
            service_name: self.service_name.clone(),
            requests_per_minute: self.requests_per_minute,
            current_requests_in_window: in_window,
            remaining_requests: self.requests_per_minute.saturating_sub(in_window as u32),
            total_acquired: state.hits,
            total_waited: state.waits,
            last_request_at: state.last_request_at,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.request_times.clear();
    }
}
