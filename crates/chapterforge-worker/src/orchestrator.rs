//! Orchestrator (spec §4.9), grounded on
//! `examples/original_source/src/workflow/orchestrator.py::WorkflowOrchestrator`'s
//! run/resume/cancel surface and its deadline watchdog, adapted to dispatch
//! over the event bus instead of the original's direct worker invocation.
//!
//! Resume does not replay from a specific checkpoint phase: because every
//! worker derives ids deterministically (`chapterforge_core::ids`), simply
//! re-publishing `WORKFLOW_STARTED` is a safe, idempotent way to pick a
//! workflow back up from whatever state the `Aggregator` has durably
//! accumulated, without needing to reconstruct the exact in-flight event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chapterforge_core::{
    CancellationToken, EngineError, Event, EventBus, EventPayload, EventType, ExecutionMode,
    ExecutionStatus, SourceDocument, WorkflowExecution,
};
use chapterforge_storage::{StateStore, StoreError};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

fn store_err(err: StoreError) -> EngineError {
    EngineError::transient(err.to_string())
}

pub struct Orchestrator {
    bus: EventBus,
    state_store: Arc<dyn StateStore>,
    total_timeout: Duration,
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl Orchestrator {
    pub fn new(bus: EventBus, state_store: Arc<dyn StateStore>) -> Self {
        Self {
            bus,
            state_store,
            total_timeout: DEFAULT_TOTAL_TIMEOUT,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    pub async fn cancellation_token(&self, execution_id: Uuid) -> Option<CancellationToken> {
        self.tokens.read().await.get(&execution_id).cloned()
    }

    /// Starts a new execution: derives `execution.id == workflow_id` so the
    /// bus's `workflow_id` and the state store's execution key are the same
    /// handle callers use everywhere (spec treats one run as one workflow).
    pub async fn run(&self, source: SourceDocument, mode: ExecutionMode) -> Result<Uuid, EngineError> {
        let workflow_id = Uuid::now_v7();
        let now = chrono::Utc::now();

        let mut execution = WorkflowExecution::new(workflow_id, mode);
        execution.id = workflow_id;
        execution.start(now);
        execution
            .context
            .insert("source_document".to_string(), serde_json::to_value(&source).unwrap_or_default());

        self.state_store.save_execution(&execution).await.map_err(store_err)?;

        let token = CancellationToken::new();
        self.tokens.write().await.insert(workflow_id, token.clone());

        if mode != ExecutionMode::DryRun {
            let event = Event::new(workflow_id, Uuid::now_v7(), EventPayload::Started { content: source });
            self.bus.publish(event).await.map_err(|e| EngineError::transient(e.to_string()))?;
        }

        self.spawn_watchdog(workflow_id);
        self.spawn_outcome_listener(workflow_id).await;
        info!(%workflow_id, ?mode, "workflow started");
        Ok(workflow_id)
    }

    /// Subscribes for this one workflow's terminal outcome so the persisted
    /// `WorkflowExecution.status` reflects the pipeline's actual result
    /// (spec §4.9), not just the watchdog's own timeout case.
    async fn spawn_outcome_listener(&self, workflow_id: Uuid) {
        let state_store = Arc::clone(&self.state_store);
        let bus = self.bus.clone();

        for event_type in [EventType::ReportGenerated, EventType::WorkflowFailed] {
            let state_store = Arc::clone(&state_store);
            bus.subscribe(
                event_type,
                Arc::new(move |event: Event| {
                    let state_store = Arc::clone(&state_store);
                    Box::pin(async move {
                        if event.workflow_id != workflow_id {
                            return;
                        }
                        let Ok(Some(mut execution)) = state_store.load_execution(workflow_id).await else {
                            return;
                        };
                        if execution.status.is_terminal() {
                            return;
                        }
                        let status = match event.payload {
                            EventPayload::ReportGenerated { .. } => ExecutionStatus::Completed,
                            EventPayload::WorkflowFailed { .. } => ExecutionStatus::Failed,
                            _ => return,
                        };
                        execution.finish(status, chrono::Utc::now());
                        let _ = state_store.save_execution(&execution).await;
                    })
                }),
            )
            .await;
        }
    }

    fn spawn_watchdog(&self, workflow_id: Uuid) {
        let state_store = Arc::clone(&self.state_store);
        let bus = self.bus.clone();
        let timeout = self.total_timeout;
        let token_for_watchdog = Arc::clone(&self.tokens);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let Ok(Some(mut execution)) = state_store.load_execution(workflow_id).await else {
                return;
            };
            if execution.status != ExecutionStatus::Running {
                return;
            }

            warn!(%workflow_id, "workflow exceeded total timeout, cancelling");
            if let Some(token) = token_for_watchdog.read().await.get(&workflow_id) {
                token.cancel();
            }

            execution.finish(ExecutionStatus::Failed, chrono::Utc::now());
            let _ = state_store.save_execution(&execution).await;

            let failure = Event::new(
                workflow_id,
                Uuid::now_v7(),
                EventPayload::WorkflowFailed {
                    reason: "deadline exceeded".to_string(),
                    error: EngineError::AggregatorIncomplete { workflow_id: workflow_id.to_string() },
                    original_event_type: None,
                },
            );
            let _ = bus.publish(failure).await;
        });
    }

    /// Re-publishes `WORKFLOW_STARTED` for an execution that was interrupted
    /// mid-run. Safe to call on a completed execution (it is a no-op there).
    pub async fn resume(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let mut execution = self
            .state_store
            .load_execution(execution_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| EngineError::validation(format!("no execution {execution_id}")))?;

        if matches!(execution.status, ExecutionStatus::Completed) {
            info!(%execution_id, "resume called on already-completed execution, no-op");
            return Ok(());
        }

        let source: SourceDocument = execution
            .context
            .get("source_document")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| EngineError::validation("execution has no stored source document to resume from"))?;

        execution.status = ExecutionStatus::Running;
        self.state_store.save_execution(&execution).await.map_err(store_err)?;

        let token = CancellationToken::new();
        self.tokens.write().await.insert(execution_id, token);

        let event = Event::new(execution_id, Uuid::now_v7(), EventPayload::Started { content: source });
        self.bus.publish(event).await.map_err(|e| EngineError::transient(e.to_string()))?;

        self.spawn_watchdog(execution_id);
        self.spawn_outcome_listener(execution_id).await;
        info!(%execution_id, "workflow resumed");
        Ok(())
    }

    /// Suspends a running execution: cancels its token (workers check this
    /// cooperatively before each event) and marks the persisted record.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), EngineError> {
        if let Some(token) = self.tokens.read().await.get(&execution_id) {
            token.cancel();
        }

        let mut execution = self
            .state_store
            .load_execution(execution_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| EngineError::validation(format!("no execution {execution_id}")))?;

        for step in execution.step_executions.values_mut() {
            if !step.status.is_terminal() {
                step.finish(chapterforge_core::StepStatus::Cancelled, chrono::Utc::now());
            }
        }
        execution.finish(ExecutionStatus::Suspended, chrono::Utc::now());
        self.state_store.save_execution(&execution).await.map_err(store_err)?;

        let event = Event::new(
            execution_id,
            Uuid::now_v7(),
            EventPayload::WorkflowSuspended { reason: "cancelled by operator".to_string() },
        );
        self.bus.publish(event).await.map_err(|e| EngineError::transient(e.to_string()))?;

        info!(%execution_id, "workflow cancelled");
        Ok(())
    }

    pub async fn status(&self, execution_id: Uuid) -> Result<Option<WorkflowExecution>, EngineError> {
        self.state_store.load_execution(execution_id).await.map_err(store_err)
    }
}
