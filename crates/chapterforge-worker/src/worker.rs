//! Worker base harness (spec §4.2/§5), grounded on
//! `examples/original_source/src/workers/base.py::BaseWorker`: semaphore-
//! bounded concurrency, before/after checkpointing, and retry-with-backoff
//! for transient failures, re-expressed as event-bus subscriptions instead
//! of the original's `handle_event` callback registration.

use std::sync::Arc;

use async_trait::async_trait;
use chapterforge_core::{CancellationToken, EngineError, Event, EventBus, EventPayload, EventType};
use chapterforge_reliability::RetryPolicy;
use chapterforge_storage::StateStore;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

/// Shared collaborators every worker's `process` call can reach.
#[derive(Clone)]
pub struct WorkerContext {
    pub bus: EventBus,
    pub state_store: Arc<dyn StateStore>,
    pub cancellation: CancellationToken,
}

/// One pipeline stage (spec §4.3-§4.6). `process` returns the events to
/// publish rather than publishing directly, keeping the worker itself free
/// of bus plumbing and easy to unit test.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn worker_id(&self) -> &str;
    fn subscriptions(&self) -> Vec<EventType>;
    async fn process(
        &self,
        event: &Event,
        ctx: &WorkerContext,
    ) -> Result<Vec<EventPayload>, EngineError>;
}

/// Registers `worker` on `ctx.bus` for each of its subscriptions, wrapping
/// every invocation in the semaphore/checkpoint/retry harness. Returns the
/// subscription ids so the caller can unsubscribe during shutdown.
pub async fn spawn_worker<W: Worker>(
    worker: Arc<W>,
    ctx: WorkerContext,
    max_concurrent: usize,
    retry_policy: RetryPolicy,
) -> Vec<chapterforge_core::SubscriptionId> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut subs = Vec::new();

    for event_type in worker.subscriptions() {
        let worker = Arc::clone(&worker);
        let ctx = ctx.clone();
        let semaphore = Arc::clone(&semaphore);
        let retry_policy = retry_policy.clone();

        let bus_for_publish = ctx.bus.clone();
        let sub = ctx
            .bus
            .clone()
            .subscribe(
                event_type,
                Arc::new(move |event: Event| {
                    let worker = Arc::clone(&worker);
                    let ctx = ctx.clone();
                    let semaphore = Arc::clone(&semaphore);
                    let retry_policy = retry_policy.clone();
                    let bus = bus_for_publish.clone();
                    Box::pin(async move {
                        let _permit = semaphore.acquire().await;
                        handle_one(worker.as_ref(), &event, &ctx, &bus, &retry_policy).await;
                    })
                }),
            )
            .await;
        subs.push(sub);
    }

    subs
}

async fn handle_one<W: Worker + ?Sized>(
    worker: &W,
    event: &Event,
    ctx: &WorkerContext,
    bus: &EventBus,
    retry_policy: &RetryPolicy,
) {
    if ctx.cancellation.is_cancelled() {
        return;
    }

    save_checkpoint(ctx, worker.worker_id(), event, "started").await;

    match worker.process(event, ctx).await {
        Ok(emitted) => {
            save_checkpoint(ctx, worker.worker_id(), event, "completed").await;
            for payload in emitted {
                let next = Event::new(event.workflow_id, event.trace_id, payload);
                if let Err(err) = bus.publish(next).await {
                    warn!(worker = worker.worker_id(), error = %err, "failed to publish worker output");
                }
            }
        }
        Err(err) => {
            save_checkpoint(ctx, worker.worker_id(), event, "failed").await;
            error!(worker = worker.worker_id(), event = %event.event_type(), error = %err, "worker failed to process event");

            if err.is_retryable() && retry_policy.has_attempts_remaining(event.retry_count + 1) {
                let delay = retry_policy.delay_for_attempt(event.retry_count + 2);
                debug!(worker = worker.worker_id(), delay_ms = delay.as_millis(), "retrying event");
                tokio::time::sleep(delay).await;
                let retried = event.retried();
                if let Err(publish_err) = bus.publish(retried).await {
                    warn!(worker = worker.worker_id(), error = %publish_err, "failed to republish retried event");
                }
            } else {
                let reason = if err.is_retryable() {
                    format!("{worker_id} exhausted retries: {err}", worker_id = worker.worker_id())
                } else {
                    format!("{worker_id} hit a non-retryable error: {err}", worker_id = worker.worker_id())
                };
                let failure = Event::new(
                    event.workflow_id,
                    event.trace_id,
                    EventPayload::WorkflowFailed {
                        reason,
                        error: err,
                        original_event_type: Some(event.event_type()),
                    },
                );
                if let Err(publish_err) = bus.publish(failure).await {
                    warn!(worker = worker.worker_id(), error = %publish_err, "failed to publish workflow-failed event");
                }
            }
        }
    }
}

async fn save_checkpoint(ctx: &WorkerContext, worker_id: &str, event: &Event, status: &str) {
    let phase = format!("{worker_id}_{status}");
    let data = json!({
        "worker_id": worker_id,
        "event_type": event.event_type().wire_name(),
        "status": status,
    });
    if let Err(err) = ctx.state_store.save_checkpoint(event.workflow_id, &phase, data).await {
        warn!(worker = worker_id, error = %err, "failed to save checkpoint");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chapterforge_core::EventPayload;
    use chapterforge_storage::InMemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct EchoWorker {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl Worker for EchoWorker {
        fn worker_id(&self) -> &str {
            "echo"
        }

        fn subscriptions(&self) -> Vec<EventType> {
            vec![EventType::TaskStarted]
        }

        async fn process(
            &self,
            event: &Event,
            _ctx: &WorkerContext,
        ) -> Result<Vec<EventPayload>, EngineError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && attempt == 0 && event.retry_count == 0 {
                return Err(EngineError::transient("first attempt always fails"));
            }
            Ok(vec![EventPayload::TaskCompleted {
                task_id: "echoed".into(),
                result: None,
            }])
        }
    }

    async fn context() -> WorkerContext {
        let bus = EventBus::default();
        bus.start().await;
        WorkerContext {
            bus,
            state_store: Arc::new(InMemoryStateStore::new()),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn successful_processing_emits_output_and_checkpoints() {
        let ctx = context().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(EchoWorker {
            calls: calls.clone(),
            fail_first: false,
        });

        let completed = Arc::new(AtomicUsize::new(0));
        let completed_clone = completed.clone();
        ctx.bus
            .subscribe(
                EventType::TaskCompleted,
                Arc::new(move |_event| {
                    let completed = completed_clone.clone();
                    Box::pin(async move {
                        completed.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let wf = Uuid::now_v7();
        spawn_worker(worker, ctx.clone(), 4, RetryPolicy::no_retry()).await;
        ctx.bus
            .publish(Event::new(
                wf,
                Uuid::now_v7(),
                EventPayload::TaskStarted { task_id: "t".into() },
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        let checkpoint = ctx.state_store.latest_checkpoint(wf).await.unwrap().unwrap();
        assert_eq!(checkpoint.phase, "echo_completed");
    }

    #[tokio::test]
    async fn transient_failure_is_retried_and_eventually_succeeds() {
        let ctx = context().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(EchoWorker {
            calls: calls.clone(),
            fail_first: true,
        });

        let completed = Arc::new(AtomicUsize::new(0));
        let completed_clone = completed.clone();
        ctx.bus
            .subscribe(
                EventType::TaskCompleted,
                Arc::new(move |_event| {
                    let completed = completed_clone.clone();
                    Box::pin(async move {
                        completed.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let wf = Uuid::now_v7();
        let policy = RetryPolicy::fixed(Duration::from_millis(1), 3);
        spawn_worker(worker, ctx.clone(), 4, policy).await;
        ctx.bus
            .publish(Event::new(
                wf,
                Uuid::now_v7(),
                EventPayload::TaskStarted { task_id: "t".into() },
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_publishes_workflow_failed() {
        struct AlwaysFails;

        #[async_trait]
        impl Worker for AlwaysFails {
            fn worker_id(&self) -> &str {
                "always_fails"
            }

            fn subscriptions(&self) -> Vec<EventType> {
                vec![EventType::TaskStarted]
            }

            async fn process(&self, _event: &Event, _ctx: &WorkerContext) -> Result<Vec<EventPayload>, EngineError> {
                Err(EngineError::validation("bad input"))
            }
        }

        let ctx = context().await;
        let failed = Arc::new(AtomicUsize::new(0));
        let failed_clone = failed.clone();
        ctx.bus
            .subscribe(
                EventType::WorkflowFailed,
                Arc::new(move |event| {
                    let failed = failed_clone.clone();
                    Box::pin(async move {
                        if let EventPayload::WorkflowFailed { original_event_type, .. } = event.payload {
                            assert_eq!(original_event_type, Some(EventType::TaskStarted));
                        }
                        failed.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let wf = Uuid::now_v7();
        spawn_worker(Arc::new(AlwaysFails), ctx.clone(), 4, RetryPolicy::no_retry()).await;
        ctx.bus
            .publish(Event::new(wf, Uuid::now_v7(), EventPayload::TaskStarted { task_id: "t".into() }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exhausted_publishes_workflow_failed() {
        let ctx = context().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(EchoWorker { calls: calls.clone(), fail_first: true });

        // fail_first only fails attempt 0 of retry_count 0; use no_retry so the
        // single retryable failure immediately exhausts its one attempt.
        let failed = Arc::new(AtomicUsize::new(0));
        let failed_clone = failed.clone();
        ctx.bus
            .subscribe(
                EventType::WorkflowFailed,
                Arc::new(move |_event| {
                    let failed = failed_clone.clone();
                    Box::pin(async move {
                        failed.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let wf = Uuid::now_v7();
        spawn_worker(worker, ctx.clone(), 4, RetryPolicy::no_retry()).await;
        ctx.bus
            .publish(Event::new(wf, Uuid::now_v7(), EventPayload::TaskStarted { task_id: "t".into() }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_context_skips_processing() {
        let ctx = context().await;
        ctx.cancellation.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(EchoWorker {
            calls: calls.clone(),
            fail_first: false,
        });

        spawn_worker(worker, ctx.clone(), 4, RetryPolicy::no_retry()).await;
        ctx.bus
            .publish(Event::new(
                Uuid::now_v7(),
                Uuid::now_v7(),
                EventPayload::TaskStarted { task_id: "t".into() },
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
