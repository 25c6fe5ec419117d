//! Worker pool (spec §4.2), loosely grounded on
//! `crates/durable/src/worker/pool.rs::WorkerPoolConfig` for its
//! per-worker concurrency/id shape, adapted from that crate's DB-polling
//! model to event-bus subscription: there is no poller or stale-task
//! reclamation here because the bus, not a shared queue, owns delivery.

use std::sync::Arc;

use chapterforge_core::SubscriptionId;
use chapterforge_reliability::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::worker::{spawn_worker, Worker, WorkerContext};

/// Per-worker-type tuning (spec §4.4 names 3 as the AI worker's default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub max_concurrent: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            retry_policy: RetryPolicy::exponential(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            ..Default::default()
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

struct Registered {
    worker_id: String,
    subscriptions: Vec<SubscriptionId>,
}

/// Registers a fixed set of workers on a shared `EventBus` and tracks their
/// subscriptions for orderly shutdown.
pub struct WorkerPool {
    ctx: WorkerContext,
    registered: Vec<Registered>,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            registered: Vec::new(),
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Subscribe `worker` to the bus under `config`. Safe to call multiple
    /// times with different worker types to build up the full pipeline.
    pub async fn register<W: Worker>(&mut self, worker: W, config: WorkerPoolConfig) {
        let worker_id = worker.worker_id().to_string();
        let worker = Arc::new(worker);
        let subscriptions = spawn_worker(worker, self.ctx.clone(), config.max_concurrent, config.retry_policy).await;
        info!(worker = worker_id, subscriptions = subscriptions.len(), "worker registered");
        self.registered.push(Registered { worker_id, subscriptions });
    }

    pub fn registered_workers(&self) -> Vec<&str> {
        self.registered.iter().map(|r| r.worker_id.as_str()).collect()
    }

    /// Unsubscribe every worker. Does not stop the underlying bus.
    pub async fn shutdown(self) {
        for registered in self.registered {
            for sub in registered.subscriptions {
                self.ctx.bus.unsubscribe(sub).await;
            }
            info!(worker = registered.worker_id, "worker unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chapterforge_core::{CancellationToken, EngineError, Event, EventBus, EventPayload, EventType};
    use chapterforge_storage::InMemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct CountingWorker(Arc<AtomicUsize>);

    #[async_trait]
    impl Worker for CountingWorker {
        fn worker_id(&self) -> &str {
            "counter"
        }

        fn subscriptions(&self) -> Vec<EventType> {
            vec![EventType::TaskStarted]
        }

        async fn process(&self, _event: &Event, _ctx: &WorkerContext) -> Result<Vec<EventPayload>, EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn registered_worker_receives_events_until_shutdown() {
        let bus = EventBus::default();
        bus.start().await;
        let ctx = WorkerContext {
            bus: bus.clone(),
            state_store: Arc::new(InMemoryStateStore::new()),
            cancellation: CancellationToken::new(),
        };

        let count = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(ctx.clone());
        pool.register(CountingWorker(count.clone()), WorkerPoolConfig::new(2)).await;
        assert_eq!(pool.registered_workers(), vec!["counter"]);

        let publish = |wf| {
            Event::new(wf, Uuid::now_v7(), EventPayload::TaskStarted { task_id: "t".into() })
        };
        bus.publish(publish(Uuid::now_v7())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        pool.shutdown().await;
        bus.publish(publish(Uuid::now_v7())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
