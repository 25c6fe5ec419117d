//! The typed publish/subscribe event bus (spec §4.1).
//!
//! One tokio task drains the publish queue in submission order and fans each
//! event out to a per-`(type, handler)` channel; a second task per
//! subscription drains that channel and invokes the handler. This keeps the
//! ordering guarantee from spec §4.1/§5 ("events published in order from one
//! producer are delivered in order to each handler") without serializing
//! handlers against each other.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::{Event, EventType};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type HandlerFn = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus is shutting down or not started")]
    ShuttingDown,
}

/// Opaque handle returned by `subscribe`, required by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    event_type: EventType,
    id: u64,
}

struct Subscription {
    id: u64,
    tx: mpsc::Sender<Event>,
}

struct Inner {
    subs: RwLock<HashMap<EventType, Vec<Subscription>>>,
    next_id: AtomicU64,
    publish_tx: RwLock<Option<mpsc::Sender<Event>>>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    handler_bound: usize,
    queue_bound: usize,
    drain_timeout: Duration,
}

/// Typed publish/subscribe hub (spec §4.1).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024, 256, Duration::from_secs(10))
    }
}

impl EventBus {
    pub fn new(queue_bound: usize, handler_bound: usize, drain_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                subs: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                publish_tx: RwLock::new(None),
                dispatch_handle: Mutex::new(None),
                handler_bound,
                queue_bound,
                drain_timeout,
            }),
        }
    }

    /// Register a handler for `event_type`. Multiple handlers per type are allowed.
    pub async fn subscribe(&self, event_type: EventType, handler: HandlerFn) -> SubscriptionId {
        let (tx, mut rx) = mpsc::channel::<Event>(self.inner.handler_bound);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event).await;
            }
        });

        let mut subs = self.inner.subs.write().await;
        subs.entry(event_type).or_default().push(Subscription { id, tx });

        SubscriptionId { event_type, id }
    }

    /// Idempotent: unsubscribing an already-removed or unknown id is a no-op.
    pub async fn unsubscribe(&self, sub: SubscriptionId) {
        let mut subs = self.inner.subs.write().await;
        if let Some(list) = subs.get_mut(&sub.event_type) {
            list.retain(|s| s.id != sub.id);
        }
    }

    /// Start the dispatch loop. Calling `start` twice replaces the previous loop.
    pub async fn start(&self) {
        let (tx, mut rx) = mpsc::channel::<Event>(self.inner.queue_bound);
        {
            let mut publish_tx = self.inner.publish_tx.write().await;
            *publish_tx = Some(tx);
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let subs = inner.subs.read().await;
                if let Some(list) = subs.get(&event.event_type()) {
                    for sub in list {
                        if sub.tx.send(event.clone()).await.is_err() {
                            warn!(
                                event_type = %event.event_type(),
                                "handler channel closed, dropping event for that subscriber"
                            );
                        }
                    }
                }
            }
            debug!("event bus dispatch loop drained");
        });

        *self.inner.dispatch_handle.lock().await = Some(handle);
    }

    /// Stop accepting new events; in-flight handlers are allowed up to
    /// `drain_timeout` to finish before subscriptions are torn down.
    pub async fn stop(&self) {
        {
            let mut publish_tx = self.inner.publish_tx.write().await;
            *publish_tx = None;
        }

        let handle = self.inner.dispatch_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(self.inner.drain_timeout, handle).await;
        }

        self.inner.subs.write().await.clear();
    }

    /// Enqueue `event` for asynchronous delivery. Applies backpressure by
    /// awaiting channel capacity; returns `Err` only once the bus is stopped.
    pub async fn publish(&self, event: Event) -> Result<(), BusError> {
        let tx = {
            let guard = self.inner.publish_tx.read().await;
            guard.clone()
        };
        match tx {
            Some(tx) => tx.send(event).await.map_err(|_| BusError::ShuttingDown),
            None => Err(BusError::ShuttingDown),
        }
    }

    pub async fn subscriber_count(&self, event_type: EventType) -> usize {
        self.inner
            .subs
            .read()
            .await
            .get(&event_type)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}
