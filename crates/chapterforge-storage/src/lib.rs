//! Caching and execution-state persistence shared by the worker and CLI crates.

pub mod cache;
pub mod state_store;

pub use cache::{Cache, CacheStats};
pub use state_store::{
    Checkpoint, ExecutionSummary, FileStateStore, InMemoryStateStore, ListFilter, StateStore,
    StoreError,
};
