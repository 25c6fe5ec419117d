//! Parser/AI/Media/Aggregator workers, the worker pool, and the orchestrator
//! (spec §4.2-§4.9): the pieces that turn a `SourceDocument` into a finished
//! derivation report by subscribing to and publishing on a shared `EventBus`.

pub mod aggregator;
pub mod ai;
pub mod media;
pub mod orchestrator;
pub mod parser;
pub mod pool;
pub mod worker;

pub use aggregator::AggregatorWorker;
pub use ai::AiWorker;
pub use media::MediaWorker;
pub use orchestrator::Orchestrator;
pub use parser::ParserWorker;
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use worker::{spawn_worker, Worker, WorkerContext};
