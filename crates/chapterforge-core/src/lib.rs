//! Shared domain model for the content derivation pipeline: the event
//! protocol, the typed event bus, document/content types, and the two
//! accumulators (`WorkflowExecution` for orchestration bookkeeping,
//! `WorkflowState` for aggregation) that the rest of the workspace builds on.

pub mod bus;
pub mod cancellation;
pub mod content;
pub mod error;
pub mod event;
pub mod execution;
pub mod ids;
pub mod state;

pub use bus::{BusError, EventBus, HandlerFn, HandlerFuture, SubscriptionId};
pub use cancellation::CancellationToken;
pub use content::{
    Chapter, ChapterMetadata, ContentFormat, ContentItem, ContentKind, DiagramKind,
    DocumentStructure, Paragraph, ParagraphKind, ProcessedImage, ScriptAction, Section,
    SourceDocument, StructuralAnalysis, ThumbnailRequest, MICRO_POST_MAX_CHARS,
    SCRIPT_ACTION_NAMES,
};
pub use error::EngineError;
pub use event::{Event, EventPayload, EventType};
pub use execution::{ExecutionMode, ExecutionStatus, StepExecution, StepStatus, WorkflowExecution};
pub use state::{
    AggregationResult, CompletionSummary, ContentKindSummary, ProcessingStats, Report,
    WorkflowState, WorkflowStateStatus,
};
