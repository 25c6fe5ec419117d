//! The event protocol (spec §3, §6).
//!
//! Events are immutable, value-copied across the bus. `EventPayload` is a
//! closed sum type rather than a free-form map (spec §9 "Dynamic event
//! payloads"): the variant a worker matches on IS the validation — there is
//! no separate "unknown type" branch to reject at runtime, because the type
//! system already rejects it at construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::{
    Chapter, ContentItem, DocumentStructure, Paragraph, ProcessedImage, Section,
    StructuralAnalysis, ThumbnailRequest, ChapterMetadata,
};
use crate::content::SourceDocument;
use crate::error::EngineError;
use crate::state::{AggregationResult, CompletionSummary, Report};

/// Closed enum of event types (spec §6, wire identifiers shown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowSuspended,
    ChapterParsed,
    SectionParsed,
    ParagraphParsed,
    StructureAnalyzed,
    ContentGenerated,
    ChapterAggregated,
    MetadataGenerated,
    ThumbnailGenerated,
    ImageProcessed,
    IntermediateAggregated,
    ReportGenerated,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
}

impl EventType {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "WORKFLOW_STARTED",
            Self::WorkflowCompleted => "WORKFLOW_COMPLETED",
            Self::WorkflowFailed => "WORKFLOW_FAILED",
            Self::WorkflowSuspended => "WORKFLOW_SUSPENDED",
            Self::ChapterParsed => "CHAPTER_PARSED",
            Self::SectionParsed => "SECTION_PARSED",
            Self::ParagraphParsed => "PARAGRAPH_PARSED",
            Self::StructureAnalyzed => "STRUCTURE_ANALYZED",
            Self::ContentGenerated => "CONTENT_GENERATED",
            Self::ChapterAggregated => "CHAPTER_AGGREGATED",
            Self::MetadataGenerated => "METADATA_GENERATED",
            Self::ThumbnailGenerated => "THUMBNAIL_GENERATED",
            Self::ImageProcessed => "IMAGE_PROCESSED",
            Self::IntermediateAggregated => "INTERMEDIATE_AGGREGATED",
            Self::ReportGenerated => "REPORT_GENERATED",
            Self::TaskStarted => "TASK_STARTED",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskFailed => "TASK_FAILED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Type-specific payload (spec §6 "Event payload schemas").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Started {
        content: SourceDocument,
    },
    ChapterParsed {
        chapter: Chapter,
        structure: DocumentStructure,
    },
    SectionParsed {
        section: Section,
        chapter: Chapter,
    },
    ParagraphParsed {
        paragraph: Paragraph,
        section: Section,
    },
    StructureAnalyzed {
        structure: DocumentStructure,
        analysis: Option<StructuralAnalysis>,
        section: Option<Section>,
        chapter: Option<Chapter>,
    },
    ContentGenerated {
        content: ContentItem,
        paragraph: Paragraph,
        section: Section,
    },
    ChapterAggregated {
        chapter: Chapter,
    },
    MetadataGenerated {
        metadata: ChapterMetadata,
        chapter: Chapter,
        thumbnail: Option<ThumbnailRequest>,
    },
    ThumbnailGenerated {
        thumbnail: ThumbnailRequest,
        chapter: Chapter,
    },
    ImageProcessed {
        original_content: ContentItem,
        updated_content: ContentItem,
        processed_images: Vec<ProcessedImage>,
        paragraph: Option<Paragraph>,
        section: Option<Section>,
        thumbnail: bool,
    },
    IntermediateAggregated {
        completion_summary: CompletionSummary,
        progress_ratio: f64,
    },
    WorkflowCompleted {
        aggregation_result: AggregationResult,
        completion_summary: CompletionSummary,
    },
    ReportGenerated {
        report: Report,
        format: String,
        output_dir: String,
        files_generated: Vec<String>,
    },
    WorkflowFailed {
        reason: String,
        error: EngineError,
        original_event_type: Option<EventType>,
    },
    WorkflowSuspended {
        reason: String,
    },
    TaskStarted {
        task_id: String,
    },
    TaskCompleted {
        task_id: String,
        result: Option<serde_json::Value>,
    },
    TaskFailed {
        task_id: String,
        error: EngineError,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Started { .. } => EventType::WorkflowStarted,
            Self::ChapterParsed { .. } => EventType::ChapterParsed,
            Self::SectionParsed { .. } => EventType::SectionParsed,
            Self::ParagraphParsed { .. } => EventType::ParagraphParsed,
            Self::StructureAnalyzed { .. } => EventType::StructureAnalyzed,
            Self::ContentGenerated { .. } => EventType::ContentGenerated,
            Self::ChapterAggregated { .. } => EventType::ChapterAggregated,
            Self::MetadataGenerated { .. } => EventType::MetadataGenerated,
            Self::ThumbnailGenerated { .. } => EventType::ThumbnailGenerated,
            Self::ImageProcessed { .. } => EventType::ImageProcessed,
            Self::IntermediateAggregated { .. } => EventType::IntermediateAggregated,
            Self::WorkflowCompleted { .. } => EventType::WorkflowCompleted,
            Self::ReportGenerated { .. } => EventType::ReportGenerated,
            Self::WorkflowFailed { .. } => EventType::WorkflowFailed,
            Self::WorkflowSuspended { .. } => EventType::WorkflowSuspended,
            Self::TaskStarted { .. } => EventType::TaskStarted,
            Self::TaskCompleted { .. } => EventType::TaskCompleted,
            Self::TaskFailed { .. } => EventType::TaskFailed,
        }
    }
}

/// Immutable tagged record dispatched on the bus (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trace_id: Uuid,
    pub retry_count: u32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// `workflow_id` non-empty and `type` recognized are invariants enforced
    /// by construction: a nil `workflow_id` is rejected, and `payload`'s
    /// variant IS the recognized type.
    pub fn new(workflow_id: Uuid, trace_id: Uuid, payload: EventPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            trace_id,
            retry_count: 0,
            priority: 0,
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Re-emit the same logical event with an incremented retry count,
    /// preserving `workflow_id` and `trace_id` (spec §8 invariant).
    pub fn retried(&self) -> Self {
        let mut next = self.clone();
        next.id = Uuid::now_v7();
        next.retry_count += 1;
        next.created_at = Utc::now();
        next
    }

    pub fn is_valid(&self) -> bool {
        self.workflow_id != Uuid::nil()
    }
}
