//! `WorkflowState` (spec §3, §4.6): the Aggregator's per-workflow accumulator.
//!
//! Mutated only by the single Aggregator worker instance that owns a given
//! `workflow_id` (spec §5). Aggregation is commutative-associative: the final
//! state depends only on the multiset of inbound events, never their order,
//! because every insert is keyed by a stable id (crate::ids).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::{Chapter, ChapterMetadata, ContentItem, Paragraph, ProcessedImage, Section};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStateStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub chapters: HashMap<String, Chapter>,
    pub sections: HashMap<String, Section>,
    pub paragraphs: HashMap<String, Paragraph>,
    pub content_items: HashMap<String, ContentItem>,
    pub processed_images: HashMap<String, ProcessedImage>,
    pub metadata: HashMap<String, ChapterMetadata>,
    pub status: WorkflowStateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub errors: Vec<String>,
}

impl WorkflowState {
    pub fn new(workflow_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            chapters: HashMap::new(),
            sections: HashMap::new(),
            paragraphs: HashMap::new(),
            content_items: HashMap::new(),
            processed_images: HashMap::new(),
            metadata: HashMap::new(),
            status: WorkflowStateStatus::Active,
            created_at: now,
            updated_at: now,
            errors: Vec::new(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn record_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.errors.push(message.into());
        self.touch(now);
    }

    /// Completion predicate from spec §4.6:
    /// `chapters ≥ 1 ∧ sections ≥ 1 ∧ paragraphs ≥ 1 ∧ |content_items| ≥ |paragraphs|`
    pub fn is_complete(&self) -> bool {
        !self.chapters.is_empty()
            && !self.sections.is_empty()
            && !self.paragraphs.is_empty()
            && self.content_items.len() >= self.paragraphs.len()
    }

    /// Fraction toward completion, used for the `INTERMEDIATE_AGGREGATED`
    /// 50%-progress threshold (spec §4.6). `0.0` when there's nothing parsed yet.
    pub fn progress_ratio(&self) -> f64 {
        if self.paragraphs.is_empty() {
            return 0.0;
        }
        (self.content_items.len() as f64 / self.paragraphs.len() as f64).min(1.0)
    }

    pub fn aggregate(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> AggregationResult {
        let mut by_kind: HashMap<String, ContentKindSummary> = HashMap::new();
        for item in self.content_items.values() {
            let entry = by_kind
                .entry(item.kind.as_str().to_string())
                .or_insert_with(|| ContentKindSummary {
                    count: 0,
                    total_words: 0,
                });
            entry.count += 1;
            entry.total_words += item.word_count.unwrap_or(0) as u64;
        }

        let mut image_format_histogram: HashMap<String, u32> = HashMap::new();
        for image in self.processed_images.values() {
            *image_format_histogram.entry(image.format.clone()).or_insert(0) += 1;
        }

        let wall_clock = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let total_items = self.content_items.len() as f64;
        let items_per_second = if wall_clock > 0.0 {
            total_items / wall_clock
        } else {
            total_items
        };

        AggregationResult {
            workflow_id: self.workflow_id,
            content_by_kind: by_kind,
            processing_stats: ProcessingStats {
                wall_clock_seconds: wall_clock,
                items_per_second,
                image_format_histogram,
            },
            errors: self.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentKindSummary {
    pub count: u32,
    pub total_words: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub wall_clock_seconds: f64,
    pub items_per_second: f64,
    pub image_format_histogram: HashMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub workflow_id: Uuid,
    pub content_by_kind: HashMap<String, ContentKindSummary>,
    pub processing_stats: ProcessingStats,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub workflow_id: Uuid,
    pub chapters: usize,
    pub sections: usize,
    pub paragraphs: usize,
    pub content_items: usize,
    pub processed_images: usize,
}

impl CompletionSummary {
    pub fn from_state(state: &WorkflowState) -> Self {
        Self {
            workflow_id: state.workflow_id,
            chapters: state.chapters.len(),
            sections: state.sections.len(),
            paragraphs: state.paragraphs.len(),
            content_items: state.content_items.len(),
            processed_images: state.processed_images.len(),
        }
    }
}

/// The final JSON document written to the output sink (spec §4.6, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub workflow_id: Uuid,
    pub aggregation_result: AggregationResult,
    pub completion_summary: CompletionSummary,
    pub content_items: Vec<ContentItem>,
    pub processed_images: Vec<ProcessedImage>,
    pub metadata: Vec<ChapterMetadata>,
    pub errors: Vec<String>,
}
