//! Aggregator worker (spec §4.6), grounded on
//! `examples/original_source/src/workers/aggregator.py::AggregatorWorker`'s
//! per-workflow accumulator and its completion predicate, re-expressed over
//! `chapterforge_core::state::WorkflowState` (already commutative-associative
//! by construction) instead of the original's manually-merged dict.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chapterforge_clients::ObjectStore;
use chapterforge_core::state::{CompletionSummary, Report, WorkflowState, WorkflowStateStatus};
use chapterforge_core::{ContentFormat, EngineError, Event, EventPayload, EventType};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::worker::{Worker, WorkerContext};

const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

struct Entry {
    state: WorkflowState,
    started_at: DateTime<Utc>,
    chapters_emitted: HashSet<String>,
    intermediate_emitted: bool,
}

impl Entry {
    fn new(workflow_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            state: WorkflowState::new(workflow_id, now),
            started_at: now,
            chapters_emitted: HashSet::new(),
            intermediate_emitted: false,
        }
    }
}

pub struct AggregatorWorker {
    object_store: Arc<dyn ObjectStore>,
    retention: Duration,
    entries: RwLock<std::collections::HashMap<Uuid, Entry>>,
}

impl AggregatorWorker {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            retention: DEFAULT_RETENTION,
            entries: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Drops completed workflows whose last update is older than `retention`.
    /// Intended to be driven by a periodic tick from the orchestrator.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            if entry.state.status != WorkflowStateStatus::Completed {
                return true;
            }
            let age = now.signed_duration_since(entry.state.updated_at);
            age.to_std().map(|age| age < self.retention).unwrap_or(true)
        });
        before - entries.len()
    }

    async fn apply(&self, event: &Event) -> Vec<EventPayload> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(event.workflow_id)
            .or_insert_with(|| Entry::new(event.workflow_id, now));

        match &event.payload {
            EventPayload::StructureAnalyzed { .. } => {
                entry.state.touch(now);
            }
            EventPayload::ChapterParsed { chapter, .. } => {
                entry.state.chapters.insert(chapter.id.clone(), chapter.clone());
                entry.state.touch(now);
            }
            EventPayload::SectionParsed { section, .. } => {
                entry.state.sections.insert(section.id.clone(), section.clone());
                entry.state.touch(now);
            }
            EventPayload::ParagraphParsed { paragraph, .. } => {
                entry.state.paragraphs.insert(paragraph.id.clone(), paragraph.clone());
                entry.state.touch(now);
            }
            EventPayload::ContentGenerated { content, .. } => {
                entry.state.content_items.insert(content.id.clone(), content.clone());
                entry.state.touch(now);
            }
            EventPayload::ImageProcessed { updated_content, processed_images, .. } => {
                entry
                    .state
                    .content_items
                    .insert(updated_content.id.clone(), updated_content.clone());
                for image in processed_images {
                    entry.state.processed_images.insert(image.id.clone(), image.clone());
                }
                entry.state.touch(now);
            }
            EventPayload::MetadataGenerated { metadata, .. } => {
                entry.state.metadata.insert(metadata.chapter_id.clone(), metadata.clone());
                entry.state.touch(now);
            }
            _ => return Vec::new(),
        }

        let mut emitted = Vec::new();
        emitted.extend(chapter_completions(entry));

        if entry.state.status == WorkflowStateStatus::Active {
            if entry.state.is_complete() {
                entry.state.status = WorkflowStateStatus::Completed;
                emitted.push(workflow_completed(&entry.state, entry.started_at, now));
            } else if entry.state.progress_ratio() >= 0.5 && !entry.intermediate_emitted {
                entry.intermediate_emitted = true;
                emitted.push(EventPayload::IntermediateAggregated {
                    completion_summary: CompletionSummary::from_state(&entry.state),
                    progress_ratio: entry.state.progress_ratio(),
                });
            }
        }

        emitted
    }

    async fn write_report(&self, workflow_id: Uuid, state: &WorkflowState, started_at: DateTime<Utc>, now: DateTime<Utc>) -> EventPayload {
        let aggregation_result = state.aggregate(started_at, now);
        let completion_summary = CompletionSummary::from_state(state);
        let report = Report {
            workflow_id,
            aggregation_result: aggregation_result.clone(),
            completion_summary: completion_summary.clone(),
            content_items: state.content_items.values().cloned().collect(),
            processed_images: state.processed_images.values().cloned().collect(),
            metadata: state.metadata.values().cloned().collect(),
            errors: state.errors.clone(),
        };

        let output_dir = format!("workflows/{workflow_id}/report");
        let mut files_generated = Vec::new();

        match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => match self.object_store.upload(bytes, &format!("{output_dir}/report.json")).await {
                Ok(url) => files_generated.push(url),
                Err(err) => warn!(%workflow_id, error = %err, "failed to upload report document"),
            },
            Err(err) => warn!(%workflow_id, error = %err, "failed to serialize report"),
        }

        for item in state.content_items.values() {
            let ext = match item.format {
                ContentFormat::Markdown => "md",
                ContentFormat::Text => "txt",
                ContentFormat::Structured => "json",
            };
            let key = format!(
                "{output_dir}/{}_{}_{}.{ext}",
                item.kind.as_str(),
                sanitize_title(&item.title),
                item.id,
            );
            match self.object_store.upload(item.body.clone().into_bytes(), &key).await {
                Ok(url) => files_generated.push(url),
                Err(err) => warn!(%workflow_id, content_id = %item.id, error = %err, "failed to upload content item"),
            }
        }

        EventPayload::ReportGenerated {
            report,
            format: "json".to_string(),
            output_dir,
            files_generated,
        }
    }
}

fn chapter_completions(entry: &mut Entry) -> Vec<EventPayload> {
    let done_paragraphs: HashSet<&str> = entry
        .state
        .content_items
        .values()
        .map(|item| item.source_paragraph_id.as_str())
        .collect();

    let mut newly_complete = Vec::new();
    for chapter in entry.state.chapters.values() {
        if entry.chapters_emitted.contains(&chapter.id) {
            continue;
        }
        let mut paragraphs = chapter.sections.iter().flat_map(|s| s.paragraphs.iter()).peekable();
        if paragraphs.peek().is_none() {
            continue;
        }
        if paragraphs.all(|p| done_paragraphs.contains(p.id.as_str())) {
            newly_complete.push(chapter.clone());
        }
    }

    for chapter in &newly_complete {
        entry.chapters_emitted.insert(chapter.id.clone());
    }

    newly_complete
        .into_iter()
        .map(|chapter| EventPayload::ChapterAggregated { chapter })
        .collect()
}

fn workflow_completed(state: &WorkflowState, started_at: DateTime<Utc>, now: DateTime<Utc>) -> EventPayload {
    EventPayload::WorkflowCompleted {
        aggregation_result: state.aggregate(started_at, now),
        completion_summary: CompletionSummary::from_state(state),
    }
}

fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    sanitized.trim_matches('_').chars().take(60).collect()
}

#[async_trait]
impl Worker for AggregatorWorker {
    fn worker_id(&self) -> &str {
        "aggregator_worker"
    }

    fn subscriptions(&self) -> Vec<EventType> {
        vec![
            EventType::StructureAnalyzed,
            EventType::ChapterParsed,
            EventType::SectionParsed,
            EventType::ParagraphParsed,
            EventType::ContentGenerated,
            EventType::ImageProcessed,
            EventType::MetadataGenerated,
        ]
    }

    async fn process(&self, event: &Event, _ctx: &WorkerContext) -> Result<Vec<EventPayload>, EngineError> {
        let mut emitted = self.apply(event).await;

        if let Some(EventPayload::WorkflowCompleted { .. }) = emitted.last() {
            let now = Utc::now();
            let (state_snapshot, started_at) = {
                let entries = self.entries.read().await;
                let entry = entries.get(&event.workflow_id).expect("just inserted above");
                (clone_state(&entry.state), entry.started_at)
            };
            let report_event = self.write_report(event.workflow_id, &state_snapshot, started_at, now).await;
            info!(workflow_id = %event.workflow_id, "workflow completed, report written");
            emitted.push(report_event);
        }

        Ok(emitted)
    }
}

fn clone_state(state: &WorkflowState) -> WorkflowState {
    WorkflowState {
        workflow_id: state.workflow_id,
        chapters: state.chapters.clone(),
        sections: state.sections.clone(),
        paragraphs: state.paragraphs.clone(),
        content_items: state.content_items.clone(),
        processed_images: state.processed_images.clone(),
        metadata: state.metadata.clone(),
        status: state.status,
        created_at: state.created_at,
        updated_at: state.updated_at,
        errors: state.errors.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chapterforge_core::{
        Chapter, ContentItem, ContentKind, Paragraph, ParagraphKind, Section,
    };
    use chapterforge_storage::InMemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubStore(AtomicUsize);

    #[async_trait]
    impl ObjectStore for StubStore {
        async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://cdn.example.com/{key}#{}", bytes.len()))
        }
    }

    fn paragraph(id: &str) -> Paragraph {
        Paragraph {
            id: id.to_string(),
            index: 0,
            content: "hello world".into(),
            kind: ParagraphKind::Paragraph,
            word_count: 2,
        }
    }

    fn section(id: &str, paragraphs: Vec<Paragraph>) -> Section {
        Section { id: id.to_string(), title: "S".into(), level: 2, content: String::new(), paragraphs }
    }

    fn chapter(id: &str, sections: Vec<Section>) -> Chapter {
        Chapter { id: id.to_string(), title: "C".into(), level: 1, content: String::new(), sections }
    }

    async fn ctx() -> WorkerContext {
        use chapterforge_core::CancellationToken;
        let bus = chapterforge_core::EventBus::default();
        bus.start().await;
        WorkerContext { bus, state_store: Arc::new(InMemoryStateStore::new()), cancellation: CancellationToken::new() }
    }

    fn ev(workflow_id: Uuid, payload: EventPayload) -> Event {
        Event::new(workflow_id, Uuid::now_v7(), payload)
    }

    #[tokio::test]
    async fn full_hierarchy_reaches_completion_and_emits_report() {
        let store = Arc::new(StubStore(AtomicUsize::new(0)));
        let worker = AggregatorWorker::new(store.clone());
        let workflow_id = Uuid::now_v7();
        let ctx = ctx().await;

        let p = paragraph("p1");
        let s = section("s1", vec![p.clone()]);
        let c = chapter("c1", vec![s.clone()]);

        let mut saw_chapter_aggregated = false;
        let mut saw_completed = false;

        for payload in [
            EventPayload::ChapterParsed { chapter: c.clone(), structure: dummy_structure(c.clone()) },
            EventPayload::SectionParsed { section: s.clone(), chapter: c.clone() },
            EventPayload::ParagraphParsed { paragraph: p.clone(), section: s.clone() },
            EventPayload::ContentGenerated {
                content: ContentItem::new(ContentKind::Article, "T", "body", ContentFormat::Markdown, p.id.clone()),
                paragraph: p.clone(),
                section: s.clone(),
            },
        ] {
            let out = worker.process(&ev(workflow_id, payload), &ctx).await.unwrap();
            for payload in out {
                match payload {
                    EventPayload::ChapterAggregated { .. } => saw_chapter_aggregated = true,
                    EventPayload::WorkflowCompleted { .. } => saw_completed = true,
                    _ => {}
                }
            }
        }

        assert!(saw_chapter_aggregated);
        assert!(saw_completed);
        assert!(store.0.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn incomplete_workflow_emits_nothing_terminal() {
        let store = Arc::new(StubStore(AtomicUsize::new(0)));
        let worker = AggregatorWorker::new(store);
        let ctx = ctx().await;
        let workflow_id = Uuid::now_v7();
        let c = chapter("c1", vec![section("s1", vec![paragraph("p1")])]);
        let out = worker
            .process(&ev(workflow_id, EventPayload::ChapterParsed { chapter: c.clone(), structure: dummy_structure(c) }), &ctx)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    fn dummy_structure(chapter: Chapter) -> chapterforge_core::DocumentStructure {
        chapterforge_core::DocumentStructure { title: "T".into(), total_length: 0, chapters: vec![chapter] }
    }
}
