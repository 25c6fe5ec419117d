//! Full-pipeline scenarios wiring `ParserWorker`/`AiWorker`/`MediaWorker`/
//! `AggregatorWorker` together over a real `EventBus`, exercising the
//! pipeline the way `chapterforge-cli`'s `run` command does (spec §8).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chapterforge_clients::{
    DiagramConverter, GenerationRequest, GenerationResponse, GeneratorClient, ObjectStore,
};
use chapterforge_core::{CancellationToken, EngineError, EventBus, EventPayload, EventType, ExecutionMode, SourceDocument};
use chapterforge_storage::{FileStateStore, InMemoryStateStore, StateStore};
use chapterforge_worker::{AggregatorWorker, AiWorker, MediaWorker, Orchestrator, ParserWorker, WorkerPool, WorkerPoolConfig};

struct StubGenerator {
    text: String,
}

#[async_trait]
impl GeneratorClient for StubGenerator {
    fn model_name(&self) -> &str {
        "stub-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, EngineError> {
        let text = if request.prompt.contains("JSON array of action objects") {
            r#"[{"name": "author-speak-before", "value": "intro"}]"#.to_string()
        } else {
            self.text.clone()
        };
        Ok(GenerationResponse {
            text,
            model: request.model.clone(),
            prompt_tokens: Some(5),
            completion_tokens: Some(5),
        })
    }
}

struct StubObjectStore {
    url: String,
}

impl StubObjectStore {
    fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ObjectStore for StubObjectStore {
    async fn upload(&self, _bytes: Vec<u8>, _key: &str) -> Result<String, EngineError> {
        Ok(self.url.clone())
    }
}

struct StubConverter {
    payload: Vec<u8>,
}

#[async_trait]
impl DiagramConverter for StubConverter {
    fn kind(&self) -> &'static str {
        "stub"
    }

    async fn convert(&self, _text_content: &str) -> Result<Vec<u8>, EngineError> {
        Ok(self.payload.clone())
    }
}

/// Subscribes immediately (so no event published after this call can be
/// missed) and returns a receiver the caller awaits later, once whatever
/// triggers the event has been kicked off.
async fn subscribe_once(
    bus: &EventBus,
    event_type: EventType,
) -> (chapterforge_core::SubscriptionId, tokio::sync::mpsc::Receiver<chapterforge_core::Event>) {
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let sub = bus
        .subscribe(
            event_type,
            Arc::new(move |event: chapterforge_core::Event| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(event).await;
                })
            }),
        )
        .await;
    (sub, rx)
}

/// Scenario 1: a single-paragraph document, stubbed generator, expect one
/// chapter/section/paragraph and five content items in the final report.
#[tokio::test]
async fn happy_path_single_paragraph_produces_full_report() {
    let bus = EventBus::default();
    bus.start().await;
    let ctx = chapterforge_worker::WorkerContext {
        bus: bus.clone(),
        state_store: Arc::new(InMemoryStateStore::new()),
        cancellation: CancellationToken::new(),
    };

    let mut pool = WorkerPool::new(ctx.clone());
    let generator = Arc::new(StubGenerator { text: "generated body".to_string() });
    let store = Arc::new(StubObjectStore::new("https://sink/report"));

    pool.register(ParserWorker::new(), WorkerPoolConfig::new(4)).await;
    pool.register(AiWorker::new(generator, "stub-model"), WorkerPoolConfig::new(4)).await;
    pool.register(MediaWorker::new(store.clone()), WorkerPoolConfig::new(4)).await;
    pool.register(AggregatorWorker::new(store), WorkerPoolConfig::new(4)).await;

    let orchestrator = Orchestrator::new(bus.clone(), ctx.state_store.clone());
    let source = SourceDocument { title: "T".into(), text: "# C\n\n## S\n\nOnly one paragraph.".into() };

    let (sub, mut rx) = subscribe_once(&bus, EventType::ReportGenerated).await;
    let workflow_id = orchestrator.run(source, ExecutionMode::Async).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("report generated within timeout")
        .expect("channel open");
    bus.unsubscribe(sub).await;
    assert_eq!(event.workflow_id, workflow_id);
    let EventPayload::ReportGenerated { report, .. } = event.payload else {
        panic!("expected ReportGenerated");
    };

    assert_eq!(report.completion_summary.chapters, 1);
    assert_eq!(report.completion_summary.sections, 1);
    assert_eq!(report.completion_summary.paragraphs, 1);
    assert_eq!(report.completion_summary.content_items, 5);
    assert_eq!(report.content_items.len(), 5);
}

/// Scenario 2: an article body with a mermaid-fenced diagram gets rewritten
/// to reference the uploaded image and the original fence disappears.
#[tokio::test]
async fn diagram_rewrite_replaces_fenced_block_with_uploaded_url() {
    use chapterforge_core::{ContentFormat, ContentItem, ContentKind, Event, Paragraph, ParagraphKind, Section};

    let store = Arc::new(StubObjectStore::new("https://sink/x.png"));
    let worker = MediaWorker::new(store.clone()).with_converters(
        Box::new(StubConverter { payload: vec![0u8; 4] }),
        Box::new(StubConverter { payload: vec![0u8; 4] }),
        Box::new(StubConverter { payload: vec![0u8; 4] }),
    );

    let body = "abc\n\n```mermaid\nA->B\n```\n\ndef";
    let content = ContentItem::new(ContentKind::Article, "t", body, ContentFormat::Markdown, "p1");
    let paragraph = Paragraph { id: "p1".into(), index: 0, content: "x".into(), kind: ParagraphKind::Paragraph, word_count: 1 };
    let section = Section { id: "s1".into(), title: "S".into(), level: 2, content: String::new(), paragraphs: vec![] };

    let event = Event::new(
        uuid::Uuid::now_v7(),
        uuid::Uuid::now_v7(),
        EventPayload::ContentGenerated { content, paragraph, section },
    );

    let ctx = chapterforge_worker::WorkerContext {
        bus: EventBus::default(),
        state_store: Arc::new(InMemoryStateStore::new()),
        cancellation: CancellationToken::new(),
    };
    let payloads = chapterforge_worker::Worker::process(&worker, &event, &ctx).await.unwrap();
    assert_eq!(payloads.len(), 1);
    let EventPayload::ImageProcessed { updated_content, .. } = &payloads[0] else {
        panic!("expected ImageProcessed");
    };
    assert!(updated_content.body.contains("https://sink/x.png"));
    assert!(!updated_content.body.contains("```mermaid"));
}

/// Scenario 5: a crash after only one of two chapters is parsed, followed by
/// `resume` against a fresh orchestrator sharing the same durable state
/// store, still reaches full completion.
#[tokio::test]
async fn resume_after_partial_run_completes_the_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let state_store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(dir.path()).await.unwrap());

    let source = SourceDocument {
        title: "T".into(),
        text: "# One\n\n## A\n\nFirst paragraph.\n\n# Two\n\n## B\n\nSecond paragraph.".into(),
    };

    // "Crash": start a run whose workers never get registered, so it persists
    // as Running with nothing ever consuming WORKFLOW_STARTED.
    let crashed_bus = EventBus::default();
    crashed_bus.start().await;
    let crashed_orchestrator = Orchestrator::new(crashed_bus, state_store.clone());
    let workflow_id = crashed_orchestrator.run(source, ExecutionMode::Async).await.unwrap();

    let execution = state_store.load_execution(workflow_id).await.unwrap().unwrap();
    assert_eq!(execution.status, chapterforge_core::ExecutionStatus::Running);

    // "Restart": fresh bus, fresh workers, same state store, resume the execution.
    let bus = EventBus::default();
    bus.start().await;
    let ctx = chapterforge_worker::WorkerContext {
        bus: bus.clone(),
        state_store: state_store.clone(),
        cancellation: CancellationToken::new(),
    };
    let mut pool = WorkerPool::new(ctx.clone());
    let generator = Arc::new(StubGenerator { text: "generated body".to_string() });
    let store = Arc::new(StubObjectStore::new("https://sink/report"));
    pool.register(ParserWorker::new(), WorkerPoolConfig::new(4)).await;
    pool.register(AiWorker::new(generator, "stub-model"), WorkerPoolConfig::new(4)).await;
    pool.register(MediaWorker::new(store.clone()), WorkerPoolConfig::new(4)).await;
    pool.register(AggregatorWorker::new(store), WorkerPoolConfig::new(4)).await;

    let orchestrator = Orchestrator::new(bus.clone(), state_store.clone());
    let (sub, mut rx) = subscribe_once(&bus, EventType::ReportGenerated).await;
    orchestrator.resume(workflow_id).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("report generated within timeout after resume")
        .expect("channel open");
    bus.unsubscribe(sub).await;
    let EventPayload::ReportGenerated { report, .. } = event.payload else {
        panic!("expected ReportGenerated");
    };
    assert_eq!(report.completion_summary.chapters, 2);
    assert_eq!(report.completion_summary.paragraphs, 2);

    let execution = state_store.load_execution(workflow_id).await.unwrap().unwrap();
    assert_eq!(execution.status, chapterforge_core::ExecutionStatus::Completed);

    let ids: std::collections::HashSet<_> = report.content_items.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids.len(), report.content_items.len(), "no duplicate content ids after resume");
}

/// Scenario 6: a generator returning a 500-character micro-post body yields
/// a content item truncated to the 280-character limit.
#[tokio::test]
async fn micro_post_generation_is_truncated() {
    let long_body: String = "x".repeat(500);
    let generator = Arc::new(StubGenerator { text: long_body });

    let ctx = chapterforge_worker::WorkerContext {
        bus: EventBus::default(),
        state_store: Arc::new(InMemoryStateStore::new()),
        cancellation: CancellationToken::new(),
    };

    let worker = AiWorker::new(generator, "stub-model");

    use chapterforge_core::{Event, Paragraph, ParagraphKind, Section};
    let paragraph = Paragraph { id: "p1".into(), index: 0, content: "source text".into(), kind: ParagraphKind::Paragraph, word_count: 2 };
    let section = Section { id: "s1".into(), title: "S".into(), level: 2, content: String::new(), paragraphs: vec![paragraph.clone()] };
    let event = Event::new(
        uuid::Uuid::now_v7(),
        uuid::Uuid::now_v7(),
        EventPayload::ParagraphParsed { paragraph, section },
    );

    let payloads = chapterforge_worker::Worker::process(&worker, &event, &ctx).await.unwrap();
    let micro_post = payloads.iter().find_map(|p| match p {
        EventPayload::ContentGenerated { content, .. } if content.kind == chapterforge_core::ContentKind::MicroPost => Some(content.clone()),
        _ => None,
    });
    let micro_post = micro_post.expect("micro post content generated");
    assert!(micro_post.character_count.unwrap() as usize <= chapterforge_core::MICRO_POST_MAX_CHARS);
    assert!(micro_post.truncated);
}
