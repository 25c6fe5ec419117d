//! AI worker (spec §4.4), ported from
//! `examples/original_source/src/workers/ai.py::AIWorker`. The Python
//! original simulates generation locally with canned strings; here each of
//! the five fan-out tasks is a real [`GeneratorClient`] call behind the
//! cache/rate-limit stack from §4.7, and the structural-analysis heuristics
//! (`_classify_content_type`/`_assess_complexity`/`_extract_key_concepts`/
//! `_estimate_reading_time`) are ported as-is.

use std::sync::Arc;

use async_trait::async_trait;
use chapterforge_clients::{GenerationRequest, GeneratorClient};
use chapterforge_core::{
    Chapter, ChapterMetadata, ContentFormat, ContentItem, ContentKind, DocumentStructure,
    EngineError, Event, EventPayload, EventType, Paragraph, ScriptAction, Section,
    StructuralAnalysis, ThumbnailRequest, SCRIPT_ACTION_NAMES,
};
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::worker::{Worker, WorkerContext};

const TECH_TERMS: [&str; 7] = ["api", "database", "server", "client", "algorithm", "code", "system"];
const WORDS_PER_MINUTE: usize = 200;

pub struct AiWorker<G: GeneratorClient + 'static> {
    generator: Arc<G>,
    fanout_limit: Arc<Semaphore>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl<G: GeneratorClient + 'static> AiWorker<G> {
    pub fn new(generator: Arc<G>, model: impl Into<String>) -> Self {
        Self {
            generator,
            fanout_limit: Arc::new(Semaphore::new(3)),
            model: model.into(),
            max_tokens: 800,
            temperature: 0.7,
        }
    }

    pub fn with_fanout_limit(mut self, limit: usize) -> Self {
        self.fanout_limit = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn with_generation_params(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    async fn generate_one(
        &self,
        kind: ContentKind,
        paragraph: &Paragraph,
        section: &Section,
    ) -> Result<ContentItem, EngineError> {
        let _permit = self.fanout_limit.acquire().await;

        let request = GenerationRequest {
            prompt: prompt_for(kind, paragraph, section),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            images_hash: None,
        };

        let response = self.generator.generate(&request).await?;
        let body = if kind == ContentKind::ScriptStructured {
            validate_script_actions(&response.text)?
        } else {
            response.text
        };
        let mut item = ContentItem::new(kind, title_for(kind, section), body, format_for(kind), paragraph.id.clone());

        if matches!(kind, ContentKind::Script | ContentKind::ScriptStructured) {
            let seconds = estimate_reading_seconds(&item.body);
            item = item.with_estimated_duration(seconds as u32);
        }

        Ok(item)
    }

    async fn handle_paragraph_parsed(
        &self,
        paragraph: &Paragraph,
        section: &Section,
    ) -> Vec<EventPayload> {
        let results = futures::future::join_all(
            ContentKind::ALL
                .iter()
                .map(|&kind| self.generate_one(kind, paragraph, section)),
        )
        .await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(content) => Some(EventPayload::ContentGenerated {
                    content,
                    paragraph: paragraph.clone(),
                    section: section.clone(),
                }),
                Err(err) => {
                    error!(error = %err, "content generation task failed, skipping that kind");
                    None
                }
            })
            .collect()
    }

    fn handle_section_parsed(&self, section: &Section, chapter: &Chapter) -> EventPayload {
        let analysis = analyze_section(section);
        let structure = DocumentStructure {
            title: chapter.title.clone(),
            total_length: chapter.content.chars().count(),
            chapters: vec![chapter.clone()],
        };
        EventPayload::StructureAnalyzed {
            structure,
            analysis: Some(analysis),
            section: Some(section.clone()),
            chapter: Some(chapter.clone()),
        }
    }

    fn handle_chapter_aggregated(&self, chapter: &Chapter) -> EventPayload {
        let total_paragraphs: usize = chapter.sections.iter().map(|s| s.paragraphs.len()).sum();
        let metadata = ChapterMetadata {
            chapter_id: chapter.id.clone(),
            title: chapter.title.clone(),
            section_count: chapter.sections.len(),
            total_paragraphs,
            estimated_reading_time_seconds: estimate_reading_seconds(&chapter.content) as u32,
            difficulty: "intermediate".to_string(),
        };
        let thumbnail = ThumbnailRequest {
            chapter_id: chapter.id.clone(),
            title: chapter.title.clone(),
            style: "modern".to_string(),
            color_scheme: "blue".to_string(),
            width: 1200,
            height: 630,
        };
        EventPayload::MetadataGenerated {
            metadata,
            chapter: chapter.clone(),
            thumbnail: Some(thumbnail),
        }
    }
}

#[async_trait]
impl<G: GeneratorClient + 'static> Worker for AiWorker<G> {
    fn worker_id(&self) -> &str {
        "ai_worker"
    }

    fn subscriptions(&self) -> Vec<EventType> {
        vec![
            EventType::SectionParsed,
            EventType::ParagraphParsed,
            EventType::ChapterAggregated,
            EventType::StructureAnalyzed,
        ]
    }

    async fn process(
        &self,
        event: &Event,
        _ctx: &WorkerContext,
    ) -> Result<Vec<EventPayload>, EngineError> {
        match &event.payload {
            EventPayload::ParagraphParsed { paragraph, section } => {
                Ok(self.handle_paragraph_parsed(paragraph, section).await)
            }
            EventPayload::SectionParsed { section, chapter } => {
                Ok(vec![self.handle_section_parsed(section, chapter)])
            }
            EventPayload::ChapterAggregated { chapter } => {
                Ok(vec![self.handle_chapter_aggregated(chapter)])
            }
            EventPayload::StructureAnalyzed { section, analysis, .. } => {
                if section.is_none() || analysis.is_none() {
                    warn!("incomplete structure analysis data, skipping");
                }
                Ok(vec![])
            }
            _ => Ok(vec![]),
        }
    }
}

fn prompt_for(kind: ContentKind, paragraph: &Paragraph, section: &Section) -> String {
    let content = &paragraph.content;
    let section_title = &section.title;
    match kind {
        ContentKind::Article => format!(
            "Write a detailed article section expanding on this paragraph from \"{section_title}\":\n\n{content}\n\nReturn well-structured Markdown prose."
        ),
        ContentKind::Script => format!(
            "Write a short narration script for a video, expanding on this paragraph from \"{section_title}\":\n\n{content}"
        ),
        ContentKind::ScriptStructured => format!(
            "Produce a JSON array of action objects, each shaped as {{\"name\": ..., \"value\": ...}}, \
             covering this paragraph from \"{section_title}\":\n\n{content}\n\n\
             `name` must be one of: {}. Use `author-speak-before` for narration lines, \
             `file-explorer-create-file`/`file-explorer-open-file` with the file path as `value`, \
             `editor-type` with the literal text to type, `editor-enter`/`editor-space` with a \
             repeat count, and `editor-save` with an empty value. Return only the JSON array.",
            SCRIPT_ACTION_NAMES.join(", ")
        ),
        ContentKind::MicroPost => format!(
            "Write a single social media post (max 280 characters) summarizing this paragraph from \"{section_title}\":\n\n{content}"
        ),
        ContentKind::Description => format!(
            "Write a concise summary and detailed explanation of this paragraph from \"{section_title}\":\n\n{content}"
        ),
    }
}

fn title_for(kind: ContentKind, section: &Section) -> String {
    match kind {
        ContentKind::Article => format!("Article: {}", section.title),
        ContentKind::Script => format!("Script: {}", section.title),
        ContentKind::ScriptStructured => format!("Script (structured): {}", section.title),
        ContentKind::MicroPost => format!("Post: {}", section.title),
        ContentKind::Description => format!("Description: {}", section.title),
    }
}

fn format_for(kind: ContentKind) -> ContentFormat {
    match kind {
        ContentKind::Article | ContentKind::Description => ContentFormat::Markdown,
        ContentKind::Script | ContentKind::MicroPost => ContentFormat::Text,
        ContentKind::ScriptStructured => ContentFormat::Structured,
    }
}

/// Parses a generated structured-script response against the closed
/// `author-speak-before`/`file-explorer-*`/`editor-*` action set (spec §6)
/// and re-serializes it canonically, rejecting anything that doesn't match
/// the `{name, value}` action-list shape the original's `script_json`
/// prompt produces (`examples/original_source/tests/fixtures/sample_script_data.py`).
fn validate_script_actions(text: &str) -> Result<String, EngineError> {
    let trimmed = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
    let actions: Vec<ScriptAction> = serde_json::from_str(trimmed)
        .map_err(|e| EngineError::validation(format!("generated script is not a valid action list: {e}")))?;

    if actions.is_empty() {
        return Err(EngineError::validation("generated script action list is empty"));
    }
    for action in &actions {
        if !SCRIPT_ACTION_NAMES.contains(&action.name.as_str()) {
            return Err(EngineError::validation(format!(
                "generated script used unknown action name \"{}\"",
                action.name
            )));
        }
    }

    serde_json::to_string(&actions)
        .map_err(|e| EngineError::validation(format!("failed to re-serialize validated script actions: {e}")))
}

fn analyze_section(section: &Section) -> StructuralAnalysis {
    StructuralAnalysis {
        content_type: classify_content_type(&section.content),
        complexity_level: assess_complexity(&section.content).to_string(),
        key_concepts: extract_key_concepts(&section.content),
        estimated_reading_time_seconds: estimate_reading_seconds(&section.content) as u32,
        paragraph_count: section.paragraphs.len(),
    }
}

fn classify_content_type(content: &str) -> String {
    let lower = content.to_lowercase();
    if TECH_TERMS.iter().any(|term| lower.contains(term)) || content.contains("```") {
        "technical".to_string()
    } else if lower.contains("example") {
        "example".to_string()
    } else if lower.contains("overview") {
        "overview".to_string()
    } else {
        "general".to_string()
    }
}

fn assess_complexity(content: &str) -> &'static str {
    let word_count = content.split_whitespace().count();
    if word_count < 50 {
        "simple"
    } else if word_count < 200 {
        "moderate"
    } else {
        "complex"
    }
}

fn extract_key_concepts(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    TECH_TERMS
        .iter()
        .filter(|term| lower.contains(*term))
        .take(5)
        .map(|term| term.to_string())
        .collect()
}

fn estimate_reading_seconds(content: &str) -> usize {
    let word_count = content.split_whitespace().count();
    let minutes = (word_count / WORDS_PER_MINUTE).max(1);
    minutes * 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chapterforge_core::ParagraphKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct StubGenerator {
        calls: AtomicU32,
        fail_kinds: Vec<String>,
    }

    #[async_trait]
    impl GeneratorClient for StubGenerator {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<chapterforge_clients::GenerationResponse, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_kinds.iter().any(|k| request.prompt.contains(k)) {
                return Err(EngineError::transient("stub failure"));
            }
            let text = if request.prompt.contains("JSON array of action objects") {
                r#"[{"name": "author-speak-before", "value": "intro narration"}]"#.to_string()
            } else {
                format!("generated for: {}", request.prompt)
            };
            Ok(chapterforge_clients::GenerationResponse {
                text,
                model: request.model.clone(),
                prompt_tokens: Some(10),
                completion_tokens: Some(20),
            })
        }
    }

    fn paragraph() -> Paragraph {
        Paragraph {
            id: "p1".into(),
            index: 0,
            content: "Some paragraph content about an API and a database.".into(),
            kind: ParagraphKind::Paragraph,
            word_count: 9,
        }
    }

    fn section() -> Section {
        Section {
            id: "s1".into(),
            title: "Intro".into(),
            level: 2,
            content: "Some paragraph content about an API and a database.".into(),
            paragraphs: vec![paragraph()],
        }
    }

    #[tokio::test]
    async fn paragraph_parsed_emits_five_content_items_on_success() {
        let generator = Arc::new(StubGenerator {
            calls: AtomicU32::new(0),
            fail_kinds: vec![],
        });
        let worker = AiWorker::new(generator, "test-model");
        let events = worker.handle_paragraph_parsed(&paragraph(), &section()).await;
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn one_failing_kind_does_not_block_the_others() {
        let generator = Arc::new(StubGenerator {
            calls: AtomicU32::new(0),
            fail_kinds: vec!["social media post".to_string()],
        });
        let worker = AiWorker::new(generator, "test-model");
        let events = worker.handle_paragraph_parsed(&paragraph(), &section()).await;
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn micro_post_title_and_format_are_consistent() {
        assert_eq!(format_for(ContentKind::MicroPost), ContentFormat::Text);
        assert!(title_for(ContentKind::MicroPost, &section()).starts_with("Post:"));
    }

    #[test]
    fn validate_script_actions_accepts_closed_action_set() {
        let json = r#"[{"name": "editor-type", "value": "package main"}, {"name": "editor-enter", "value": "2"}]"#;
        let validated = validate_script_actions(json).unwrap();
        assert!(validated.contains("editor-type"));
    }

    #[test]
    fn validate_script_actions_rejects_unknown_action_name() {
        let json = r#"[{"name": "narrator-says", "value": "oops"}]"#;
        assert!(validate_script_actions(json).is_err());
    }

    #[test]
    fn validate_script_actions_rejects_scene_object_shape() {
        let json = r#"[{"speaker": "narrator", "text": "hi", "duration_seconds": 3}]"#;
        assert!(validate_script_actions(json).is_err());
    }

    #[test]
    fn technical_content_is_classified_correctly() {
        assert_eq!(classify_content_type("this uses a REST api and a database"), "technical");
        assert_eq!(classify_content_type("just a general overview of things"), "overview");
    }

    #[tokio::test]
    async fn chapter_aggregated_produces_metadata_and_thumbnail() {
        let generator = Arc::new(StubGenerator {
            calls: AtomicU32::new(0),
            fail_kinds: vec![],
        });
        let worker = AiWorker::new(generator, "test-model");
        let chapter = Chapter {
            id: "c1".into(),
            title: "Chapter One".into(),
            level: 1,
            content: "word ".repeat(300),
            sections: vec![section()],
        };
        let payload = worker.handle_chapter_aggregated(&chapter);
        match payload {
            EventPayload::MetadataGenerated { metadata, thumbnail, .. } => {
                assert_eq!(metadata.section_count, 1);
                assert_eq!(metadata.total_paragraphs, 1);
                assert!(thumbnail.is_some());
            }
            _ => panic!("expected MetadataGenerated"),
        }
    }
}
