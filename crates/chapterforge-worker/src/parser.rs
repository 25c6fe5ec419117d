//! Parser worker (spec §4.3), ported from
//! `examples/original_source/src/workers/parser.py::ParserWorker`'s
//! `_extract_chapters`/`_extract_sections`/`_extract_paragraphs`/
//! `_classify_paragraph_type`. The Python original re-parses a chapter's
//! sections lazily on `CHAPTER_PARSED`; here the whole tree is built once on
//! `WORKFLOW_STARTED` and `CHAPTER_PARSED`/`SECTION_PARSED` just fan the
//! already-built children back out, which is equivalent since nothing
//! mutates the tree in between.

use async_trait::async_trait;
use chapterforge_core::{
    Chapter, DocumentStructure, EngineError, Event, EventPayload, EventType, Paragraph,
    ParagraphKind, Section, SourceDocument,
};
use chapterforge_core::ids;

use crate::worker::{Worker, WorkerContext};

pub struct ParserWorker;

impl ParserWorker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ParserWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for ParserWorker {
    fn worker_id(&self) -> &str {
        "parser_worker"
    }

    fn subscriptions(&self) -> Vec<EventType> {
        vec![EventType::WorkflowStarted, EventType::ChapterParsed, EventType::SectionParsed]
    }

    async fn process(
        &self,
        event: &Event,
        _ctx: &WorkerContext,
    ) -> Result<Vec<EventPayload>, EngineError> {
        match &event.payload {
            EventPayload::Started { content } => Ok(handle_workflow_started(content)),
            EventPayload::ChapterParsed { chapter, .. } => Ok(chapter
                .sections
                .iter()
                .map(|section| EventPayload::SectionParsed {
                    section: section.clone(),
                    chapter: chapter.clone(),
                })
                .collect()),
            EventPayload::SectionParsed { section, .. } => Ok(section
                .paragraphs
                .iter()
                .map(|paragraph| EventPayload::ParagraphParsed {
                    paragraph: paragraph.clone(),
                    section: section.clone(),
                })
                .collect()),
            _ => Ok(vec![]),
        }
    }
}

fn handle_workflow_started(content: &SourceDocument) -> Vec<EventPayload> {
    let structure = analyze_structure(content);

    let mut emitted = vec![EventPayload::StructureAnalyzed {
        structure: structure.clone(),
        analysis: None,
        section: None,
        chapter: None,
    }];

    for chapter in &structure.chapters {
        emitted.push(EventPayload::ChapterParsed {
            chapter: chapter.clone(),
            structure: structure.clone(),
        });
    }

    emitted
}

fn analyze_structure(content: &SourceDocument) -> DocumentStructure {
    let chapters = extract_chapters(&content.text);
    DocumentStructure {
        title: if content.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            content.title.clone()
        },
        total_length: content.text.chars().count(),
        chapters,
    }
}

/// Level-1 headings split the document into chapters. No heading at all
/// falls back to one synthetic "Main Content" chapter covering the whole
/// body, unless the body is empty (spec §4.3 edge case c) — an empty
/// source produces zero chapters, not a synthetic empty one.
fn extract_chapters(text: &str) -> Vec<Chapter> {
    let raw = split_on_level(text, "# ", "## ");

    let raw = if raw.is_empty() && !text.trim().is_empty() {
        vec![("Main Content".to_string(), text.to_string())]
    } else {
        raw
    };

    raw.into_iter()
        .enumerate()
        .map(|(index, (title, body))| {
            let sections = extract_sections(index, &body);
            Chapter {
                id: ids::chapter_id(1, &title),
                title,
                level: 1,
                content: body,
                sections,
            }
        })
        .collect()
}

/// Level-2 headings split a chapter's body into sections. No level-2
/// heading falls back to one synthetic "Main Section" (spec §4.3 edge case b).
fn extract_sections(chapter_index: usize, text: &str) -> Vec<Section> {
    let raw = split_on_level(text, "## ", "### ");

    let raw = if raw.is_empty() {
        vec![("Main Section".to_string(), text.to_string())]
    } else {
        raw
    };

    raw.into_iter()
        .enumerate()
        .map(|(section_index, (title, body))| Section {
            id: ids::section_id(chapter_index, 2, &title),
            paragraphs: extract_paragraphs(chapter_index, section_index, &body),
            title,
            level: 2,
            content: body,
        })
        .collect()
}

/// Splits `text` on lines starting with `marker` but not `next_marker`
/// (e.g. `"# "` matches a chapter heading but not `"## "`), mirroring the
/// original's two-pass chapter/section extraction with one parametrized
/// function. Lines before the first matching heading are dropped, matching
/// the original's behavior of only accumulating once a heading has opened.
fn split_on_level(text: &str, marker: &str, next_marker: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.starts_with(marker) && !line.starts_with(next_marker) {
            if let Some(title) = current_title.take() {
                out.push((title, current_lines.join("\n")));
            }
            current_title = Some(line[marker.len()..].trim().to_string());
            current_lines = Vec::new();
        } else if current_title.is_some() {
            current_lines.push(line);
        }
    }

    if let Some(title) = current_title.take() {
        out.push((title, current_lines.join("\n")));
    }

    out
}

fn extract_paragraphs(chapter_index: usize, section_index: usize, text: &str) -> Vec<Paragraph> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(paragraph_index, body)| Paragraph {
            id: ids::paragraph_id(chapter_index, section_index, paragraph_index),
            index: paragraph_index,
            kind: classify_paragraph(body),
            word_count: body.split_whitespace().count(),
            content: body.to_string(),
        })
        .collect()
}

fn classify_paragraph(text: &str) -> ParagraphKind {
    let text = text.trim();
    if text.starts_with("###") {
        ParagraphKind::Heading3
    } else if text.starts_with("- ") || text.starts_with("* ") {
        ParagraphKind::List
    } else if text.starts_with("> ") {
        ParagraphKind::Quote
    } else if text.contains("```") {
        ParagraphKind::Code
    } else if text.split_whitespace().count() < 10 {
        ParagraphKind::Short
    } else {
        ParagraphKind::Paragraph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str, text: &str) -> SourceDocument {
        SourceDocument {
            title: title.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn no_heading_falls_back_to_single_chapter() {
        let structure = analyze_structure(&doc("T", "just some text\n\nmore text here too"));
        assert_eq!(structure.chapters.len(), 1);
        assert_eq!(structure.chapters[0].title, "Main Content");
    }

    #[test]
    fn heading_without_subheading_falls_back_to_main_section() {
        let structure = analyze_structure(&doc("T", "# Chapter One\nsome body text\n\nmore body"));
        assert_eq!(structure.chapters.len(), 1);
        assert_eq!(structure.chapters[0].sections.len(), 1);
        assert_eq!(structure.chapters[0].sections[0].title, "Main Section");
    }

    #[test]
    fn empty_source_has_zero_chapters() {
        let structure = analyze_structure(&doc("T", ""));
        assert!(structure.chapters.is_empty());
    }

    #[test]
    fn full_hierarchy_is_extracted() {
        let text = "# Chapter One\n## Section A\nFirst short para.\n\nSecond paragraph with more than ten words in it to avoid the short classification.";
        let structure = analyze_structure(&doc("T", text));
        let chapter = &structure.chapters[0];
        assert_eq!(chapter.title, "Chapter One");
        let section = &chapter.sections[0];
        assert_eq!(section.title, "Section A");
        assert_eq!(section.paragraphs.len(), 2);
        assert_eq!(section.paragraphs[0].kind, ParagraphKind::Short);
        assert_eq!(section.paragraphs[1].kind, ParagraphKind::Paragraph);
    }

    #[test]
    fn paragraph_classification_matches_markers() {
        assert_eq!(classify_paragraph("- an item"), ParagraphKind::List);
        assert_eq!(classify_paragraph("> a quote"), ParagraphKind::Quote);
        assert_eq!(classify_paragraph("```\ncode\n```"), ParagraphKind::Code);
        assert_eq!(classify_paragraph("### heading"), ParagraphKind::Heading3);
    }

    #[tokio::test]
    async fn processing_workflow_started_emits_structure_then_chapters() {
        let worker = ParserWorker::new();
        let ctx = test_context().await;
        let event = Event::new(
            uuid::Uuid::now_v7(),
            uuid::Uuid::now_v7(),
            EventPayload::Started {
                content: doc("T", "# Chapter One\n## Section A\nSome paragraph text here that is long enough."),
            },
        );
        let out = worker.process(&event, &ctx).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], EventPayload::StructureAnalyzed { .. }));
        assert!(matches!(out[1], EventPayload::ChapterParsed { .. }));
    }

    async fn test_context() -> WorkerContext {
        use chapterforge_core::{CancellationToken, EventBus};
        use chapterforge_storage::InMemoryStateStore;
        use std::sync::Arc;

        let bus = EventBus::default();
        bus.start().await;
        WorkerContext {
            bus,
            state_store: Arc::new(InMemoryStateStore::new()),
            cancellation: CancellationToken::new(),
        }
    }
}
