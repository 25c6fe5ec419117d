//! Document hierarchy and derived-artifact types (spec §3, §6).

use serde::{Deserialize, Serialize};

use crate::ids;

/// Raw input handed to the pipeline by `WORKFLOW_STARTED` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParagraphKind {
    Paragraph,
    List,
    Quote,
    Code,
    Short,
    Heading3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: String,
    pub index: usize,
    pub content: String,
    pub kind: ParagraphKind,
    pub word_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub level: u8,
    pub content: String,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub level: u8,
    pub content: String,
    pub sections: Vec<Section>,
}

/// Whole-document structure, as emitted by `STRUCTURE_ANALYZED` (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub title: String,
    pub chapters: Vec<Chapter>,
    pub total_length: usize,
}

/// Shallow structural analysis the AI worker attaches to a section (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralAnalysis {
    pub content_type: String,
    pub complexity_level: String,
    pub key_concepts: Vec<String>,
    pub estimated_reading_time_seconds: u32,
    pub paragraph_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Article,
    Script,
    ScriptStructured,
    MicroPost,
    Description,
}

impl ContentKind {
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Article,
        ContentKind::Script,
        ContentKind::ScriptStructured,
        ContentKind::MicroPost,
        ContentKind::Description,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Script => "script",
            Self::ScriptStructured => "script_structured",
            Self::MicroPost => "micro_post",
            Self::Description => "description",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    Markdown,
    Text,
    Structured,
}

/// A single recognized structured-script action (spec §6). The set of
/// `name` values is closed: `author-speak-before`, `file-explorer-create-file`,
/// `file-explorer-open-file`, `editor-type`, `editor-enter`, `editor-space`,
/// `editor-save`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptAction {
    pub name: String,
    pub value: String,
}

pub const SCRIPT_ACTION_NAMES: [&str; 7] = [
    "author-speak-before",
    "file-explorer-create-file",
    "file-explorer-open-file",
    "editor-type",
    "editor-enter",
    "editor-space",
    "editor-save",
];

/// The upper bound on micro-post length, enforced at construction (spec §3 invariant).
pub const MICRO_POST_MAX_CHARS: usize = 280;

/// Result of one generation task (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub word_count: Option<u32>,
    pub character_count: Option<u32>,
    pub estimated_duration_seconds: Option<u32>,
    pub format: ContentFormat,
    pub source_paragraph_id: String,
    /// Whether the body was truncated to satisfy `MICRO_POST_MAX_CHARS`.
    pub truncated: bool,
}

impl ContentItem {
    pub fn new(
        kind: ContentKind,
        title: impl Into<String>,
        body: impl Into<String>,
        format: ContentFormat,
        source_paragraph_id: impl Into<String>,
    ) -> Self {
        let source_paragraph_id = source_paragraph_id.into();
        let mut body = body.into();
        let mut truncated = false;

        if kind == ContentKind::MicroPost && body.chars().count() > MICRO_POST_MAX_CHARS {
            body = body.chars().take(MICRO_POST_MAX_CHARS).collect();
            truncated = true;
        }

        let word_count = Some(body.split_whitespace().count() as u32);
        let character_count = Some(body.chars().count() as u32);

        Self {
            id: ids::content_item_id(&source_paragraph_id, kind.as_str()),
            kind,
            title: title.into(),
            body,
            word_count,
            character_count,
            estimated_duration_seconds: None,
            format,
            source_paragraph_id,
            truncated,
        }
    }

    pub fn with_estimated_duration(mut self, seconds: u32) -> Self {
        self.estimated_duration_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramKind {
    Svg,
    FlowchartDsl,
    DiagramXml,
    Raster,
}

impl DiagramKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::FlowchartDsl => "flowchart_dsl",
            Self::DiagramXml => "diagram_xml",
            Self::Raster => "raster",
        }
    }
}

/// A rasterized diagram, post-conversion and post-upload (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub id: String,
    pub original_kind: DiagramKind,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
    pub url: String,
    pub source_workflow_id: uuid::Uuid,
    pub thumbnail: bool,
}

/// Metadata generated for a chapter (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterMetadata {
    pub chapter_id: String,
    pub title: String,
    pub section_count: usize,
    pub total_paragraphs: usize,
    pub estimated_reading_time_seconds: u32,
    pub difficulty: String,
}

/// A request to render a placeholder thumbnail (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailRequest {
    pub chapter_id: String,
    pub title: String,
    pub style: String,
    pub color_scheme: String,
    pub width: u32,
    pub height: u32,
}
