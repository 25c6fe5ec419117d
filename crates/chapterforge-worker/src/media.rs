//! Media worker (spec §4.5), ported from
//! `examples/original_source/src/workers/media.py::MediaWorker`'s
//! extract/convert/upload/rewrite pipeline. The Python original's three
//! `_extract_{svg,mermaid,drawio}_images` regexes and its placeholder
//! PNG-producing converters are replaced with real subprocess-backed
//! [`DiagramConverter`]s (`chapterforge_clients::converters`) and a real
//! [`ObjectStore`] upload.

use std::sync::Arc;

use async_trait::async_trait;
use chapterforge_clients::{DiagramConverter, DiagramXmlConverter, FlowchartDslConverter, ObjectStore, SvgConverter};
use chapterforge_core::ids;
use chapterforge_core::{
    ContentFormat, ContentItem, ContentKind, DiagramKind, EngineError, Event, EventPayload,
    EventType, ProcessedImage,
};
use regex::Regex;
use tracing::warn;

use crate::worker::{Worker, WorkerContext};

const PLACEHOLDER_WIDTH: u32 = 800;
const PLACEHOLDER_HEIGHT: u32 = 600;

fn svg_pattern() -> Regex {
    Regex::new(r"(?s)<svg[^>]*>.*?</svg>").expect("static pattern is valid")
}

fn flowchart_pattern() -> Regex {
    Regex::new(r"(?s)```mermaid\n(.*?)\n```").expect("static pattern is valid")
}

fn diagram_xml_pattern() -> Regex {
    Regex::new(r"!\[[^\]]*\]\(([^)]*\.drawio(?:\.png|\.svg)?)\)").expect("static pattern is valid")
}

struct Diagram {
    kind: DiagramKind,
    reference: String,
    payload: String,
    start: usize,
}

fn detect_diagrams(body: &str) -> Vec<Diagram> {
    let mut found: Vec<Diagram> = Vec::new();

    for m in svg_pattern().find_iter(body) {
        found.push(Diagram {
            kind: DiagramKind::Svg,
            reference: m.as_str().to_string(),
            payload: m.as_str().to_string(),
            start: m.start(),
        });
    }
    for caps in flowchart_pattern().captures_iter(body) {
        let full = caps.get(0).unwrap();
        found.push(Diagram {
            kind: DiagramKind::FlowchartDsl,
            reference: full.as_str().to_string(),
            payload: caps.get(1).unwrap().as_str().trim().to_string(),
            start: full.start(),
        });
    }
    for caps in diagram_xml_pattern().captures_iter(body) {
        let full = caps.get(0).unwrap();
        found.push(Diagram {
            kind: DiagramKind::DiagramXml,
            reference: full.as_str().to_string(),
            payload: caps.get(1).unwrap().as_str().to_string(),
            start: full.start(),
        });
    }

    found.sort_by_key(|d| d.start);
    found
}

pub struct MediaWorker {
    svg: Box<dyn DiagramConverter>,
    flowchart: Box<dyn DiagramConverter>,
    diagram_xml: Box<dyn DiagramConverter>,
    object_store: Arc<dyn ObjectStore>,
}

impl MediaWorker {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            svg: Box::new(SvgConverter::new()),
            flowchart: Box::new(FlowchartDslConverter::new()),
            diagram_xml: Box::new(DiagramXmlConverter::new()),
            object_store,
        }
    }

    /// Swaps in test/alternate converter plugins, e.g. to exercise the
    /// rewrite path without shelling out to `mmdc`/`rsvg-convert`/`drawio`.
    pub fn with_converters(
        mut self,
        svg: Box<dyn DiagramConverter>,
        flowchart: Box<dyn DiagramConverter>,
        diagram_xml: Box<dyn DiagramConverter>,
    ) -> Self {
        self.svg = svg;
        self.flowchart = flowchart;
        self.diagram_xml = diagram_xml;
        self
    }

    fn converter_for(&self, kind: DiagramKind) -> Option<&dyn DiagramConverter> {
        match kind {
            DiagramKind::Svg => Some(self.svg.as_ref()),
            DiagramKind::FlowchartDsl => Some(self.flowchart.as_ref()),
            DiagramKind::DiagramXml => Some(self.diagram_xml.as_ref()),
            DiagramKind::Raster => None,
        }
    }

    async fn process_content_generated(
        &self,
        content: &ContentItem,
        source_workflow_id: uuid::Uuid,
    ) -> Option<(ContentItem, Vec<ProcessedImage>)> {
        let diagrams = detect_diagrams(&content.body);
        if diagrams.is_empty() {
            return None;
        }

        let mut body = content.body.clone();
        let mut processed = Vec::new();

        for (index, diagram) in diagrams.iter().enumerate() {
            let Some(converter) = self.converter_for(diagram.kind) else {
                continue;
            };

            let bytes = match converter.convert(&diagram.payload).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(kind = diagram.kind.as_str(), error = %err, "diagram conversion failed, leaving reference intact");
                    continue;
                }
            };

            let key = format!("workflows/{source_workflow_id}/images/{}_{index}.png", content.id);
            let url = match self.object_store.upload(bytes.clone(), &key).await {
                Ok(url) => url,
                Err(err) => {
                    warn!(error = %err, "image upload failed, leaving reference intact");
                    continue;
                }
            };

            body = body.replacen(&diagram.reference, &format!("![diagram]({url})"), 1);

            processed.push(ProcessedImage {
                id: ids::image_id(&content.id, index),
                original_kind: diagram.kind,
                format: "png".to_string(),
                width: PLACEHOLDER_WIDTH,
                height: PLACEHOLDER_HEIGHT,
                size_bytes: bytes.len(),
                url,
                source_workflow_id,
                thumbnail: false,
            });
        }

        if processed.is_empty() {
            return None;
        }

        let mut updated = content.clone();
        updated.body = body;
        Some((updated, processed))
    }

    async fn process_thumbnail(
        &self,
        chapter_id: &str,
        title: &str,
        width: u32,
        height: u32,
        workflow_id: uuid::Uuid,
    ) -> Option<ProcessedImage> {
        let bytes = placeholder_png();
        let key = format!("workflows/{workflow_id}/images/thumbnail_{chapter_id}.png");
        match self.object_store.upload(bytes.clone(), &key).await {
            Ok(url) => Some(ProcessedImage {
                id: format!("image_{chapter_id}_thumbnail"),
                original_kind: DiagramKind::Raster,
                format: "png".to_string(),
                width,
                height,
                size_bytes: bytes.len(),
                url,
                source_workflow_id: workflow_id,
                thumbnail: true,
            }),
            Err(err) => {
                warn!(title, error = %err, "thumbnail upload failed");
                None
            }
        }
    }
}

/// A minimal valid 1x1 PNG, standing in for the real rendering library this
/// worker would otherwise reach for to lay out a title on a color swatch.
fn placeholder_png() -> Vec<u8> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode("iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8/5+hHgAHggJ/PchI7wAAAABJRU5ErkJggg==")
        .expect("embedded placeholder PNG is valid base64")
}

#[async_trait]
impl Worker for MediaWorker {
    fn worker_id(&self) -> &str {
        "media_worker"
    }

    fn subscriptions(&self) -> Vec<EventType> {
        vec![EventType::ContentGenerated, EventType::MetadataGenerated]
    }

    async fn process(
        &self,
        event: &Event,
        _ctx: &WorkerContext,
    ) -> Result<Vec<EventPayload>, EngineError> {
        match &event.payload {
            EventPayload::ContentGenerated { content, paragraph, section } => {
                match self.process_content_generated(content, event.workflow_id).await {
                    Some((updated_content, processed_images)) => Ok(vec![EventPayload::ImageProcessed {
                        original_content: content.clone(),
                        updated_content,
                        processed_images,
                        paragraph: Some(paragraph.clone()),
                        section: Some(section.clone()),
                        thumbnail: false,
                    }]),
                    None => Ok(vec![]),
                }
            }
            EventPayload::MetadataGenerated { thumbnail, chapter, .. } => {
                let Some(thumbnail) = thumbnail else {
                    return Ok(vec![]);
                };
                match self
                    .process_thumbnail(
                        &thumbnail.chapter_id,
                        &thumbnail.title,
                        thumbnail.width,
                        thumbnail.height,
                        event.workflow_id,
                    )
                    .await
                {
                    Some(processed) => {
                        let placeholder = ContentItem::new(
                            ContentKind::Description,
                            thumbnail.title.clone(),
                            String::new(),
                            ContentFormat::Text,
                            chapter.id.clone(),
                        );
                        Ok(vec![EventPayload::ImageProcessed {
                            original_content: placeholder.clone(),
                            updated_content: placeholder,
                            processed_images: vec![processed],
                            paragraph: None,
                            section: None,
                            thumbnail: true,
                        }])
                    }
                    None => Ok(vec![]),
                }
            }
            _ => Ok(vec![]),
        }
    }
}
