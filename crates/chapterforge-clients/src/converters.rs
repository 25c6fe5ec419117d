//! Diagram-to-raster converter plugins (spec §4.5/§6), grounded on the
//! subprocess-delegation shape of `examples/original_source/generators/image/
//! {svg,mermaid,drawio}_processor.py` — each processor there shells out to an
//! external renderer (`cairosvg`/Inkscape, `mmdc`, the draw.io CLI) rather than
//! reimplementing rasterization. We keep that shape and swap `subprocess.run`
//! for `tokio::process::Command`.

use async_trait::async_trait;
use chapterforge_core::EngineError;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Opaque plugin contract: `convert(kind, text_content) -> bytes | error`.
#[async_trait]
pub trait DiagramConverter: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn convert(&self, text_content: &str) -> Result<Vec<u8>, EngineError>;
}

async fn run_pipeline(
    kind: &'static str,
    binary: &str,
    args: &[&str],
    stdin_content: &str,
) -> Result<Vec<u8>, EngineError> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| {
            EngineError::converter_failure(kind, format!("{binary} not available: {e}"))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(stdin_content.as_bytes())
            .await
            .map_err(|e| EngineError::converter_failure(kind, format!("write to {binary}: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| EngineError::converter_failure(kind, format!("{binary} exited abnormally: {e}")))?;

    if !output.status.success() {
        return Err(EngineError::converter_failure(
            kind,
            format!(
                "{binary} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }

    Ok(output.stdout)
}

/// Inline `<svg>` blocks, rasterized via `rsvg-convert` (the Rust-ecosystem
/// analogue of the Python processor's cairosvg/Inkscape fallback chain).
pub struct SvgConverter {
    binary: String,
}

impl SvgConverter {
    pub fn new() -> Self {
        Self {
            binary: "rsvg-convert".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SvgConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiagramConverter for SvgConverter {
    fn kind(&self) -> &'static str {
        "svg"
    }

    async fn convert(&self, text_content: &str) -> Result<Vec<u8>, EngineError> {
        run_pipeline(
            self.kind(),
            &self.binary,
            &["--format", "png", "--output", "/dev/stdout"],
            text_content,
        )
        .await
    }
}

/// Fenced flowchart-DSL blocks, rasterized via the mermaid CLI (`mmdc`).
pub struct FlowchartDslConverter {
    binary: String,
}

impl FlowchartDslConverter {
    pub fn new() -> Self {
        Self {
            binary: "mmdc".to_string(),
        }
    }
}

impl Default for FlowchartDslConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiagramConverter for FlowchartDslConverter {
    fn kind(&self) -> &'static str {
        "flowchart_dsl"
    }

    async fn convert(&self, text_content: &str) -> Result<Vec<u8>, EngineError> {
        run_pipeline(
            self.kind(),
            &self.binary,
            &["-i", "-", "-o", "-", "-e", "png"],
            text_content,
        )
        .await
    }
}

/// `diagram_xml`-family image references, rasterized via the draw.io
/// headless export CLI.
pub struct DiagramXmlConverter {
    binary: String,
}

impl DiagramXmlConverter {
    pub fn new() -> Self {
        Self {
            binary: "drawio".to_string(),
        }
    }
}

impl Default for DiagramXmlConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiagramConverter for DiagramXmlConverter {
    fn kind(&self) -> &'static str {
        "diagram_xml"
    }

    async fn convert(&self, text_content: &str) -> Result<Vec<u8>, EngineError> {
        run_pipeline(
            self.kind(),
            &self.binary,
            &["--export", "--format", "png", "--output", "-", "-"],
            text_content,
        )
        .await
    }
}
