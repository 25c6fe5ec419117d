//! The common shape every LM generator client exposes to the AI worker
//! (spec §4.4/§4.7): one-shot request/response, independent of wire format.

use async_trait::async_trait;
use chapterforge_core::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Present only when the prompt references an embedded diagram/image.
    pub images_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Implemented once per LM backend (spec §4.7: "Specializations differ only
/// in base URL, auth scheme, request/response shape").
#[async_trait]
pub trait GeneratorClient: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, EngineError>;
}
