//! OpenAI chat-completions-shaped generator client, built on the shared
//! [`ServiceClient`] (spec §4.7) the way `crates/anthropic/src/driver.rs`
//! built its Anthropic driver on a raw `reqwest::Client` — header injection,
//! POST, status check — but delegated to the common base instead of hand-rolled.

use std::time::Duration;

use async_trait::async_trait;
use chapterforge_clients::{GenerationRequest, GenerationResponse, GeneratorClient, ServiceClient};
use chapterforge_core::EngineError;
use chapterforge_reliability::RetryPolicy;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiGeneratorClient {
    client: ServiceClient,
    model: String,
}

impl OpenAiGeneratorClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, requests_per_minute: u32) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL, requests_per_minute)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        requests_per_minute: u32,
    ) -> Self {
        Self::with_retry_policy(
            api_key,
            model,
            base_url,
            requests_per_minute,
            RetryPolicy::exponential(),
        )
    }

    pub fn with_retry_policy(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        requests_per_minute: u32,
        retry_policy: RetryPolicy,
    ) -> Self {
        let client = ServiceClient::new(
            base_url,
            "openai",
            requests_per_minute,
            Duration::from_secs(30),
            retry_policy,
        )
        .with_auth_header("Authorization", format!("Bearer {}", api_key.into()));

        Self {
            client,
            model: model.into(),
        }
    }

    pub async fn stats(&self) -> chapterforge_clients::ClientStats {
        self.client.stats()
    }
}

impl std::fmt::Debug for OpenAiGeneratorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGeneratorClient")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl GeneratorClient for OpenAiGeneratorClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, EngineError> {
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response: ChatCompletionResponse = self
            .client
            .call_json(reqwest::Method::POST, "/chat/completions", Some(&body))
            .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| EngineError::validation("openai response had no choices"))?;

        Ok(GenerationResponse {
            text,
            model: response.model,
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}
