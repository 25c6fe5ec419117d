//! Anthropic Messages-API-shaped generator client, grounded directly on the
//! header set (`x-api-key`, `anthropic-version`) and POST/status-check shape
//! of `crates/anthropic/src/driver.rs::AnthropicLlmDriver`, rebuilt on the
//! shared [`ServiceClient`] and reduced to single-shot (non-streaming)
//! request/response since the AI worker never consumes a token stream.

use std::time::Duration;

use async_trait::async_trait;
use chapterforge_clients::{GenerationRequest, GenerationResponse, GeneratorClient, ServiceClient};
use chapterforge_core::EngineError;
use chapterforge_reliability::RetryPolicy;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicGeneratorClient {
    client: ServiceClient,
    model: String,
}

impl AnthropicGeneratorClient {
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
            "anthropic",
            requests_per_minute,
            Duration::from_secs(30),
            retry_policy,
        )
        .with_auth_header("x-api-key", api_key.into())
        .with_auth_header("anthropic-version", ANTHROPIC_VERSION);

        Self {
            client,
            model: model.into(),
        }
    }

    pub async fn stats(&self) -> chapterforge_clients::ClientStats {
        self.client.stats()
    }
}

impl std::fmt::Debug for AnthropicGeneratorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGeneratorClient")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl GeneratorClient for AnthropicGeneratorClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, EngineError> {
        let body = MessagesRequest {
            model: request.model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response: MessagesResponse = self
            .client
            .call_json(reqwest::Method::POST, "/messages", Some(&body))
            .await?;

        let text = response
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| EngineError::validation("anthropic response had no content blocks"))?;

        Ok(GenerationResponse {
            text,
            model: response.model,
            prompt_tokens: response.usage.as_ref().map(|u| u.input_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.output_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn generate_extracts_first_content_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "claude-test",
                "content": [{"type": "text", "text": "hello world"}],
                "usage": {"input_tokens": 10, "output_tokens": 5}
            })))
            .mount(&server)
            .await;

        let client = AnthropicGeneratorClient::with_base_url("test-key", "claude-test", server.uri(), 1000);
        let response = client
            .generate(&GenerationRequest {
                prompt: "say hi".into(),
                model: "claude-test".into(),
                max_tokens: 64,
                temperature: 0.5,
                images_hash: None,
            })
            .await
            .unwrap();

        assert_eq!(response.text, "hello world");
        assert_eq!(response.completion_tokens, Some(5));
    }

    #[tokio::test]
    async fn rate_limited_status_maps_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = AnthropicGeneratorClient::with_retry_policy(
            "test-key",
            "claude-test",
            server.uri(),
            1000,
            RetryPolicy::no_retry(),
        );
        let result = client
            .generate(&GenerationRequest {
                prompt: "say hi".into(),
                model: "claude-test".into(),
                max_tokens: 64,
                temperature: 0.5,
                images_hash: None,
            })
            .await;
        match result {
            Err(err) => assert!(err.is_retryable()),
            Ok(_) => panic!("expected an error"),
        }
    }
}
