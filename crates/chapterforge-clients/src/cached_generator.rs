//! Cache-wrapped generator client (spec §4.4): before issuing a request,
//! compute the hash key and check the shared [`Cache`]; on a miss, delegate
//! and populate it.

use std::sync::Arc;

use async_trait::async_trait;
use chapterforge_core::EngineError;
use chapterforge_storage::Cache;

use crate::cache_key::{generation_cache_key, GenerationCacheKeyInput};
use crate::generator::{GenerationRequest, GenerationResponse, GeneratorClient};

pub struct CachedGeneratorClient<C: GeneratorClient> {
    inner: C,
    cache: Arc<Cache<String, GenerationResponse>>,
}

impl<C: GeneratorClient> CachedGeneratorClient<C> {
    pub fn new(inner: C, cache: Arc<Cache<String, GenerationResponse>>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<C: GeneratorClient> GeneratorClient for CachedGeneratorClient<C> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, EngineError> {
        let key = generation_cache_key(&GenerationCacheKeyInput {
            prompt: &request.prompt,
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            images_hash: request.images_hash.as_deref(),
        });

        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let response = self.inner.generate(request).await?;
        self.cache.put(key, response.clone(), None).await;
        Ok(response)
    }
}
