//! Cache-key derivation for LM generation requests (spec §4.4): a cryptographic
//! hash of `(prompt, model, max_tokens, temperature, optional images hash)`.

use sha2::{Digest, Sha256};

/// Parameters that determine whether two generation requests are cache-equivalent.
pub struct GenerationCacheKeyInput<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    pub images_hash: Option<&'a str>,
}

pub fn generation_cache_key(input: &GenerationCacheKeyInput<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.model.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.max_tokens.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(input.temperature.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(input.images_hash.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(prompt: &str) -> GenerationCacheKeyInput<'_> {
        GenerationCacheKeyInput {
            prompt,
            model: "gpt-x",
            max_tokens: 512,
            temperature: 0.7,
            images_hash: None,
        }
    }

    #[test]
    fn identical_inputs_produce_identical_keys() {
        assert_eq!(
            generation_cache_key(&input("hello")),
            generation_cache_key(&input("hello"))
        );
    }

    #[test]
    fn different_prompts_produce_different_keys() {
        assert_ne!(
            generation_cache_key(&input("hello")),
            generation_cache_key(&input("goodbye"))
        );
    }

    #[test]
    fn images_hash_participates_in_the_key() {
        let mut with_image = input("hello");
        with_image.images_hash = Some("abc123");
        assert_ne!(generation_cache_key(&input("hello")), generation_cache_key(&with_image));
    }
}
