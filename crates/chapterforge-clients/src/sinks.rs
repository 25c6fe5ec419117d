//! Opaque outbound collaborators (spec §6 "Sink contracts"), each built on
//! [`crate::service_client::ServiceClient`].

use async_trait::async_trait;
use chapterforge_core::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::service_client::ServiceClient;

/// `object_store.upload(bytes, key) -> url`
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, EngineError>;
}

/// `vcs.put_file(path, content, branch) -> ok`
#[async_trait]
pub trait VcsSink: Send + Sync {
    async fn put_file(&self, path: &str, content: &str, branch: &str) -> Result<(), EngineError>;
}

/// `chat.post(channel, text[, attachments]) -> ok`
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn post(
        &self,
        channel: &str,
        text: &str,
        attachments: Option<Vec<String>>,
    ) -> Result<(), EngineError>;
}

/// `kv_store.put/get/delete/expire/ttl/list/hash-ops`, used only by the
/// optional persistent state backend (spec §6).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<(), EngineError>;
    async fn get(&self, key: &str) -> Result<Option<Value>, EngineError>;
    async fn delete(&self, key: &str) -> Result<bool, EngineError>;
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, EngineError>;
    async fn ttl(&self, key: &str) -> Result<Option<i64>, EngineError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EngineError>;
    async fn hash_set(&self, key: &str, field: &str, value: Value) -> Result<(), EngineError>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Value>, EngineError>;
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    key: &'a str,
    #[serde(with = "base64_body")]
    bytes: &'a [u8],
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }
}

/// HTTP-backed object store, wired through the shared [`ServiceClient`].
pub struct HttpObjectStore {
    client: ServiceClient,
}

impl HttpObjectStore {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, EngineError> {
        let request = UploadRequest { key, bytes: &bytes };
        let response: UploadResponse = self
            .client
            .call_json(reqwest::Method::POST, "/objects", Some(&request))
            .await?;
        Ok(response.url)
    }
}

#[derive(Debug, Serialize)]
struct PutFileRequest<'a> {
    path: &'a str,
    content: &'a str,
    branch: &'a str,
}

/// HTTP-backed version-control sink.
pub struct HttpVcsSink {
    client: ServiceClient,
}

impl HttpVcsSink {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VcsSink for HttpVcsSink {
    async fn put_file(&self, path: &str, content: &str, branch: &str) -> Result<(), EngineError> {
        let request = PutFileRequest {
            path,
            content,
            branch,
        };
        let _: Value = self
            .client
            .call_json(reqwest::Method::PUT, "/files", Some(&request))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ChatPostRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<&'a [String]>,
}

/// HTTP-backed chat notification sink.
pub struct HttpChatSink {
    client: ServiceClient,
}

impl HttpChatSink {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatSink for HttpChatSink {
    async fn post(
        &self,
        channel: &str,
        text: &str,
        attachments: Option<Vec<String>>,
    ) -> Result<(), EngineError> {
        let request = ChatPostRequest {
            channel,
            text,
            attachments: attachments.as_deref(),
        };
        let _: Value = self
            .client
            .call_json(reqwest::Method::POST, "/chat.post", Some(&request))
            .await?;
        Ok(())
    }
}
