//! Inference backend adapters
//!
//! Two interchangeable clients sit behind [`InferenceBackend`]: a local
//! Ollama server on the loopback interface and a managed cloud model API
//! that needs credentials. The router only ever talks to the trait.

mod cloud;
mod local;
mod request;
mod response;
mod sse;
mod streaming;

pub use cloud::{CloudBackend, CloudConfig, CloudProvider};
pub use local::{Embedder, OllamaBackend, OllamaConfig};
pub use request::{ChatRequest, Message, Role};
pub use response::{ChatResponse, TokenUsage};
pub use sse::{parse_stream_line, WireFormat};
pub use streaming::{StreamChunk, StreamEnd};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::router::ModelMode;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Quota exhausted: {0}")]
    Quota(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else {
            ApiError::Http(err)
        }
    }
}

impl ApiError {
    /// Map a non-success HTTP status and its body to an error
    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body)
        };

        match status.as_u16() {
            401 | 403 => ApiError::Auth(detail),
            402 | 429 => ApiError::Quota(detail),
            _ => ApiError::Provider(detail),
        }
    }
}

/// Credential passed to the cloud service. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Where a backend lives and which model it serves.
///
/// Built once at startup from configuration and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub kind: ModelMode,
    pub address: String,
    pub credentials: Option<ApiKey>,
    pub model: String,
}

impl BackendEndpoint {
    pub fn local(address: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: ModelMode::Local,
            address: address.into(),
            credentials: None,
            model: model.into(),
        }
    }

    pub fn cloud(
        address: impl Into<String>,
        credentials: Option<ApiKey>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            kind: ModelMode::Cloud,
            address: address.into(),
            credentials,
            model: model.into(),
        }
    }
}

/// A backend that can answer chat requests
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// The endpoint this backend was constructed for
    fn endpoint(&self) -> &BackendEndpoint;

    /// Send a request and wait for the whole answer
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ApiError>;

    /// Send a request and receive the answer as a stream of chunks.
    /// The receiver yields TextDelta chunks followed by Done or Error.
    /// Dropping the receiver aborts the transfer.
    async fn stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<StreamChunk>, ApiError>;

    /// Single reachability/credential check
    async fn probe(&self) -> Result<(), ApiError>;

    /// Human readable backend name
    fn name(&self) -> &str;
}
