//! Local inference backend using Ollama

use super::streaming::{forward_body, StreamChunk};
use super::sse::WireFormat;
use super::{
    ApiError, BackendEndpoint, ChatRequest, ChatResponse, InferenceBackend, TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Configuration for the local Ollama backend
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Ollama server URL
    pub url: String,
    /// Chat model (e.g., "llama3.1", "qwen3:4b")
    pub model: String,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// How long Ollama keeps the model loaded between requests
    pub keep_alive: String,
    /// Model used for document embeddings
    pub embedding_model: String,
    /// Timeout for non-streaming requests
    pub request_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "hoangquan456/qwen3-nothink:4b".to_string(),
            temperature: Some(0.7),
            keep_alive: "10m".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Chat client for a loopback Ollama server
pub struct OllamaBackend {
    config: OllamaConfig,
    endpoint: BackendEndpoint,
    client: Client,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let endpoint = BackendEndpoint::local(config.url.trim_end_matches('/'), &config.model);

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.address, path)
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut messages = Vec::new();

        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }

        for msg in &request.messages {
            messages.push(json!({ "role": msg.role.as_str(), "content": msg.content }));
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
            "keep_alive": self.config.keep_alive,
        });

        let mut options = serde_json::Map::new();
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        body
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, body))
        }
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ApiError> {
        let body = self.build_body(&request, false);

        let response = self
            .client
            .post(self.url("/api/chat"))
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?;
        let json: Value = Self::ensure_success(response).await?.json().await?;

        if let Some(err) = json["error"].as_str() {
            return Err(ApiError::Provider(err.to_string()));
        }

        let content = json["message"]["content"]
            .as_str()
            .ok_or_else(|| ApiError::Provider("No message content in response".to_string()))?
            .to_string();

        Ok(ChatResponse {
            content,
            usage: TokenUsage::new(
                json["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                json["eval_count"].as_u64().unwrap_or(0) as u32,
            ),
            model: json["model"]
                .as_str()
                .unwrap_or(&self.config.model)
                .to_string(),
            truncated: json["done_reason"].as_str() == Some("length"),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<StreamChunk>, ApiError> {
        let body = self.build_body(&request, true);

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await?;

        Ok(forward_body(
            Self::ensure_success(response).await?.bytes_stream(),
            WireFormat::Ollama,
        ))
    }

    async fn probe(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        debug!(url = %self.endpoint.address, "Local backend reachable");
        Ok(())
    }

    fn name(&self) -> &str {
        "Ollama"
    }
}

/// Produces embedding vectors for text
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}

#[async_trait]
impl Embedder for OllamaBackend {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.config.embedding_model,
            "input": inputs,
            "keep_alive": self.config.keep_alive,
        });

        let response = self
            .client
            .post(self.url("/api/embed"))
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?;

        #[derive(Deserialize)]
        struct EmbedResponse {
            embeddings: Vec<Vec<f32>>,
        }

        let parsed: EmbedResponse = Self::ensure_success(response).await?.json().await?;

        if parsed.embeddings.len() != inputs.len() {
            return Err(ApiError::Provider(format!(
                "Expected {} embeddings, got {}",
                inputs.len(),
                parsed.embeddings.len()
            )));
        }

        Ok(parsed.embeddings)
    }
}
