//! Managed cloud inference backend
//!
//! Speaks either the Anthropic Messages API or an OpenAI-compatible chat
//! completions API. Both require an API key.

use super::streaming::{forward_body, StreamChunk};
use super::sse::WireFormat;
use super::{
    ApiError, ApiKey, BackendEndpoint, ChatRequest, ChatResponse, InferenceBackend, Role,
    TokenUsage,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Anthropic,
    OpenAI,
}

impl CloudProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            CloudProvider::Anthropic => "https://api.anthropic.com/v1",
            CloudProvider::OpenAI => "https://api.openai.com/v1",
        }
    }

    /// Environment variable conventionally holding this provider's key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            CloudProvider::Anthropic => "ANTHROPIC_API_KEY",
            CloudProvider::OpenAI => "OPENAI_API_KEY",
        }
    }

    fn wire_format(&self) -> WireFormat {
        match self {
            CloudProvider::Anthropic => WireFormat::Anthropic,
            CloudProvider::OpenAI => WireFormat::OpenAI,
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProvider::Anthropic => write!(f, "Anthropic"),
            CloudProvider::OpenAI => write!(f, "OpenAI"),
        }
    }
}

/// Configuration for the cloud backend
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub provider: CloudProvider,
    pub api_key: Option<ApiKey>,
    /// Base URL without the trailing resource path
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Timeout for non-streaming requests
    pub request_timeout: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: CloudProvider::Anthropic,
            api_key: None,
            base_url: CloudProvider::Anthropic.default_base_url().to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: Some(0.7),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Client for the managed cloud model service
pub struct CloudBackend {
    config: CloudConfig,
    endpoint: BackendEndpoint,
    client: Client,
}

impl CloudBackend {
    pub fn new(config: CloudConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let endpoint = BackendEndpoint::cloud(
            config.base_url.trim_end_matches('/'),
            config.api_key.clone(),
            &config.model,
        );

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    fn api_key(&self) -> Result<&ApiKey, ApiError> {
        self.endpoint
            .credentials
            .as_ref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ApiError::Auth(format!(
                    "No API key configured for {} (set {} or cloud.api_key)",
                    self.config.provider,
                    self.config.provider.api_key_env()
                ))
            })
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let key = self.api_key()?;
        Ok(match self.config.provider {
            CloudProvider::Anthropic => builder
                .header("x-api-key", key.expose())
                .header("anthropic-version", ANTHROPIC_VERSION),
            CloudProvider::OpenAI => builder.bearer_auth(key.expose()),
        })
    }

    fn chat_url(&self) -> String {
        match self.config.provider {
            CloudProvider::Anthropic => format!("{}/messages", self.endpoint.address),
            CloudProvider::OpenAI => format!("{}/chat/completions", self.endpoint.address),
        }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        let temperature = request.temperature.or(self.config.temperature);

        let mut body = match self.config.provider {
            CloudProvider::Anthropic => {
                // System prompt travels outside the message list
                let messages: Vec<Value> = request
                    .messages
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                    .collect();

                let mut body = json!({
                    "model": self.config.model,
                    "messages": messages,
                    "max_tokens": max_tokens,
                });
                if let Some(system) = &request.system {
                    body["system"] = json!(system);
                }
                body
            }
            CloudProvider::OpenAI => {
                let mut messages = Vec::new();
                if let Some(system) = &request.system {
                    messages.push(json!({ "role": "system", "content": system }));
                }
                messages.extend(
                    request
                        .messages
                        .iter()
                        .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
                );

                json!({
                    "model": self.config.model,
                    "messages": messages,
                    "max_tokens": max_tokens,
                })
            }
        };

        if let Some(temp) = temperature {
            body["temperature"] = json!(temp);
        }
        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    fn parse_response(&self, json: Value) -> Result<ChatResponse, ApiError> {
        match self.config.provider {
            CloudProvider::Anthropic => {
                let content: String = json["content"]
                    .as_array()
                    .map(|blocks| {
                        blocks
                            .iter()
                            .filter_map(|b| b["text"].as_str())
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .ok_or_else(|| ApiError::Provider("No content in response".to_string()))?;

                Ok(ChatResponse {
                    content,
                    usage: TokenUsage::new(
                        json["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                        json["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                    ),
                    model: json["model"]
                        .as_str()
                        .unwrap_or(&self.config.model)
                        .to_string(),
                    truncated: json["stop_reason"].as_str() == Some("max_tokens"),
                })
            }
            CloudProvider::OpenAI => {
                let content = json["choices"][0]["message"]["content"]
                    .as_str()
                    .ok_or_else(|| ApiError::Provider("No content in response".to_string()))?
                    .to_string();

                Ok(ChatResponse {
                    content,
                    usage: TokenUsage::new(
                        json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                        json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
                    ),
                    model: json["model"]
                        .as_str()
                        .unwrap_or(&self.config.model)
                        .to_string(),
                    truncated: json["choices"][0]["finish_reason"].as_str() == Some("length"),
                })
            }
        }
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
impl InferenceBackend for CloudBackend {
    fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ApiError> {
        let body = self.build_body(&request, false);

        let response = self
            .authorized(self.client.post(self.chat_url()))?
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?;
        let json: Value = Self::ensure_success(response).await?.json().await?;

        self.parse_response(json)
    }

    async fn stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<StreamChunk>, ApiError> {
        let body = self.build_body(&request, true);

        let response = self
            .authorized(self.client.post(self.chat_url()))?
            .json(&body)
            .send()
            .await?;

        Ok(forward_body(
            Self::ensure_success(response).await?.bytes_stream(),
            self.config.provider.wire_format(),
        ))
    }

    async fn probe(&self) -> Result<(), ApiError> {
        let url = format!("{}/models", self.endpoint.address);

        let response = self
            .authorized(self.client.get(&url))?
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Self::ensure_success(response).await?;

        debug!(provider = %self.config.provider, "Cloud backend reachable and key accepted");
        Ok(())
    }

    fn name(&self) -> &str {
        match self.config.provider {
            CloudProvider::Anthropic => "Anthropic",
            CloudProvider::OpenAI => "OpenAI",
        }
    }
}
