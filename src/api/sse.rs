//! Line parser for streamed backend responses
//!
//! Handles three wire formats:
//! - Ollama: line-delimited JSON `{"message":{"content":"..."},"done":false}`
//! - Anthropic: `event: content_block_delta` / `data: {"delta":{"text":"..."}}`
//! - OpenAI-compatible: `data: {"choices":[{"delta":{"content":"..."}}]}`

use super::streaming::{StreamChunk, StreamEnd};
use super::TokenUsage;
use serde_json::Value;

/// Wire format of a streamed response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Ollama,
    Anthropic,
    OpenAI,
}

/// Parse one line of a streamed body into a chunk.
/// Returns None for lines that carry nothing (blank, comments, event names).
pub fn parse_stream_line(line: &str, format: WireFormat) -> Option<StreamChunk> {
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    match format {
        WireFormat::Ollama => parse_ollama(line),
        WireFormat::Anthropic => parse_anthropic(line),
        WireFormat::OpenAI => parse_openai(line),
    }
}

fn usage_from(value: &Value, prompt_key: &str, completion_key: &str) -> TokenUsage {
    TokenUsage::new(
        value[prompt_key].as_u64().unwrap_or(0) as u32,
        value[completion_key].as_u64().unwrap_or(0) as u32,
    )
}

fn parse_ollama(line: &str) -> Option<StreamChunk> {
    let json: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Some(StreamChunk::Error(format!("Malformed stream line: {}", e))),
    };

    if let Some(err) = json["error"].as_str() {
        return Some(StreamChunk::Error(err.to_string()));
    }

    if let Some(content) = json["message"]["content"].as_str() {
        if !content.is_empty() {
            return Some(StreamChunk::TextDelta(content.to_string()));
        }
    }

    if json["done"].as_bool() == Some(true) {
        return Some(StreamChunk::Done(StreamEnd::new(
            usage_from(&json, "prompt_eval_count", "eval_count"),
            json["done_reason"].as_str() == Some("length"),
        )));
    }

    None
}

fn parse_anthropic(line: &str) -> Option<StreamChunk> {
    if line.starts_with("event:") {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim();

    let json: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(StreamChunk::Error(format!("Malformed stream line: {}", e))),
    };

    match json["type"].as_str().unwrap_or("") {
        "content_block_delta" => json["delta"]["text"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(|t| StreamChunk::TextDelta(t.to_string())),
        // Input tokens arrive up front, output tokens with the stop reason
        "message_start" => Some(StreamChunk::Usage(usage_from(
            &json["message"]["usage"],
            "input_tokens",
            "output_tokens",
        ))),
        "message_delta" => Some(StreamChunk::Done(StreamEnd::new(
            usage_from(&json["usage"], "input_tokens", "output_tokens"),
            json["delta"]["stop_reason"].as_str() == Some("max_tokens"),
        ))),
        "message_stop" => Some(StreamChunk::Done(StreamEnd::default())),
        "error" => Some(StreamChunk::Error(
            json["error"]["message"]
                .as_str()
                .unwrap_or("Unknown error")
                .to_string(),
        )),
        _ => None,
    }
}

fn parse_openai(line: &str) -> Option<StreamChunk> {
    let data = line.strip_prefix("data:")?.trim();

    if data == "[DONE]" {
        return Some(StreamChunk::Done(StreamEnd::default()));
    }

    let json: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(StreamChunk::Error(format!("Malformed stream line: {}", e))),
    };

    if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
        if !content.is_empty() {
            return Some(StreamChunk::TextDelta(content.to_string()));
        }
    }

    match json["choices"][0]["finish_reason"].as_str() {
        Some(reason @ ("stop" | "length")) => Some(StreamChunk::Done(StreamEnd::new(
            usage_from(&json["usage"], "prompt_tokens", "completion_tokens"),
            reason == "length",
        ))),
        _ => None,
    }
}
