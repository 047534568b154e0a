//! Chat response structures

use serde::{Deserialize, Serialize};

/// Response from an inference backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated content
    pub content: String,

    /// Token usage statistics
    pub usage: TokenUsage,

    /// Model that generated the response
    pub model: String,

    /// Whether the response hit the token limit
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens in the response
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Combine with counts from a later stream event; counts are cumulative
    pub fn merge(self, other: TokenUsage) -> Self {
        Self::new(
            self.prompt_tokens.max(other.prompt_tokens),
            self.completion_tokens.max(other.completion_tokens),
        )
    }
}
