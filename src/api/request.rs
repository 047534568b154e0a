//! Chat request structures

use serde::{Deserialize, Serialize};

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request forwarded to whichever backend the router selects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// System prompt/instructions
    pub system: Option<String>,

    /// Conversation so far, ending with the pending user message
    pub messages: Vec<Message>,

    /// Override for the backend's response token limit
    pub max_tokens: Option<u32>,

    /// Override for the backend's sampling temperature
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Insert prior turns ahead of the pending message
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        let pending = std::mem::take(&mut self.messages);
        self.messages = history;
        self.messages.extend(pending);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// The last user message, i.e. the pending turn
    pub fn pending_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Whether the pending turn carries any text
    pub fn has_content(&self) -> bool {
        self.pending_content()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_goes_before_pending() {
        let request = ChatRequest::new("now").with_history(vec![
            Message::user("before"),
            Message::assistant("reply"),
        ]);

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].content, "before");
        assert_eq!(request.pending_content(), Some("now"));
    }

    #[test]
    fn test_blank_content() {
        assert!(!ChatRequest::new("   ").has_content());
        assert!(!ChatRequest::default().has_content());
        assert!(ChatRequest::new("status?").has_content());
    }
}
