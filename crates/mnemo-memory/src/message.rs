//! Chat message types shared by the working-memory layer

use serde::{Deserialize, Serialize};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user
    User,
    /// The agent
    Assistant,
    /// System prompt / instruction
    System,
}

/// A single conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced the message
    pub role: MessageRole,

    /// Raw message text
    pub content: String,

    /// When the message was appended
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Primary intent detected for this message, if any
    pub intent: Option<String>,

    /// Entity surface forms extracted from the text
    pub entities: Vec<String>,
}

impl ChatMessage {
    /// Create a message with an explicit role
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            intent: None,
            entities: Vec::new(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}
