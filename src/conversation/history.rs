//! Conversation history
//!
//! Bounded, ordered message log for a single conversation. The classifier
//! sees the most recent window of it on every turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Customer,
    Assistant,
}

/// A single message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn customer(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role: MessageRole::Customer,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: VecDeque<ConversationMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, message: ConversationMessage) {
        self.messages.push_back(message);
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    /// The `count` most recent messages, oldest first.
    pub fn recent_messages(&self, count: usize) -> Vec<ConversationMessage> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Drop everything except the last `keep_count` messages
    pub fn trim_to_recent(&mut self, keep_count: usize) {
        while self.messages.len() > keep_count {
            self.messages.pop_front();
        }
    }

    /// Plain-text transcript for LLM prompts
    pub fn format_transcript(messages: &[ConversationMessage]) -> String {
        let mut transcript = String::new();

        for msg in messages {
            let role = match msg.role {
                MessageRole::Customer => "Cliente",
                MessageRole::Assistant => "Assistente",
            };
            transcript.push_str(&format!("{}: {}\n", role, msg.content));
        }

        transcript
    }
}
