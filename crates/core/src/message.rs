//! Transcript message types

use serde::{Deserialize, Serialize};

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One finalized utterance in the conversation transcript.
///
/// Owned by the transcript aggregator; read-only to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Stable id: the response id for assistant messages,
    /// `user-{item_id}` for user messages.
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp_ms: u64,
}

impl TranscriptMessage {
    pub fn user(item_id: &str, content: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            id: format!("user-{item_id}"),
            role: Role::User,
            content: content.into(),
            timestamp_ms,
        }
    }

    pub fn assistant(
        response_id: impl Into<String>,
        content: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: response_id.into(),
            role: Role::Assistant,
            content: content.into(),
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_id_prefix() {
        let msg = TranscriptMessage::user("item_42", "hello", 10);
        assert_eq!(msg.id, "user-item_42");
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }
}
