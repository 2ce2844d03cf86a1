//! Unified message types.
//!
//! Every platform codec normalizes decoded wire payloads into [`Message`]
//! values, which are handed to the caller-supplied [`Sink`] exactly once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single normalized record from a barrage stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// A chat line from a viewer.
    Chat {
        /// Platform identifier (e.g. "douyu")
        site: String,
        /// Platform room id
        room: String,
        /// Display name of the sender
        sender: String,
        /// Message text
        text: String,
    },
    /// Any other decoded record, carried raw.
    Other {
        site: String,
        room: String,
        /// Raw payload as text (lossy for binary payloads)
        payload: String,
    },
}

impl Message {
    /// Create a chat message.
    pub fn chat(
        site: impl Into<String>,
        room: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::Chat {
            site: site.into(),
            room: room.into(),
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Create a non-chat message carrying the raw payload.
    pub fn other(
        site: impl Into<String>,
        room: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::Other {
            site: site.into(),
            room: room.into(),
            payload: payload.into(),
        }
    }

    /// Whether this is a chat line.
    pub fn is_chat(&self) -> bool {
        matches!(self, Self::Chat { .. })
    }

    /// Platform identifier.
    pub fn site(&self) -> &str {
        match self {
            Self::Chat { site, .. } | Self::Other { site, .. } => site,
        }
    }

    /// Platform room id.
    pub fn room(&self) -> &str {
        match self {
            Self::Chat { room, .. } | Self::Other { room, .. } => room,
        }
    }
}

/// Caller-supplied callback receiving normalized messages.
pub type Sink = Arc<dyn Fn(Message) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessors() {
        let chat = Message::chat("douyu", "1234", "bob", "hello");
        assert!(chat.is_chat());
        assert_eq!(chat.site(), "douyu");
        assert_eq!(chat.room(), "1234");

        let other = Message::other("panda", "42", "type@=keeplive/");
        assert!(!other.is_chat());
        assert_eq!(other.room(), "42");
    }

    #[test]
    fn test_message_serde_tagging() {
        let chat = Message::chat("quanmin", "7", "alice", "hi");
        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(json["kind"], "chat");
        assert_eq!(json["sender"], "alice");
    }
}
