//! Inbound message types.

use serde::{Deserialize, Serialize};

/// Payload kind of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageKind {
    Text { text: String },
    /// Image, audio, video or document
    Media,
    /// Stickers, reactions, system notices and anything else
    Other,
}

/// A message received from the messaging transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport message ID
    pub id: String,
    /// Stable handle of the conversation partner
    pub identity: String,
    pub kind: MessageKind,
    /// One-to-one chat with the bot (false for groups and broadcasts)
    pub direct: bool,
    /// Unix millis
    pub timestamp: i64,
    pub trace_id: String,
}

impl InboundMessage {
    /// Direct text message with a fresh ID and trace ID.
    pub fn text(identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identity: identity.into(),
            kind: MessageKind::Text { text: text.into() },
            direct: true,
            timestamp: chrono::Utc::now().timestamp_millis(),
            trace_id: showtime_common::logging::generate_trace_id(),
        }
    }

    /// Get the text content if this is a text message.
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text } => Some(text),
            _ => None,
        }
    }
}
