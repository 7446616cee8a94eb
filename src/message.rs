//! Conversation message model plus the pure helpers the session and
//! transport layers share.
//!
//! A [`Message`] owns an ordered list of [`Part`]s; the transport only
//! mutates the in-flight assistant message through its merge loop, and the
//! whole list is persisted as one unit by the session.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Delivery state of a message, latched once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Streaming,
    Done,
    Aborted,
    Error,
}

/// Wall-clock bounds of one reasoning segment, epoch milliseconds.
///
/// `end` is absent while the segment is still open. The list on a message
/// is append-only within a generation and is always emitted whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningTime {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Per-message metadata attached once a generation enters a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DeliveryState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_times: Vec<ReasoningTime>,
}

/// One piece of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolInvocation {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StepStart,
    File {
        name: String,
        media_type: String,
    },
    Error {
        message: String,
    },
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    /// A finished user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
            metadata: None,
        }
    }

    /// An empty assistant message the transport fills in as it streams.
    pub fn assistant() -> Self {
        Self {
            id: crate::new_id(),
            role: Role::Assistant,
            parts: Vec::new(),
            metadata: None,
        }
    }

    /// Delivery state from metadata, if any.
    pub fn state(&self) -> Option<DeliveryState> {
        self.metadata.as_ref().and_then(|m| m.state)
    }
}

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Pure helpers ─────────────────────────────────────────────

/// The trailing user message, if one exists.
pub fn last_user_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().rev().find(|m| m.role == Role::User)
}

/// All text parts of a message concatenated in order.
pub fn message_text(message: &Message) -> String {
    message
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Whether the message contains any tool-invocation part.
pub fn has_tool_parts(message: &Message) -> bool {
    message
        .parts
        .iter()
        .any(|p| matches!(p, Part::ToolInvocation { .. }))
}

// ── Tests ────────────────────────────────────────────────────
