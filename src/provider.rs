//! Model provider abstraction.
//!
//! The transport never inspects provider internals: it holds an opaque,
//! already-configured handle, asks whether credentials exist before doing
//! any work, and consumes a stream of [`ModelEvent`]s for each call of the
//! tool loop.

use std::pin::Pin;

use futures_core::Stream;

use crate::message::Message;
use crate::tools::ToolSpec;

/// One event from a single model call.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// A chunk of assistant text.
    TextDelta(String),
    /// A reasoning segment opened.
    ReasoningStart,
    /// A chunk of reasoning text.
    ReasoningDelta(String),
    /// The most recently opened reasoning segment closed.
    ReasoningEnd,
    /// The model wants to invoke a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The model finished this call.
    Done,
}

/// Boxed event stream returned by [`ModelProvider::stream_chat`].
pub type ModelStream = Pin<Box<dyn Stream<Item = anyhow::Result<ModelEvent>> + Send>>;

/// Trait implemented by every LLM backend the workbench can select.
pub trait ModelProvider: Send + Sync {
    /// Whether this provider has usable credentials. Checked before any
    /// generation work starts.
    fn is_configured(&self) -> bool;

    /// The model identifier, for prompt/context reporting.
    fn model_id(&self) -> &str;

    /// Run one model call over the given conversation and tool set,
    /// yielding events as they arrive.
    fn stream_chat(&self, messages: &[Message], tools: &[ToolSpec]) -> ModelStream;
}

/// A provider stand-in for sessions with no model selected. Always reports
/// unconfigured, so the transport fails fast without network activity.
#[derive(Debug, Default)]
pub struct UnconfiguredProvider;

impl ModelProvider for UnconfiguredProvider {
    fn is_configured(&self) -> bool {
        false
    }

    fn model_id(&self) -> &str {
        "unconfigured"
    }

    fn stream_chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> ModelStream {
        Box::pin(tokio_stream::once(Err(anyhow::anyhow!(
            "no model provider configured"
        ))))
    }
}
