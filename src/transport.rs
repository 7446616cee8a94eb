//! Streaming transport: turns the agent's event stream into a live
//! assistant [`Message`].
//!
//! Every update sent through the writer is a full snapshot of the message
//! so far, never a delta. A subscriber can render correctly from the
//! latest snapshot alone, no matter how many earlier updates it missed.
//!
//! The delivery state in message metadata is a latch: unset until the
//! first step starts, `streaming` while events flow, and then exactly one
//! terminal state (`done`, `aborted` or `error`). The first terminal write
//! wins; later writes are ignored.

use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{GenEvent, ToolAgent};
use crate::config::Config;
use crate::context::{AgentContext, Writer};
use crate::error::TransportError;
use crate::message::{
    has_tool_parts, last_user_message, now_ms, DeliveryState, Message, MessageMetadata, Part,
    ReasoningTime,
};
use crate::provider::ModelProvider;
use crate::tools::ToolSet;

/// One update on the stream: a full snapshot of the in-flight message.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate {
    pub message: Message,
}

/// How a generation run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The model finished normally.
    Completed,
    /// The cancellation token fired mid-flight.
    Aborted,
    /// The model loop failed. Carries [`TransportError::Generation`].
    Failed(TransportError),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// The finished (or terminated) assistant message plus how it ended.
#[derive(Debug)]
pub struct Completion {
    pub message: Message,
    pub outcome: Outcome,
}

/// Runs generations and streams their progress to a writer.
///
/// Holds the pieces a generation is built from; the agent itself is
/// constructed fresh per call, since the context prompt and instructions
/// can differ from turn to turn.
pub struct Transport {
    provider: Arc<dyn ModelProvider>,
    tools: ToolSet,
    instructions: String,
    max_steps: usize,
}

impl Transport {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: ToolSet,
        instructions: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            provider,
            tools,
            instructions: instructions.into(),
            max_steps,
        }
    }

    pub fn from_config(provider: Arc<dyn ModelProvider>, tools: ToolSet, config: &Config) -> Self {
        Self::new(provider, tools, config.instructions.clone(), config.max_steps)
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Run one generation over `history`, streaming full-message snapshots
    /// through `writer`.
    ///
    /// Pre-flight failures (unconfigured provider, unreadable request
    /// content) return `Err` before any snapshot is written. Once the
    /// stream starts, the result is always a [`Completion`]: mid-flight
    /// model failures and cancellation both produce a message carrying the
    /// matching terminal state, so the caller can persist it either way.
    pub async fn send_message(
        &self,
        context: Arc<AgentContext>,
        history: Vec<Message>,
        writer: Writer,
        cancel: CancellationToken,
    ) -> Result<Completion, TransportError> {
        if !self.provider.is_configured() {
            return Err(TransportError::NotConfigured);
        }

        let (content, (), ()) = tokio::join!(
            context.fetch_request_content(),
            context.fetch_environment_info(),
            context.fetch_entries_info()
        );
        content.map_err(|e| TransportError::ContentFetch(e.to_string()))?;

        // Rollback anchor for edit-and-resubmit, keyed by the message that
        // triggered this generation.
        if let Some(user) = last_user_message(&history) {
            context.create_snapshot(&user.id);
        }

        context.set_writer(writer);
        info!(model = context.model(), "generation started");

        let agent = ToolAgent::new(
            Arc::clone(&self.provider),
            self.tools.clone(),
            &self.instructions,
            self.max_steps,
        );
        let mut message = Message::assistant();
        let mut failure: Option<String> = None;

        let mut stream = agent.run(Arc::clone(&context), history, cancel.clone());
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => merge_event(&mut message, event),
                Err(e) => {
                    warn!(error = %e, "generation failed");
                    message.parts.push(Part::Error {
                        message: e.to_string(),
                    });
                    latch_state(&mut message, DeliveryState::Error);
                    failure = Some(e.to_string());
                    context.write(StreamUpdate {
                        message: message.clone(),
                    });
                    break;
                }
            }
            context.write(StreamUpdate {
                message: message.clone(),
            });
        }
        drop(stream);

        let outcome = if let Some(reason) = failure {
            Outcome::Failed(TransportError::Generation(reason))
        } else if cancel.is_cancelled() {
            latch_state(&mut message, DeliveryState::Aborted);
            Outcome::Aborted
        } else {
            // Covers a stream that ended without an explicit Done.
            latch_state(&mut message, DeliveryState::Done);
            Outcome::Completed
        };
        close_open_reasoning(&mut message);

        context.write(StreamUpdate {
            message: message.clone(),
        });
        context.take_writer();

        // A fresh turn always starts with an empty task list, whatever the
        // outcome of this one.
        context.clear_todos();

        debug!(
            state = ?message.state(),
            parts = message.parts.len(),
            used_tools = has_tool_parts(&message),
            "generation finished"
        );
        Ok(Completion { message, outcome })
    }
}

/// Fold one event into the in-flight message.
fn merge_event(message: &mut Message, event: GenEvent) {
    match event {
        GenEvent::StepStart => {
            message.parts.push(Part::StepStart);
            latch_state(message, DeliveryState::Streaming);
        }
        GenEvent::TextDelta(delta) => {
            if let Some(Part::Text { text }) = message.parts.last_mut() {
                text.push_str(&delta);
            } else {
                message.parts.push(Part::Text { text: delta });
            }
        }
        GenEvent::ReasoningStart => {
            message.parts.push(Part::Reasoning {
                text: String::new(),
            });
            let meta = message.metadata.get_or_insert_with(MessageMetadata::default);
            meta.reasoning_times.push(ReasoningTime {
                start: now_ms(),
                end: None,
            });
        }
        GenEvent::ReasoningDelta(delta) => {
            if let Some(Part::Reasoning { text }) = message.parts.last_mut() {
                text.push_str(&delta);
            } else {
                // Delta without a start still opens a segment.
                message.parts.push(Part::Reasoning { text: delta });
                let meta = message.metadata.get_or_insert_with(MessageMetadata::default);
                meta.reasoning_times.push(ReasoningTime {
                    start: now_ms(),
                    end: None,
                });
            }
        }
        GenEvent::ReasoningEnd => {
            close_open_reasoning(message);
        }
        GenEvent::ToolCallStart { id, name, input } => {
            message.parts.push(Part::ToolInvocation {
                id,
                name,
                input,
                output: None,
                error: None,
            });
        }
        GenEvent::ToolCallEnd { id, output, error } => {
            for part in message.parts.iter_mut().rev() {
                if let Part::ToolInvocation {
                    id: part_id,
                    output: part_output,
                    error: part_error,
                    ..
                } = part
                {
                    if *part_id == id {
                        *part_output = output;
                        *part_error = error;
                        break;
                    }
                }
            }
        }
        GenEvent::Done => {
            latch_state(message, DeliveryState::Done);
        }
    }
}

/// Advance the delivery-state latch. `streaming` only replaces an unset
/// state; a terminal state replaces unset or `streaming` and then sticks.
fn latch_state(message: &mut Message, next: DeliveryState) {
    let meta = message.metadata.get_or_insert_with(MessageMetadata::default);
    match meta.state {
        None => meta.state = Some(next),
        Some(DeliveryState::Streaming) if next != DeliveryState::Streaming => {
            meta.state = Some(next);
        }
        _ => {}
    }
}

/// Close the most recent reasoning segment if it is still open.
fn close_open_reasoning(message: &mut Message) {
    if let Some(meta) = message.metadata.as_mut() {
        if let Some(open) = meta.reasoning_times.iter_mut().rev().find(|t| t.end.is_none()) {
            open.end = Some(now_ms());
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
