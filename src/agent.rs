//! Multi-step generation loop.
//!
//! [`ToolAgent::run`] drives one generation: call the model, forward its
//! events, execute any requested tools, feed the results back, and repeat
//! until the model stops asking for tools or the step cap is reached. The
//! loop is expressed as a stream of [`GenEvent`]s so the transport can
//! merge them into the assistant message as they arrive.
//!
//! Cancellation ends the stream quietly, without a `Done` event and without
//! an error. The caller distinguishes the two by inspecting the token.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures_core::Stream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::AgentContext;
use crate::message::{Message, Part, Role};
use crate::provider::{ModelEvent, ModelProvider};
use crate::tools::{ToolRun, ToolSet};

/// One event of a generation, as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum GenEvent {
    /// A new step of the tool loop began.
    StepStart,
    /// A chunk of assistant text.
    TextDelta(String),
    /// A reasoning segment opened.
    ReasoningStart,
    /// A chunk of reasoning text.
    ReasoningDelta(String),
    /// The open reasoning segment closed.
    ReasoningEnd,
    /// A tool call is about to execute.
    ToolCallStart {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A tool call finished, successfully or not.
    ToolCallEnd {
        id: String,
        output: Option<serde_json::Value>,
        error: Option<String>,
    },
    /// The generation ran to completion.
    Done,
}

/// Boxed event stream returned by [`ToolAgent::run`].
pub type GenStream = Pin<Box<dyn Stream<Item = anyhow::Result<GenEvent>> + Send>>;

/// Drives the model/tool loop for one session.
pub struct ToolAgent {
    provider: Arc<dyn ModelProvider>,
    tools: ToolSet,
    instructions: String,
    max_steps: usize,
}

impl ToolAgent {
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
            max_steps: max_steps.max(1),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Assemble the system message for this generation: operator
    /// instructions, then the session context block, then any selected
    /// skill instructions.
    fn system_message(&self, context: &AgentContext) -> Message {
        let mut text = self.instructions.clone();
        text.push_str("\n\n");
        text.push_str(&context.to_context_prompt());
        let skills = context.to_skills_prompt();
        if !skills.is_empty() {
            text.push_str("\n\n");
            text.push_str(&skills);
        }
        Message {
            id: crate::new_id(),
            role: Role::System,
            parts: vec![Part::Text { text }],
            metadata: None,
        }
    }

    /// Run one generation over the given conversation history.
    ///
    /// The returned stream yields events until the model finishes without
    /// requesting tools (`Done`), the step cap is hit (`Done` after the
    /// last step), the token is cancelled (stream ends, no `Done`), or the
    /// model call fails (terminal `Err`).
    pub fn run(
        &self,
        context: Arc<AgentContext>,
        history: Vec<Message>,
        cancel: CancellationToken,
    ) -> GenStream {
        let provider = Arc::clone(&self.provider);
        let tools = self.tools.clone();
        let max_steps = self.max_steps;
        let system = self.system_message(&context);

        Box::pin(try_stream! {
            let specs = tools.specs();
            let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 1);
            messages.push(system);
            messages.extend(history);

            let mut finished = false;

            'steps: for step in 0..max_steps {
                debug!(step, "generation step starting");
                yield GenEvent::StepStart;

                // Parts of the assistant message for this step, fed back
                // to the model on the next step.
                let mut step_parts: Vec<Part> = Vec::new();
                let mut pending_calls: Vec<(String, String, serde_json::Value)> = Vec::new();

                let mut stream = provider.stream_chat(&messages, &specs);
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break 'steps,
                        event = stream.next() => event,
                    };
                    let Some(event) = event else { break };
                    let event = event?;
                    match event {
                        ModelEvent::TextDelta(delta) => {
                            append_text(&mut step_parts, &delta);
                            yield GenEvent::TextDelta(delta);
                        }
                        ModelEvent::ReasoningStart => {
                            step_parts.push(Part::Reasoning { text: String::new() });
                            yield GenEvent::ReasoningStart;
                        }
                        ModelEvent::ReasoningDelta(delta) => {
                            append_reasoning(&mut step_parts, &delta);
                            yield GenEvent::ReasoningDelta(delta);
                        }
                        ModelEvent::ReasoningEnd => {
                            yield GenEvent::ReasoningEnd;
                        }
                        ModelEvent::ToolCall { id, name, arguments } => {
                            pending_calls.push((id, name, arguments));
                        }
                        ModelEvent::Done => break,
                    }
                }

                if pending_calls.is_empty() {
                    finished = true;
                    break;
                }

                for (id, name, input) in pending_calls {
                    if cancel.is_cancelled() {
                        break 'steps;
                    }

                    yield GenEvent::ToolCallStart {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    };

                    let run = ToolRun {
                        cancel: &cancel,
                        context: &context,
                    };
                    let (output, error) = match tools.dispatch(&name, input.clone(), &run).await {
                        Ok(outcome) => {
                            let value = serde_json::to_value(&outcome)
                                .unwrap_or_else(|_| serde_json::json!({}));
                            (Some(value), None)
                        }
                        Err(failure) => {
                            warn!(tool = %name, error = %failure, "tool call failed, feeding error back");
                            (None, Some(failure.to_string()))
                        }
                    };

                    step_parts.push(Part::ToolInvocation {
                        id: id.clone(),
                        name,
                        input,
                        output: output.clone(),
                        error: error.clone(),
                    });
                    yield GenEvent::ToolCallEnd { id, output, error };
                }

                messages.push(Message {
                    id: crate::new_id(),
                    role: Role::Assistant,
                    parts: step_parts,
                    metadata: None,
                });

                if step + 1 == max_steps {
                    warn!(max_steps, "step cap reached with tool calls still pending");
                    finished = true;
                }
            }

            if finished {
                yield GenEvent::Done;
            }
        })
    }
}

/// Extend the trailing text part, or open one.
fn append_text(parts: &mut Vec<Part>, delta: &str) {
    if let Some(Part::Text { text }) = parts.last_mut() {
        text.push_str(delta);
    } else {
        parts.push(Part::Text {
            text: delta.to_string(),
        });
    }
}

/// Extend the trailing reasoning part, or open one. Providers are expected
/// to send `ReasoningStart` first, but deltas without one still land.
fn append_reasoning(parts: &mut Vec<Part>, delta: &str) {
    if let Some(Part::Reasoning { text }) = parts.last_mut() {
        text.push_str(delta);
    } else {
        parts.push(Part::Reasoning {
            text: delta.to_string(),
        });
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelStream;
    use crate::tools::{builtin_set, ToolSpec};
    use std::sync::Mutex;

    /// Provider scripted with one event list per expected call.
    struct ScriptedProvider {
        calls: Mutex<Vec<Vec<anyhow::Result<ModelEvent>>>>,
    }

    impl ScriptedProvider {
        fn new(calls: Vec<Vec<anyhow::Result<ModelEvent>>>) -> Self {
            let mut calls = calls;
            calls.reverse();
            Self {
                calls: Mutex::new(calls),
            }
        }
    }

    impl ModelProvider for ScriptedProvider {
        fn is_configured(&self) -> bool {
            true
        }

        fn model_id(&self) -> &str {
            "scripted"
        }

        fn stream_chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> ModelStream {
            let events = self
                .calls
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| vec![Ok(ModelEvent::Done)]);
            Box::pin(tokio_stream::iter(events))
        }
    }

    fn agent_with(provider: ScriptedProvider, max_steps: usize) -> ToolAgent {
        ToolAgent::new(
            Arc::new(provider),
            builtin_set(),
            "You are a helpful assistant.",
            max_steps,
        )
    }

    async fn collect(stream: GenStream) -> Vec<GenEvent> {
        stream.map(|e| e.unwrap()).collect().await
    }

    #[tokio::test]
    async fn plain_text_generation_ends_with_done() {
        let provider = ScriptedProvider::new(vec![vec![
            Ok(ModelEvent::TextDelta("hel".into())),
            Ok(ModelEvent::TextDelta("lo".into())),
            Ok(ModelEvent::Done),
        ]]);
        let agent = agent_with(provider, 5);
        let ctx = Arc::new(AgentContext::for_tests());

        let events = collect(agent.run(
            ctx,
            vec![Message::user("hi")],
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(
            events,
            vec![
                GenEvent::StepStart,
                GenEvent::TextDelta("hel".into()),
                GenEvent::TextDelta("lo".into()),
                GenEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn tool_call_executes_and_loops() {
        let provider = ScriptedProvider::new(vec![
            vec![
                Ok(ModelEvent::ToolCall {
                    id: "c1".into(),
                    name: "todo_write".into(),
                    arguments: serde_json::json!({"content": "scan headers"}),
                }),
                Ok(ModelEvent::Done),
            ],
            vec![
                Ok(ModelEvent::TextDelta("added".into())),
                Ok(ModelEvent::Done),
            ],
        ]);
        let agent = agent_with(provider, 5);
        let ctx = Arc::new(AgentContext::for_tests());

        let events = collect(agent.run(
            Arc::clone(&ctx),
            vec![Message::user("track a todo")],
            CancellationToken::new(),
        ))
        .await;

        // Two steps, a successful tool call between them, terminal Done.
        assert_eq!(
            events.iter().filter(|e| **e == GenEvent::StepStart).count(),
            2
        );
        assert!(events.iter().any(
            |e| matches!(e, GenEvent::ToolCallEnd { id, output: Some(_), error: None } if id == "c1")
        ));
        assert_eq!(events.last(), Some(&GenEvent::Done));

        // Side effect reached the store.
        let todos = ctx.todos();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].content, "scan headers");
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_back() {
        let provider = ScriptedProvider::new(vec![
            vec![
                Ok(ModelEvent::ToolCall {
                    id: "c1".into(),
                    name: "no_such_tool".into(),
                    arguments: serde_json::json!({}),
                }),
                Ok(ModelEvent::Done),
            ],
            vec![Ok(ModelEvent::Done)],
        ]);
        let agent = agent_with(provider, 5);
        let ctx = Arc::new(AgentContext::for_tests());

        let events = collect(agent.run(ctx, vec![Message::user("x")], CancellationToken::new())).await;

        assert!(events.iter().any(|e| matches!(
            e,
            GenEvent::ToolCallEnd { error: Some(msg), output: None, .. } if msg.contains("unknown tool")
        )));
        // A tool failure is not fatal; the loop still completes.
        assert_eq!(events.last(), Some(&GenEvent::Done));
    }

    #[tokio::test]
    async fn step_cap_still_emits_done() {
        // Every call asks for another tool; cap at 2 steps.
        let call = |id: &str| {
            vec![
                Ok(ModelEvent::ToolCall {
                    id: id.into(),
                    name: "todo_write".into(),
                    arguments: serde_json::json!({"content": "again"}),
                }),
                Ok(ModelEvent::Done),
            ]
        };
        let provider = ScriptedProvider::new(vec![call("c1"), call("c2"), call("c3")]);
        let agent = agent_with(provider, 2);
        let ctx = Arc::new(AgentContext::for_tests());

        let events = collect(agent.run(ctx, vec![Message::user("x")], CancellationToken::new())).await;

        assert_eq!(
            events.iter().filter(|e| **e == GenEvent::StepStart).count(),
            2
        );
        assert_eq!(events.last(), Some(&GenEvent::Done));
    }

    #[tokio::test]
    async fn cancelled_token_ends_stream_without_done() {
        let provider = ScriptedProvider::new(vec![vec![
            Ok(ModelEvent::TextDelta("never".into())),
            Ok(ModelEvent::Done),
        ]]);
        let agent = agent_with(provider, 5);
        let ctx = Arc::new(AgentContext::for_tests());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let events = collect(agent.run(ctx, vec![Message::user("x")], cancel)).await;

        assert!(!events.contains(&GenEvent::Done));
    }

    #[tokio::test]
    async fn model_error_is_terminal() {
        let provider = ScriptedProvider::new(vec![vec![
            Ok(ModelEvent::TextDelta("par".into())),
            Err(anyhow::anyhow!("upstream 500")),
        ]]);
        let agent = agent_with(provider, 5);
        let ctx = Arc::new(AgentContext::for_tests());

        let mut stream = agent.run(ctx, vec![Message::user("x")], CancellationToken::new());
        let mut saw_error = false;
        while let Some(event) = stream.next().await {
            if event.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        // Terminal: nothing follows the error.
        assert!(stream.next().await.is_none());
    }
}
