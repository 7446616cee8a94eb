//! Tool contract and dispatch.
//!
//! Every tool is a pure function from validated input to a structured
//! result: `execute(input, run) -> Result<ToolOutcome, ToolFailure>`.
//! Nothing escapes this boundary as a panic or untyped error: unknown
//! tools and malformed input are converted to [`ToolFailure`] at dispatch
//! so the model can retry with corrected input.

pub mod builtins;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::AgentContext;

/// Metadata describing a tool: name, description, and a JSON Schema for
/// its input.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Successful tool result. `message` is shown to the model/user; `value`
/// carries any extra structured fields.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ToolOutcome {
    pub message: String,
    #[serde(flatten)]
    pub value: Value,
}

impl ToolOutcome {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            value: Value::Object(Default::default()),
        }
    }

    pub fn with_value(message: impl Into<String>, value: Value) -> Self {
        Self {
            message: message.into(),
            value,
        }
    }
}

/// Failed tool result. `message` is user/model-visible; `detail` is
/// diagnostic-only.
#[derive(Debug, Clone, PartialEq, serde::Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ToolFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }
}

/// Per-invocation capabilities handed to a tool: the shared abort signal
/// and the session's capability façade.
pub struct ToolRun<'a> {
    pub cancel: &'a CancellationToken,
    pub context: &'a AgentContext,
}

/// Trait implemented by every tool the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, input: Value, run: &ToolRun<'_>) -> Result<ToolOutcome, ToolFailure>;
}

/// The fixed tool set for one generation.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch a call by name. Unknown names and non-object input are
    /// validation failures reported back to the model, never errors.
    pub async fn dispatch(
        &self,
        name: &str,
        input: Value,
        run: &ToolRun<'_>,
    ) -> Result<ToolOutcome, ToolFailure> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.spec().name == name)
            .ok_or_else(|| ToolFailure::new(format!("unknown tool: {name}")))?;

        if !input.is_object() {
            return Err(ToolFailure::with_detail(
                "tool input must be a JSON object",
                input.to_string(),
            ));
        }

        debug!(tool = name, "dispatching tool call");
        tool.execute(input, run).await
    }
}

/// The built-in delegation tools (todo management, request editing).
pub fn builtin_set() -> ToolSet {
    ToolSet::new()
        .with_tool(Arc::new(builtins::TodoWriteTool))
        .with_tool(Arc::new(builtins::TodoCheckTool))
        .with_tool(Arc::new(builtins::TodoRemoveTool))
        .with_tool(Arc::new(builtins::SetRequestTool))
}

// ── Tests ────────────────────────────────────────────────────
