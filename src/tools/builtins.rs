//! Built-in tools: thin 1:1 delegations to [`AgentContext`] so the model
//! and the UI share one source of truth for todos and the request buffer.
//!
//! Anything heavier (history search, findings, external processes) plugs
//! into the same [`Tool`] contract from the host application.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolFailure, ToolOutcome, ToolRun, ToolSpec};

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolFailure> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ToolFailure::with_detail(
                format!("missing required field: {field}"),
                input.to_string(),
            )
        })
}

/// Add a todo to the session's task list.
pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "todo_write".into(),
            description: "Add a task to the current turn's todo list".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "Task description" }
                },
                "required": ["content"]
            }),
        }
    }

    async fn execute(&self, input: Value, run: &ToolRun<'_>) -> Result<ToolOutcome, ToolFailure> {
        let content = required_str(&input, "content")?;
        let todo = run
            .context
            .add_todo(content)
            .map_err(|e| ToolFailure::new(e.to_string()))?;
        Ok(ToolOutcome::with_value(
            format!("added todo: {}", todo.content),
            json!({ "todo_id": todo.id }),
        ))
    }
}

/// Mark a todo as completed.
pub struct TodoCheckTool;

#[async_trait]
impl Tool for TodoCheckTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "todo_check".into(),
            description: "Mark a todo as completed by id".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }),
        }
    }

    async fn execute(&self, input: Value, run: &ToolRun<'_>) -> Result<ToolOutcome, ToolFailure> {
        let id = required_str(&input, "id")?;
        let todo = run
            .context
            .complete_todo(id)
            .map_err(|e| ToolFailure::new(e.to_string()))?;
        Ok(ToolOutcome::message_only(format!(
            "completed todo: {}",
            todo.content
        )))
    }
}

/// Remove a todo.
pub struct TodoRemoveTool;

#[async_trait]
impl Tool for TodoRemoveTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "todo_remove".into(),
            description: "Remove a todo by id".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }),
        }
    }

    async fn execute(&self, input: Value, run: &ToolRun<'_>) -> Result<ToolOutcome, ToolFailure> {
        let id = required_str(&input, "id")?;
        let todo = run
            .context
            .remove_todo(id)
            .map_err(|e| ToolFailure::new(e.to_string()))?;
        Ok(ToolOutcome::message_only(format!(
            "removed todo: {}",
            todo.content
        )))
    }
}

/// Replace the editable HTTP request buffer.
pub struct SetRequestTool;

#[async_trait]
impl Tool for SetRequestTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "set_request".into(),
            description: "Replace the raw HTTP request being edited".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "raw": { "type": "string", "description": "Full raw HTTP request" }
                },
                "required": ["raw"]
            }),
        }
    }

    async fn execute(&self, input: Value, run: &ToolRun<'_>) -> Result<ToolOutcome, ToolFailure> {
        let raw = required_str(&input, "raw")?;
        run.context.set_http_request(raw);
        Ok(ToolOutcome::with_value(
            "request updated",
            json!({ "bytes": raw.len() }),
        ))
    }
}

// ── Tests ────────────────────────────────────────────────────
