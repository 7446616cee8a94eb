//! Per-session mutable state: todos, message queue, draft text, selected
//! skills, and the editable HTTP request buffer.
//!
//! Every operation is synchronous, never panics, and reports failure as a
//! [`StoreError`] value. The store itself owns no conversation history
//! (that belongs to [`crate::session::AgentSession`]) and performs no I/O;
//! side effects such as editor synchronisation are layered on by
//! [`crate::context::AgentContext`].

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::now_ms;

/// A single task the agent is tracking for the current turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub completed: bool,
}

/// User input captured while a generation was in flight; consumed exactly
/// once, either by being drained or promoted to front on a stop-and-resend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub text: String,
    pub created_at: i64,
}

/// Rollback anchor for edit-and-resubmit, keyed by the user message that
/// triggered the generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub user_message_id: String,
    pub http_request: String,
    pub created_at: i64,
}

/// One session's non-conversational state.
#[derive(Debug, Default)]
pub struct SessionStore {
    todos: Vec<Todo>,
    queue: Vec<QueuedMessage>,
    draft: String,
    http_request: String,
    selected_skill_ids: Vec<String>,
    snapshots: Vec<Snapshot>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- todos ----------------------------------------------------------

    /// Add a todo. Fails only on empty content.
    pub fn add_todo(&mut self, content: &str) -> Result<Todo, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }
        let todo = Todo {
            id: crate::new_id(),
            content: content.to_string(),
            completed: false,
        };
        self.todos.push(todo.clone());
        Ok(todo)
    }

    /// Mark a todo completed.
    pub fn complete_todo(&mut self, id: &str) -> Result<Todo, StoreError> {
        match self.todos.iter_mut().find(|t| t.id == id) {
            Some(todo) => {
                todo.completed = true;
                Ok(todo.clone())
            }
            None => Err(StoreError::TodoNotFound(id.to_string())),
        }
    }

    /// Remove a todo, returning it.
    pub fn remove_todo(&mut self, id: &str) -> Result<Todo, StoreError> {
        match self.todos.iter().position(|t| t.id == id) {
            Some(idx) => Ok(self.todos.remove(idx)),
            None => Err(StoreError::TodoNotFound(id.to_string())),
        }
    }

    /// Drop all todos. Runs at the end of every generation so stale task
    /// state never leaks across turns.
    pub fn clear_todos(&mut self) {
        self.todos.clear();
    }

    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    // -- message queue --------------------------------------------------

    /// Enqueue text submitted while a generation is in flight.
    pub fn add_to_queue(&mut self, text: &str) -> QueuedMessage {
        let entry = QueuedMessage {
            id: crate::new_id(),
            text: text.to_string(),
            created_at: now_ms(),
        };
        self.queue.push(entry.clone());
        entry
    }

    /// Remove a queued message by id, returning it.
    pub fn remove_from_queue(&mut self, id: &str) -> Result<QueuedMessage, StoreError> {
        match self.queue.iter().position(|q| q.id == id) {
            Some(idx) => Ok(self.queue.remove(idx)),
            None => Err(StoreError::QueueNotFound(id.to_string())),
        }
    }

    /// Relocate an existing entry to index 0 without duplicating it.
    /// Used for "cancel current, send this one now".
    pub fn move_to_front_of_queue(&mut self, id: &str) -> Result<(), StoreError> {
        match self.queue.iter().position(|q| q.id == id) {
            Some(idx) => {
                let entry = self.queue.remove(idx);
                self.queue.insert(0, entry);
                Ok(())
            }
            None => Err(StoreError::QueueNotFound(id.to_string())),
        }
    }

    /// Take the next queued message in FIFO order.
    pub fn pop_front_of_queue(&mut self) -> Option<QueuedMessage> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    pub fn queued_messages(&self) -> &[QueuedMessage] {
        &self.queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // -- request buffer / draft ----------------------------------------

    /// Store the editable raw HTTP request buffer.
    pub fn set_http_request(&mut self, raw: &str) {
        self.http_request = raw.to_string();
    }

    pub fn http_request(&self) -> &str {
        &self.http_request
    }

    pub fn set_draft(&mut self, text: &str) {
        self.draft = text.to_string();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    // -- skill selection ------------------------------------------------

    pub fn set_selected_skill_ids(&mut self, ids: Vec<String>) {
        self.selected_skill_ids = ids;
    }

    pub fn selected_skill_ids(&self) -> &[String] {
        &self.selected_skill_ids
    }

    // -- snapshots ------------------------------------------------------

    /// Capture a rollback anchor for the given user message.
    pub fn create_snapshot(&mut self, user_message_id: &str) -> Snapshot {
        let snapshot = Snapshot {
            user_message_id: user_message_id.to_string(),
            http_request: self.http_request.clone(),
            created_at: now_ms(),
        };
        self.snapshots.push(snapshot.clone());
        snapshot
    }

    /// Most recent snapshot anchored at the given user message.
    pub fn snapshot_for(&self, user_message_id: &str) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.user_message_id == user_message_id)
    }
}

// ── Tests ────────────────────────────────────────────────────
