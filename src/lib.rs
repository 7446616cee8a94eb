//! reqsmith: agent session orchestration for an HTTP security-testing
//! workbench.
//!
//! An operator drives an LLM-backed agent that inspects and mutates HTTP
//! requests. This crate is the conversation core: the per-session state
//! machine ([`session::AgentSession`]), the streaming transport that runs
//! one generation end to end ([`transport::Transport`]), the capability
//! façade handed into tool calls ([`context::AgentContext`]), and the
//! mutable per-session state behind it ([`store::SessionStore`]).
//!
//! The view layer, concrete tools, the persistence backend, and the model
//! provider are collaborators behind traits; in-memory and file-backed
//! reference implementations live alongside the traits so the crate is
//! usable (and testable) standalone.

pub mod agent;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod history;
pub mod learnings;
pub mod logs;
pub mod message;
pub mod persist;
pub mod provider;
pub mod session;
pub mod skills;
pub mod store;
pub mod tools;
pub mod transport;

/// Generate a fresh message / todo / queue-entry id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
