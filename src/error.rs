//! Error taxonomy for the session core.
//!
//! Three families, kept deliberately distinct:
//!
//! * [`StoreError`]: a store operation was asked for something that isn't
//!   there; returned, never thrown across the public boundary.
//! * [`TransportError`]: a generation could not start or finish.
//!   Configuration problems ([`TransportError::NotConfigured`]) fail before
//!   any work happens and are a different shape than mid-flight failures.
//! * Tool failures live in [`crate::tools::ToolFailure`]; they are reported
//!   back to the model as structured results, not surfaced as errors here.
//!
//! Cancellation is not an error anywhere in this crate: an aborted
//! generation terminates with the `aborted` delivery state and a normal
//! `Ok` return.

use thiserror::Error;

/// Failures from [`crate::store::SessionStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No todo with the given id exists.
    #[error("todo not found: {0}")]
    TodoNotFound(String),
    /// No queued message with the given id exists.
    #[error("queued message not found: {0}")]
    QueueNotFound(String),
    /// The provided content was empty after trimming.
    #[error("content must not be empty")]
    EmptyContent,
}

/// Failures from a single generation run.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No model is selected or its provider has no credentials.
    /// Raised before any network or stream activity.
    #[error("model provider is not configured")]
    NotConfigured,
    /// The editable request content could not be fetched; unlike the
    /// environment/history prefetches this one is fatal to the generation.
    #[error("failed to fetch request content: {0}")]
    ContentFetch(String),
    /// The model loop failed mid-flight.
    #[error("generation failed: {0}")]
    Generation(String),
}
