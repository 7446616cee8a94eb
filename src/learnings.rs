//! Learnings collaborator: operator-curated facts the agent should carry
//! into every prompt. Stored outside the session; read-only here.

use std::sync::RwLock;

/// Read-only accessor for stored learnings, in insertion order.
pub trait LearningStore: Send + Sync {
    fn learnings(&self) -> Vec<String>;
}

/// In-memory learning store for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryLearningStore {
    entries: RwLock<Vec<String>>,
}

impl MemoryLearningStore {
    pub fn new(entries: impl IntoIterator<Item = String>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
        }
    }

    pub fn add(&self, value: impl Into<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push(value.into());
        }
    }
}

impl LearningStore for MemoryLearningStore {
    fn learnings(&self) -> Vec<String> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}
