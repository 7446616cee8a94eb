//! Durable conversation persistence.
//!
//! [`AgentStore`] is the backend collaborator contract; [`FileAgentStore`]
//! keeps one JSON document per chat id under a root directory and
//! [`MemoryAgentStore`] backs tests and embedding hosts.
//!
//! Load invariant: a generation can never be mid-flight across a reload,
//! so any persisted message still marked `streaming` is stale evidence of
//! an interrupted process and is rewritten to `aborted` before the session
//! sees it.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::message::{now_ms, DeliveryState, Message};

/// Session-scoped UI state persisted alongside the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_custom_agent_id: Option<String>,
}

/// Persisted record for one chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAgent {
    pub chat_id: String,
    pub messages: Vec<Message>,
    /// Unix-epoch milliseconds of the last write.
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<SessionState>,
}

/// Rewrite stale `streaming` delivery states to `aborted` in place.
/// Returns the number of messages touched.
pub fn normalize_loaded(agent: &mut StoredAgent) -> usize {
    let mut touched = 0;
    for message in &mut agent.messages {
        if let Some(meta) = message.metadata.as_mut() {
            if meta.state == Some(DeliveryState::Streaming) {
                meta.state = Some(DeliveryState::Aborted);
                touched += 1;
            }
        }
    }
    touched
}

/// Backend persistence contract.
///
/// Implementations apply [`normalize_loaded`] on every read so the session
/// never observes a mid-flight state from a previous process.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, chat_id: &str) -> anyhow::Result<Option<StoredAgent>>;

    async fn write_agent(
        &self,
        chat_id: &str,
        messages: &[Message],
        session_state: Option<&SessionState>,
    ) -> anyhow::Result<()>;

    async fn remove_agent(&self, chat_id: &str) -> anyhow::Result<()>;
}

// ── File-backed store ────────────────────────────────────────

/// One pretty-printed JSON document per chat under `<root>/agents/`.
#[derive(Debug, Clone)]
pub struct FileAgentStore {
    root: PathBuf,
}

impl FileAgentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn agent_path(&self, chat_id: &str) -> PathBuf {
        self.root.join("agents").join(format!("{chat_id}.json"))
    }
}

#[async_trait]
impl AgentStore for FileAgentStore {
    async fn get_agent(&self, chat_id: &str) -> anyhow::Result<Option<StoredAgent>> {
        let path = self.agent_path(chat_id);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let mut agent: StoredAgent = serde_json::from_str(&content)
            .with_context(|| format!("parse {}", path.display()))?;
        let touched = normalize_loaded(&mut agent);
        if touched > 0 {
            debug!(chat_id, touched, "normalized stale streaming messages on load");
        }
        Ok(Some(agent))
    }

    async fn write_agent(
        &self,
        chat_id: &str,
        messages: &[Message],
        session_state: Option<&SessionState>,
    ) -> anyhow::Result<()> {
        let dir = self.root.join("agents");
        fs::create_dir_all(&dir).await.context("create agents dir")?;

        let record = StoredAgent {
            chat_id: chat_id.to_string(),
            messages: messages.to_vec(),
            updated_at: now_ms(),
            session_state: session_state.cloned(),
        };
        let path = self.agent_path(chat_id);
        let json = serde_json::to_string_pretty(&record).context("serialize StoredAgent")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        debug!(chat_id, messages = messages.len(), "agent persisted");
        Ok(())
    }

    async fn remove_agent(&self, chat_id: &str) -> anyhow::Result<()> {
        let path = self.agent_path(chat_id);
        match fs::remove_file(&path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

// ── In-memory store ──────────────────────────────────────────

/// Map-backed store for tests and short-lived hosts.
#[derive(Debug, Default)]
pub struct MemoryAgentStore {
    agents: RwLock<HashMap<String, StoredAgent>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the write path. Test helper.
    pub async fn seed(&self, agent: StoredAgent) {
        self.agents
            .write()
            .await
            .insert(agent.chat_id.clone(), agent);
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn get_agent(&self, chat_id: &str) -> anyhow::Result<Option<StoredAgent>> {
        let mut agent = match self.agents.read().await.get(chat_id) {
            Some(a) => a.clone(),
            None => return Ok(None),
        };
        normalize_loaded(&mut agent);
        Ok(Some(agent))
    }

    async fn write_agent(
        &self,
        chat_id: &str,
        messages: &[Message],
        session_state: Option<&SessionState>,
    ) -> anyhow::Result<()> {
        let record = StoredAgent {
            chat_id: chat_id.to_string(),
            messages: messages.to_vec(),
            updated_at: now_ms(),
            session_state: session_state.cloned(),
        };
        self.agents
            .write()
            .await
            .insert(chat_id.to_string(), record);
        Ok(())
    }

    async fn remove_agent(&self, chat_id: &str) -> anyhow::Result<()> {
        self.agents.write().await.remove(chat_id);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageMetadata, Part, Role};
    use tempfile::TempDir;

    fn streaming_message(text: &str) -> Message {
        Message {
            id: crate::new_id(),
            role: Role::Assistant,
            parts: vec![Part::Text { text: text.into() }],
            metadata: Some(MessageMetadata {
                state: Some(DeliveryState::Streaming),
                reasoning_times: vec![],
            }),
        }
    }

    #[test]
    fn normalize_rewrites_only_streaming() {
        let mut agent = StoredAgent {
            chat_id: "c1".into(),
            messages: vec![
                Message::user("hello"),
                streaming_message("partial reply"),
            ],
            updated_at: 0,
            session_state: None,
        };
        let touched = normalize_loaded(&mut agent);
        assert_eq!(touched, 1);
        assert_eq!(agent.messages[1].state(), Some(DeliveryState::Aborted));
        // The rest of the message is untouched.
        assert_eq!(
            agent.messages[1].parts,
            vec![Part::Text {
                text: "partial reply".into()
            }]
        );
        assert!(agent.messages[0].metadata.is_none());
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileAgentStore::new(dir.path());

        let messages = vec![Message::user("ping")];
        store
            .write_agent("chat-1", &messages, None)
            .await
            .unwrap();

        let loaded = store.get_agent("chat-1").await.unwrap().unwrap();
        assert_eq!(loaded.chat_id, "chat-1");
        assert_eq!(loaded.messages, messages);
        assert!(loaded.updated_at > 0);
    }

    #[tokio::test]
    async fn file_store_missing_agent_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileAgentStore::new(dir.path());
        assert!(store.get_agent("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_normalizes_on_read() {
        let dir = TempDir::new().unwrap();
        let store = FileAgentStore::new(dir.path());

        store
            .write_agent("chat-2", &[streaming_message("cut off")], None)
            .await
            .unwrap();

        let loaded = store.get_agent("chat-2").await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].state(), Some(DeliveryState::Aborted));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileAgentStore::new(dir.path());
        store.remove_agent("never-existed").await.unwrap();

        store.write_agent("chat-3", &[], None).await.unwrap();
        store.remove_agent("chat-3").await.unwrap();
        assert!(store.get_agent("chat-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_normalizes_on_read() {
        let store = MemoryAgentStore::new();
        store
            .seed(StoredAgent {
                chat_id: "m1".into(),
                messages: vec![streaming_message("partial")],
                updated_at: 1,
                session_state: None,
            })
            .await;

        let loaded = store.get_agent("m1").await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].state(), Some(DeliveryState::Aborted));
    }

    #[tokio::test]
    async fn session_state_round_trips() {
        let store = MemoryAgentStore::new();
        let state = SessionState {
            mode: Some("agent".into()),
            selected_custom_agent_id: Some("recon".into()),
        };
        store
            .write_agent("m2", &[], Some(&state))
            .await
            .unwrap();

        let loaded = store.get_agent("m2").await.unwrap().unwrap();
        assert_eq!(loaded.session_state, Some(state));
    }
}
