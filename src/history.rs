//! Proxy-history collaborator: which captured entries the operator has in
//! view. Only ids cross this boundary; the prompt flags the active one.

use async_trait::async_trait;

/// Maximum recent entry ids kept in a snapshot.
pub const RECENT_ENTRY_CAP: usize = 10;

/// Snapshot of the operator's history view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntriesInfo {
    pub active_entry_id: Option<String>,
    pub recent_entry_ids: Vec<String>,
}

impl EntriesInfo {
    /// Truncate to the most recent [`RECENT_ENTRY_CAP`] ids.
    pub fn capped(mut self) -> Self {
        self.recent_entry_ids.truncate(RECENT_ENTRY_CAP);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.active_entry_id.is_none() && self.recent_entry_ids.is_empty()
    }
}

/// Read-only history access.
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn entries_info(&self) -> anyhow::Result<EntriesInfo>;
}

/// Fixed in-memory history service.
#[derive(Debug, Default)]
pub struct StaticHistoryService {
    info: EntriesInfo,
}

impl StaticHistoryService {
    pub fn new(info: EntriesInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl HistoryService for StaticHistoryService {
    async fn entries_info(&self) -> anyhow::Result<EntriesInfo> {
        Ok(self.info.clone())
    }
}
