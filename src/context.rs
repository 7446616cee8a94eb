//! `AgentContext`: the capability façade handed into every tool call.
//!
//! It is the seam between "what the model can affect" and "how that effect
//! reaches storage and the UI": mutators delegate 1:1 to the
//! [`SessionStore`], reads resolve against the collaborator services, and
//! the in-flight generation's output sink lives in the writer slot.
//!
//! The context also assembles the `<context>` prompt block. Section order
//! and per-section omission are a contract; the model conditions on this
//! exact shape, so changes here are behaviour changes.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::env::{EnvironmentInfo, EnvironmentService};
use crate::error::StoreError;
use crate::history::{EntriesInfo, HistoryService, RECENT_ENTRY_CAP};
use crate::learnings::LearningStore;
use crate::skills::{Skill, SkillCatalog};
use crate::store::{SessionStore, Snapshot, Todo};
use crate::transport::StreamUpdate;

/// Output sink for the in-flight generation.
pub type Writer = mpsc::UnboundedSender<StreamUpdate>;

/// Bridge to a request editor the operator may have open. The live buffer
/// wins over the persisted value so a generation never clobbers edits in
/// progress.
pub trait EditorBridge: Send + Sync {
    /// The live buffer of the currently open editor, if this session's
    /// request is visible.
    fn open_request(&self) -> anyhow::Result<Option<String>>;

    /// Push a store-side request change into an open editor.
    fn sync_request(&self, raw: &str);
}

/// No-op bridge for headless hosts and tests.
#[derive(Debug, Default)]
pub struct NullEditor;

impl EditorBridge for NullEditor {
    fn open_request(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    fn sync_request(&self, _raw: &str) {}
}

/// Capability façade for one session.
pub struct AgentContext {
    store: Arc<Mutex<SessionStore>>,
    skills: Arc<dyn SkillCatalog>,
    learnings: Arc<dyn LearningStore>,
    environment: Arc<dyn EnvironmentService>,
    history: Arc<dyn HistoryService>,
    editor: Arc<dyn EditorBridge>,
    model_id: String,
    writer: Mutex<Option<Writer>>,
    env_info: Mutex<Option<EnvironmentInfo>>,
    entries_info: Mutex<Option<EntriesInfo>>,
    request_snapshot: Mutex<Option<String>>,
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Mutex<SessionStore>>,
        skills: Arc<dyn SkillCatalog>,
        learnings: Arc<dyn LearningStore>,
        environment: Arc<dyn EnvironmentService>,
        history: Arc<dyn HistoryService>,
        editor: Arc<dyn EditorBridge>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            skills,
            learnings,
            environment,
            history,
            editor,
            model_id: model_id.into(),
            writer: Mutex::new(None),
            env_info: Mutex::new(None),
            entries_info: Mutex::new(None),
            request_snapshot: Mutex::new(None),
        }
    }

    fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().expect("session store poisoned")
    }

    // -- read accessors -------------------------------------------------

    pub fn todos(&self) -> Vec<Todo> {
        self.store().todos().to_vec()
    }

    pub fn http_request(&self) -> String {
        self.store().http_request().to_string()
    }

    pub fn model(&self) -> &str {
        &self.model_id
    }

    pub fn selected_skill_ids(&self) -> Vec<String> {
        self.store().selected_skill_ids().to_vec()
    }

    /// Selected skill ids resolved against the catalog; unknown ids are
    /// silently dropped.
    pub fn selected_skills(&self) -> Vec<Skill> {
        self.selected_skill_ids()
            .iter()
            .filter_map(|id| self.skills.get(id))
            .collect()
    }

    pub fn learnings(&self) -> Vec<String> {
        self.learnings.learnings()
    }

    // -- mutators (1:1 store delegation) --------------------------------

    pub fn add_todo(&self, content: &str) -> Result<Todo, StoreError> {
        self.store().add_todo(content)
    }

    pub fn complete_todo(&self, id: &str) -> Result<Todo, StoreError> {
        self.store().complete_todo(id)
    }

    pub fn remove_todo(&self, id: &str) -> Result<Todo, StoreError> {
        self.store().remove_todo(id)
    }

    pub fn clear_todos(&self) {
        self.store().clear_todos();
    }

    /// Store the request buffer and synchronise any open editor view.
    pub fn set_http_request(&self, raw: &str) {
        self.store().set_http_request(raw);
        self.editor.sync_request(raw);
    }

    pub fn set_selected_skill_ids(&self, ids: Vec<String>) {
        self.store().set_selected_skill_ids(ids);
    }

    /// Capture a rollback anchor for edit-and-resubmit.
    pub fn create_snapshot(&self, user_message_id: &str) -> Snapshot {
        self.store().create_snapshot(user_message_id)
    }

    // -- writer slot ----------------------------------------------------

    /// Bind the output sink for an in-flight generation. Exactly one
    /// writer exists per generation; the transport owns set and release.
    pub fn set_writer(&self, writer: Writer) {
        *self.writer.lock().expect("writer slot poisoned") = Some(writer);
    }

    /// Release the writer at the end of a generation.
    pub fn take_writer(&self) -> Option<Writer> {
        self.writer.lock().expect("writer slot poisoned").take()
    }

    pub fn has_writer(&self) -> bool {
        self.writer.lock().expect("writer slot poisoned").is_some()
    }

    /// Send an update through the bound writer, if any. A closed or
    /// missing writer drops the update; the generation's side effects do
    /// not depend on a reader.
    pub fn write(&self, update: StreamUpdate) {
        if let Some(writer) = self.writer.lock().expect("writer slot poisoned").as_ref() {
            let _ = writer.send(update);
        }
    }

    // -- prefetch caches ------------------------------------------------

    /// Refresh the environment snapshot. Failures degrade to an absent
    /// snapshot; generation proceeds without the section.
    pub async fn fetch_environment_info(&self) {
        let info = match self.environment.environment_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(error = %e, "environment fetch failed, omitting from prompt");
                None
            }
        };
        *self.env_info.lock().expect("env cache poisoned") = info;
    }

    /// Refresh the history snapshot, capped at the [`RECENT_ENTRY_CAP`]
    /// most recent entries. Failures degrade to an absent snapshot.
    pub async fn fetch_entries_info(&self) {
        let info = match self.history.entries_info().await {
            Ok(info) => Some(info.capped()),
            Err(e) => {
                debug!(error = %e, "history fetch failed, omitting from prompt");
                None
            }
        };
        *self.entries_info.lock().expect("entries cache poisoned") = info;
    }

    /// Fetch the effective request content for this generation: the live
    /// editor buffer when one is open, the stored value otherwise. The
    /// result is cached for prompt assembly. Unlike the other prefetches
    /// a failure here is fatal to the generation.
    pub async fn fetch_request_content(&self) -> anyhow::Result<String> {
        let content = match self.editor.open_request()? {
            Some(live) => live,
            None => self.http_request(),
        };
        *self
            .request_snapshot
            .lock()
            .expect("request cache poisoned") = Some(content.clone());
        Ok(content)
    }

    // -- prompt assembly ------------------------------------------------

    /// Assemble the `<context>` block.
    ///
    /// Fixed section order: current time, todos, learnings, current HTTP
    /// request, recent history entries (active flagged), environments
    /// (selected flagged), environment variables (secrets masked). Each
    /// optional section is emitted only when it has content; the time
    /// section is always present.
    pub fn to_context_prompt(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        sections.push(format!("<current_time>{now}</current_time>"));

        let todos = self.todos();
        if !todos.is_empty() {
            let lines: Vec<String> = todos
                .iter()
                .map(|t| {
                    let mark = if t.completed { "x" } else { " " };
                    format!("- [{mark}] {}", t.content)
                })
                .collect();
            sections.push(format!("<todos>\n{}\n</todos>", lines.join("\n")));
        }

        let learnings = self.learnings();
        if !learnings.is_empty() {
            let lines: Vec<String> = learnings
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    serde_json::json!({ "index": index, "value": value }).to_string()
                })
                .collect();
            sections.push(format!("<learnings>\n{}\n</learnings>", lines.join("\n")));
        }

        let request = self
            .request_snapshot
            .lock()
            .expect("request cache poisoned")
            .clone()
            .unwrap_or_else(|| self.http_request());
        if !request.is_empty() {
            sections.push(format!("<http_request>\n{request}\n</http_request>"));
        }

        let entries = self
            .entries_info
            .lock()
            .expect("entries cache poisoned")
            .clone();
        if let Some(entries) = entries {
            if !entries.is_empty() {
                let mut lines: Vec<String> = Vec::with_capacity(RECENT_ENTRY_CAP);
                for id in &entries.recent_entry_ids {
                    if entries.active_entry_id.as_deref() == Some(id) {
                        lines.push(format!("- {id} (active)"));
                    } else {
                        lines.push(format!("- {id}"));
                    }
                }
                // An active entry not in the recent list is still shown.
                if let Some(active) = &entries.active_entry_id {
                    if !entries.recent_entry_ids.iter().any(|id| id == active) {
                        lines.insert(0, format!("- {active} (active)"));
                    }
                }
                sections.push(format!(
                    "<recent_requests>\n{}\n</recent_requests>",
                    lines.join("\n")
                ));
            }
        }

        let env_info = self.env_info.lock().expect("env cache poisoned").clone();
        if let Some(info) = env_info {
            if !info.all.is_empty() {
                let lines: Vec<String> = info
                    .all
                    .iter()
                    .map(|e| {
                        if info.selected_id.as_deref() == Some(&e.id) {
                            format!("- {} (selected)", e.name)
                        } else {
                            format!("- {}", e.name)
                        }
                    })
                    .collect();
                sections.push(format!(
                    "<environments>\n{}\n</environments>",
                    lines.join("\n")
                ));

                if let Some(selected) = info.selected() {
                    if !selected.variables.is_empty() {
                        let lines: Vec<String> = selected
                            .variables
                            .iter()
                            .map(|v| format!("{}={}", v.name, v.display_value()))
                            .collect();
                        sections.push(format!(
                            "<environment_variables>\n{}\n</environment_variables>",
                            lines.join("\n")
                        ));
                    }
                }
            }
        }

        format!("<context>\n{}\n</context>", sections.join("\n"))
    }

    /// Concatenate the selected skills as tagged blocks; empty string when
    /// none are selected (never an empty wrapper).
    pub fn to_skills_prompt(&self) -> String {
        let skills = self.selected_skills();
        if skills.is_empty() {
            return String::new();
        }
        let blocks: Vec<String> = skills
            .iter()
            .map(|s| {
                format!(
                    "<skill>\n<name>{}</name>\n<instructions>\n{}\n</instructions>\n</skill>",
                    s.name,
                    s.prompt.trim()
                )
            })
            .collect();
        format!(
            "<selected_skills>\n{}\n</selected_skills>",
            blocks.join("\n")
        )
    }

    // -- test helper ----------------------------------------------------

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use crate::env::StaticEnvironmentService;
        use crate::history::StaticHistoryService;
        use crate::learnings::MemoryLearningStore;
        use crate::skills::StaticSkillCatalog;

        Self::new(
            Arc::new(Mutex::new(SessionStore::new())),
            Arc::new(StaticSkillCatalog::default()),
            Arc::new(MemoryLearningStore::default()),
            Arc::new(StaticEnvironmentService::default()),
            Arc::new(StaticHistoryService::default()),
            Arc::new(NullEditor),
            "test-model",
        )
    }
}

// ── Tests ────────────────────────────────────────────────────
