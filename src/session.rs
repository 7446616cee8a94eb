//! Session orchestration: one conversation, one generation at a time.
//!
//! [`AgentSession`] owns the conversation history, the chat status, and
//! the queue of messages waiting their turn. Submitting while a generation
//! is in flight enqueues; when a generation finishes normally or is
//! aborted, the queue drains front-first. A failed generation keeps the
//! queue intact so nothing is silently lost behind an error.
//!
//! Stopping is always the cancellation token, never task abort, so the
//! in-flight generation terminates through its normal path and its partial
//! message is persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{AgentContext, Writer};
use crate::message::{message_text, DeliveryState, Message, MessageMetadata, Role};
use crate::persist::{AgentStore, SessionState};
use crate::store::{QueuedMessage, SessionStore, Snapshot, Todo};
use crate::transport::{Outcome, Transport};

/// Observable status of a session's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    /// Nothing in flight.
    Idle,
    /// A message was accepted and a generation is starting.
    Submitted,
    /// Model output is flowing.
    Streaming,
    /// The last generation failed. Cleared by the next submit.
    Error,
}

/// What happened to a submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// A generation started for it.
    Started,
    /// A generation was already in flight; the message waits in the queue.
    Queued(QueuedMessage),
}

struct Inner {
    messages: Vec<Message>,
    session_state: SessionState,
}

/// One agent-backed conversation.
pub struct AgentSession {
    id: String,
    context: Arc<AgentContext>,
    transport: Arc<Transport>,
    agent_store: Arc<dyn AgentStore>,
    session_store: Arc<Mutex<SessionStore>>,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ChatStatus>,
    running: Mutex<Option<CancellationToken>>,
    /// Last writer supplied by a submit; drained generations reuse it.
    writer: Mutex<Option<Writer>>,
    /// While set, generations that end do not auto-drain the queue.
    stopping: AtomicBool,
    queue_warn_depth: usize,
}

impl AgentSession {
    /// Create a session, restoring any persisted conversation for `id`.
    ///
    /// `session_store` must be the same store the context was built over,
    /// so queue and todo mutations are visible on both sides.
    pub async fn open(
        id: impl Into<String>,
        context: Arc<AgentContext>,
        transport: Arc<Transport>,
        agent_store: Arc<dyn AgentStore>,
        session_store: Arc<Mutex<SessionStore>>,
        queue_warn_depth: usize,
    ) -> anyhow::Result<Arc<Self>> {
        let id = id.into();
        let (messages, session_state) = match agent_store.get_agent(&id).await? {
            Some(stored) => (stored.messages, stored.session_state.unwrap_or_default()),
            None => (Vec::new(), SessionState::default()),
        };
        debug!(chat_id = %id, messages = messages.len(), "session opened");

        let (status_tx, _) = watch::channel(ChatStatus::Idle);
        Ok(Arc::new(Self {
            id,
            context,
            transport,
            agent_store,
            session_store,
            inner: Mutex::new(Inner {
                messages,
                session_state,
            }),
            status_tx,
            running: Mutex::new(None),
            writer: Mutex::new(None),
            stopping: AtomicBool::new(false),
            queue_warn_depth,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.context
    }

    /// Subscribe to status changes. The receiver always observes the
    /// latest value, never a backlog.
    pub fn status(&self) -> watch::Receiver<ChatStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_status(&self) -> ChatStatus {
        *self.status_tx.borrow()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().expect("session inner poisoned").messages.clone()
    }

    // -- session state --------------------------------------------------

    /// Set the session mode and persist immediately. Mode changes must not
    /// wait for the next generation to survive a restart.
    pub async fn set_mode(&self, mode: Option<String>) {
        self.inner
            .lock()
            .expect("session inner poisoned")
            .session_state
            .mode = mode;
        self.persist().await;
    }

    pub async fn set_selected_custom_agent(&self, agent_id: Option<String>) {
        self.inner
            .lock()
            .expect("session inner poisoned")
            .session_state
            .selected_custom_agent_id = agent_id;
        self.persist().await;
    }

    pub fn session_state(&self) -> SessionState {
        self.inner
            .lock()
            .expect("session inner poisoned")
            .session_state
            .clone()
    }

    // -- queue ----------------------------------------------------------

    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.store().queued_messages().to_vec()
    }

    pub fn remove_from_queue(&self, id: &str) -> Result<QueuedMessage, crate::error::StoreError> {
        self.store().remove_from_queue(id)
    }

    /// The single queue reorder operation.
    pub fn move_to_front_of_queue(&self, id: &str) -> Result<(), crate::error::StoreError> {
        self.store().move_to_front_of_queue(id)
    }

    // -- draft ----------------------------------------------------------

    pub fn set_draft(&self, text: &str) {
        self.store().set_draft(text);
    }

    pub fn draft(&self) -> String {
        self.store().draft().to_string()
    }

    // -- submit / stop ---------------------------------------------------

    /// Submit a message. Starts a generation when idle; enqueues when one
    /// is already in flight. Stream snapshots go to `writer` for every
    /// generation this submission triggers, including drained ones.
    pub fn send(self: &Arc<Self>, text: &str, writer: Writer) -> SendOutcome {
        *self.writer.lock().expect("writer slot poisoned") = Some(writer);

        let mut running = self.running.lock().expect("running slot poisoned");
        if running.is_some() {
            let queued = self.store().add_to_queue(text);
            let depth = self.store().queue_len();
            if depth >= self.queue_warn_depth {
                warn!(chat_id = %self.id, depth, "message queue is getting deep");
            }
            debug!(chat_id = %self.id, queued_id = %queued.id, "generation in flight, queued");
            return SendOutcome::Queued(queued);
        }

        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());
        drop(running);

        let _ = self.status_tx.send(ChatStatus::Submitted);
        let session = Arc::clone(self);
        let text = text.to_string();
        tokio::spawn(async move {
            session.run_generations(text, cancel).await;
        });
        SendOutcome::Started
    }

    /// Cancel the in-flight generation, if any. Idempotent; calling with
    /// nothing running is a no-op, and repeated calls are harmless. The
    /// queue still drains after the abort.
    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().expect("running slot poisoned").as_ref() {
            info!(chat_id = %self.id, "stopping generation");
            cancel.cancel();
        }
    }

    /// Cancel the in-flight generation and wait until the session settles,
    /// suppressing queue drain until [`resume_after_stop`] is called.
    ///
    /// When nothing is running this resolves immediately with no side
    /// effects.
    ///
    /// [`resume_after_stop`]: AgentSession::resume_after_stop
    pub async fn stop_and_wait(&self) {
        let cancel = self
            .running
            .lock()
            .expect("running slot poisoned")
            .clone();
        let Some(cancel) = cancel else {
            return;
        };

        self.stopping.store(true, Ordering::SeqCst);
        info!(chat_id = %self.id, "stopping generation and waiting");
        cancel.cancel();

        // A submit may have claimed the running slot before it wrote
        // `Submitted`, so an idle-looking status alone is not settled.
        // The slot must be empty too.
        let mut rx = self.status();
        loop {
            let status = *rx.borrow();
            let settled = (status == ChatStatus::Idle || status == ChatStatus::Error)
                && self.running.lock().expect("running slot poisoned").is_none();
            if settled {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Re-enable auto-drain after [`stop_and_wait`] and immediately drain
    /// the next queued message, if any.
    ///
    /// [`stop_and_wait`]: AgentSession::stop_and_wait
    pub fn resume_after_stop(self: &Arc<Self>) {
        self.stopping.store(false, Ordering::SeqCst);
        self.try_drain();
    }

    /// Stop-and-resend: promote the queued message to the front and cancel
    /// the in-flight generation; the normal drain sends it next. When idle
    /// it is sent immediately instead.
    pub fn send_from_queue(self: &Arc<Self>, id: &str) -> Result<(), crate::error::StoreError> {
        let in_flight = self
            .running
            .lock()
            .expect("running slot poisoned")
            .is_some();
        if in_flight {
            self.store().move_to_front_of_queue(id)?;
            self.stop();
            return Ok(());
        }

        let queued = self.store().remove_from_queue(id)?;
        let writer = self.current_writer();
        self.send(&queued.text, writer);
        Ok(())
    }

    /// Remove the trailing user turn for edit flows: returns its text and
    /// truncates the conversation to just before it. `None` when no user
    /// message exists. The truncated list is persisted.
    ///
    /// Any in-flight generation is cancelled and awaited first, so its
    /// reply cannot land after the truncation. The stop is internal; the
    /// next submit drains the queue as usual.
    pub async fn remove_last_user_message(&self) -> Option<String> {
        self.stop_and_wait().await;
        self.stopping.store(false, Ordering::SeqCst);
        let text = {
            let mut inner = self.inner.lock().expect("session inner poisoned");
            let position = inner
                .messages
                .iter()
                .rposition(|m| m.role == Role::User)?;
            let text = message_text(&inner.messages[position]);
            inner.messages.truncate(position);
            text
        };
        self.persist().await;
        Some(text)
    }

    /// Edit-and-resubmit: rewind the conversation to just before the user
    /// message identified by `user_message_id`, restore the request buffer
    /// captured when that message was first sent, and submit `text`.
    ///
    /// Any in-flight generation is cancelled and awaited before the
    /// rewind, so a late completion cannot push a reply onto the
    /// truncated conversation.
    pub async fn resubmit(
        self: &Arc<Self>,
        user_message_id: &str,
        text: &str,
        writer: Writer,
    ) -> anyhow::Result<SendOutcome> {
        self.stop_and_wait().await;
        self.stopping.store(false, Ordering::SeqCst);

        let snapshot: Option<Snapshot> = self.store().snapshot_for(user_message_id).cloned();

        {
            let mut inner = self.inner.lock().expect("session inner poisoned");
            let position = inner
                .messages
                .iter()
                .position(|m| m.id == user_message_id)
                .ok_or_else(|| anyhow::anyhow!("message not found: {user_message_id}"))?;
            inner.messages.truncate(position);
        }

        if let Some(snapshot) = snapshot {
            self.context.set_http_request(&snapshot.http_request);
        }
        debug!(chat_id = %self.id, user_message_id, "conversation rewound for resubmit");
        Ok(self.send(text, writer))
    }

    // -- generation loop -------------------------------------------------

    /// Run the submitted message, then drain the queue front-first for as
    /// long as generations keep ending in `done` or `aborted`. An error
    /// stops the drain with the queue intact, as does a stop-in-progress.
    async fn run_generations(self: Arc<Self>, first: String, cancel: CancellationToken) {
        let mut next = Some(first);
        let mut cancel = cancel;
        let mut final_status = ChatStatus::Idle;

        while let Some(text) = next.take() {
            let history = {
                let mut inner = self.inner.lock().expect("session inner poisoned");
                inner.messages.push(Message::user(&text));
                inner.messages.clone()
            };

            let _ = self.status_tx.send(ChatStatus::Streaming);
            let result = self
                .transport
                .send_message(
                    Arc::clone(&self.context),
                    history,
                    self.current_writer(),
                    cancel.clone(),
                )
                .await;

            let drain = match result {
                Ok(completion) => {
                    let drain = match completion.outcome {
                        Outcome::Completed => true,
                        Outcome::Aborted => {
                            info!(chat_id = %self.id, "generation aborted");
                            true
                        }
                        Outcome::Failed(ref e) => {
                            warn!(chat_id = %self.id, error = %e, "generation failed");
                            final_status = ChatStatus::Error;
                            false
                        }
                    };
                    self.inner
                        .lock()
                        .expect("session inner poisoned")
                        .messages
                        .push(completion.message);
                    drain
                }
                Err(e) => {
                    warn!(chat_id = %self.id, error = %e, "generation could not start");
                    // Keep the conversation consistent: the accepted user
                    // message gets a failed assistant reply.
                    let mut failed = Message::assistant();
                    failed.metadata = Some(MessageMetadata {
                        state: Some(DeliveryState::Error),
                        reasoning_times: Vec::new(),
                    });
                    failed.parts.push(crate::message::Part::Error {
                        message: e.to_string(),
                    });
                    self.inner
                        .lock()
                        .expect("session inner poisoned")
                        .messages
                        .push(failed);
                    final_status = ChatStatus::Error;
                    false
                }
            };

            self.persist().await;

            // Decide the next step under the running lock so a concurrent
            // submit either sees us still running (and enqueues) or finds
            // the slot empty after we have drained everything.
            let mut running = self.running.lock().expect("running slot poisoned");
            if drain && !self.stopping.load(Ordering::SeqCst) {
                if let Some(queued) = self.store().pop_front_of_queue() {
                    debug!(chat_id = %self.id, queued_id = %queued.id, "draining queued message");
                    // A fresh token per drained generation; the previous
                    // one may already be cancelled.
                    cancel = CancellationToken::new();
                    *running = Some(cancel.clone());
                    next = Some(queued.text);
                    continue;
                }
            }
            *running = None;
        }

        let _ = self.status_tx.send(final_status);
    }

    /// Start a generation for the next queued message if nothing is
    /// running. Used by the resume path; submits go through [`send`].
    ///
    /// [`send`]: AgentSession::send
    fn try_drain(self: &Arc<Self>) {
        let mut running = self.running.lock().expect("running slot poisoned");
        if running.is_some() {
            return;
        }
        let Some(queued) = self.store().pop_front_of_queue() else {
            return;
        };
        debug!(chat_id = %self.id, queued_id = %queued.id, "draining after resume");

        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());
        drop(running);

        let _ = self.status_tx.send(ChatStatus::Submitted);
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.run_generations(queued.text, cancel).await;
        });
    }

    /// The writer supplied by the most recent submit, or a throwaway sink
    /// when none exists yet. Side effects never depend on a reader.
    fn current_writer(&self) -> Writer {
        if let Some(writer) = self.writer.lock().expect("writer slot poisoned").as_ref() {
            return writer.clone();
        }
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        tx
    }

    /// Persist the conversation. Failures are logged and swallowed; a
    /// broken disk must never take down a live session.
    async fn persist(&self) {
        let (messages, state) = {
            let inner = self.inner.lock().expect("session inner poisoned");
            (inner.messages.clone(), inner.session_state.clone())
        };
        if let Err(e) = self
            .agent_store
            .write_agent(&self.id, &messages, Some(&state))
            .await
        {
            warn!(chat_id = %self.id, error = %e, "failed to persist session");
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, SessionStore> {
        self.session_store.lock().expect("session store poisoned")
    }

    /// Remove the persisted conversation and reset in-memory state.
    pub async fn clear(&self) -> anyhow::Result<()> {
        {
            let mut inner = self.inner.lock().expect("session inner poisoned");
            inner.messages.clear();
            inner.session_state = SessionState::default();
        }
        self.context.clear_todos();
        self.agent_store.remove_agent(&self.id).await
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.context.todos()
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NullEditor;
    use crate::env::StaticEnvironmentService;
    use crate::history::StaticHistoryService;
    use crate::learnings::MemoryLearningStore;
    use crate::message::message_text;
    use crate::persist::MemoryAgentStore;
    use crate::provider::{ModelEvent, ModelProvider, ModelStream};
    use crate::skills::StaticSkillCatalog;
    use crate::tools::{builtin_set, ToolSpec};

    /// Yields one scripted event list per model call, in order.
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

        fn reply(text: &str) -> Vec<anyhow::Result<ModelEvent>> {
            vec![
                Ok(ModelEvent::TextDelta(text.to_string())),
                Ok(ModelEvent::Done),
            ]
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

    /// A provider whose stream never yields until cancelled.
    struct StallingProvider;

    impl ModelProvider for StallingProvider {
        fn is_configured(&self) -> bool {
            true
        }

        fn model_id(&self) -> &str {
            "stalling"
        }

        fn stream_chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> ModelStream {
            Box::pin(async_stream::stream! {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                yield Ok(ModelEvent::Done);
            })
        }
    }

    async fn session_with(
        provider: impl ModelProvider + 'static,
        agent_store: Arc<dyn AgentStore>,
    ) -> Arc<AgentSession> {
        let session_store = Arc::new(Mutex::new(SessionStore::new()));
        let context = Arc::new(AgentContext::new(
            Arc::clone(&session_store),
            Arc::new(StaticSkillCatalog::default()),
            Arc::new(MemoryLearningStore::default()),
            Arc::new(StaticEnvironmentService::default()),
            Arc::new(StaticHistoryService::default()),
            Arc::new(NullEditor),
            "test-model",
        ));
        let transport = Arc::new(Transport::new(
            Arc::new(provider),
            builtin_set(),
            "instructions",
            5,
        ));
        AgentSession::open("chat-1", context, transport, agent_store, session_store, 32)
            .await
            .unwrap()
    }

    /// Drive the status receiver until the session settles.
    async fn wait_settled(rx: &mut watch::Receiver<ChatStatus>) -> ChatStatus {
        loop {
            let status = *rx.borrow();
            if status == ChatStatus::Idle || status == ChatStatus::Error {
                return status;
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn send_runs_generation_and_returns_to_idle() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(
            ScriptedProvider::new(vec![ScriptedProvider::reply("hello back")]),
            Arc::clone(&store),
        )
        .await;

        let mut rx = session.status();
        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        assert_eq!(session.send("hello", tx), SendOutcome::Started);
        rx.changed().await.unwrap();

        assert_eq!(wait_settled(&mut rx).await, ChatStatus::Idle);

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(message_text(&messages[0]), "hello");
        assert_eq!(message_text(&messages[1]), "hello back");
        assert_eq!(messages[1].state(), Some(DeliveryState::Done));

        // Persisted too.
        let stored = store.get_agent("chat-1").await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 2);
    }

    #[tokio::test]
    async fn failed_generation_sets_error_and_keeps_queue() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(
            ScriptedProvider::new(vec![vec![Err(anyhow::anyhow!("upstream 500"))]]),
            store,
        )
        .await;

        // Queue something behind the failing generation by pre-seeding the
        // queue directly; it must survive the failure untouched.
        session.store().add_to_queue("follow-up");

        let mut rx = session.status();
        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        session.send("will fail", tx);
        rx.changed().await.unwrap();

        assert_eq!(wait_settled(&mut rx).await, ChatStatus::Error);
        assert_eq!(session.queued_messages().len(), 1);

        let messages = session.messages();
        assert_eq!(messages.last().unwrap().state(), Some(DeliveryState::Error));
    }

    #[tokio::test]
    async fn todos_are_cleared_after_generation() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(
            ScriptedProvider::new(vec![
                vec![
                    Ok(ModelEvent::ToolCall {
                        id: "c1".into(),
                        name: "todo_write".into(),
                        arguments: serde_json::json!({"content": "enumerate /admin"}),
                    }),
                    Ok(ModelEvent::Done),
                ],
                ScriptedProvider::reply("on it"),
            ]),
            store,
        )
        .await;

        let mut rx = session.status();
        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        session.send("make a plan", tx);
        rx.changed().await.unwrap();
        wait_settled(&mut rx).await;

        assert!(session.todos().is_empty());
    }

    #[tokio::test]
    async fn resubmit_rewinds_and_restores_request() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(
            ScriptedProvider::new(vec![
                ScriptedProvider::reply("first answer"),
                ScriptedProvider::reply("second answer"),
            ]),
            store,
        )
        .await;
        session.context().set_http_request("GET /v1 HTTP/1.1\r\n\r\n");

        let mut rx = session.status();
        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        session.send("first question", tx.clone());
        rx.changed().await.unwrap();
        wait_settled(&mut rx).await;

        // The generation mutated the request after the snapshot was taken.
        session.context().set_http_request("GET /v2 HTTP/1.1\r\n\r\n");
        let first_user_id = session.messages()[0].id.clone();

        session
            .resubmit(&first_user_id, "rephrased question", tx)
            .await
            .unwrap();
        rx.changed().await.unwrap();
        wait_settled(&mut rx).await;

        let messages = session.messages();
        assert_eq!(message_text(&messages[0]), "rephrased question");
        assert_eq!(message_text(&messages[1]), "second answer");
        // Request buffer rolled back to the snapshot value, then a fresh
        // snapshot was taken for the resubmitted message.
        assert!(session.context().http_request().contains("/v1"));
    }

    #[tokio::test]
    async fn resubmit_unknown_message_is_an_error() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(ScriptedProvider::new(vec![]), store).await;
        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        assert!(session.resubmit("missing", "text", tx).await.is_err());
    }

    #[tokio::test]
    async fn stop_without_running_generation_is_a_no_op() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(ScriptedProvider::new(vec![]), store).await;
        session.stop();
        session.stop();
        assert_eq!(session.current_status(), ChatStatus::Idle);
    }

    #[tokio::test]
    async fn stop_and_wait_when_idle_resolves_immediately() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(ScriptedProvider::new(vec![]), store).await;
        tokio::time::timeout(std::time::Duration::from_millis(100), session.stop_and_wait())
            .await
            .expect("stop_and_wait must not block when idle");
        assert_eq!(session.current_status(), ChatStatus::Idle);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn stop_and_wait_settles_stalled_generation() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(StallingProvider, store).await;

        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        assert_eq!(session.send("stall", tx), SendOutcome::Started);

        session.stop_and_wait().await;

        // Settled means status idle AND the running slot released; the
        // aborted reply is already in the conversation.
        assert_eq!(session.current_status(), ChatStatus::Idle);
        assert!(session.running.lock().unwrap().is_none());
        let messages = session.messages();
        assert_eq!(
            messages.last().unwrap().state(),
            Some(DeliveryState::Aborted)
        );
    }

    #[tokio::test]
    async fn remove_last_user_message_truncates_and_returns_text() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(
            ScriptedProvider::new(vec![ScriptedProvider::reply("answer")]),
            Arc::clone(&store),
        )
        .await;

        let mut rx = session.status();
        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        session.send("the question", tx);
        rx.changed().await.unwrap();
        wait_settled(&mut rx).await;

        let removed = session.remove_last_user_message().await;
        assert_eq!(removed.as_deref(), Some("the question"));
        assert!(session.messages().is_empty());
        // Truncation is persisted, not just in-memory.
        let stored = store.get_agent("chat-1").await.unwrap().unwrap();
        assert!(stored.messages.is_empty());

        // Nothing left to remove.
        assert_eq!(session.remove_last_user_message().await, None);
    }

    #[tokio::test]
    async fn mode_change_persists_without_a_generation() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(ScriptedProvider::new(vec![]), Arc::clone(&store)).await;

        session.set_mode(Some("exploit".into())).await;
        let stored = store.get_agent("chat-1").await.unwrap().unwrap();
        assert_eq!(
            stored.session_state.unwrap().mode.as_deref(),
            Some("exploit")
        );
    }

    #[tokio::test]
    async fn clear_wipes_conversation_and_store() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryAgentStore::new());
        let session = session_with(
            ScriptedProvider::new(vec![ScriptedProvider::reply("hi")]),
            Arc::clone(&store),
        )
        .await;

        let mut rx = session.status();
        let (tx, _updates) = tokio::sync::mpsc::unbounded_channel();
        session.send("hello", tx);
        rx.changed().await.unwrap();
        wait_settled(&mut rx).await;
        assert!(!session.messages().is_empty());

        session.clear().await.unwrap();
        assert!(session.messages().is_empty());
        assert!(store.get_agent("chat-1").await.unwrap().is_none());
    }
}
