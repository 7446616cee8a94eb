//! Structured log feed for the workbench's log pane.
//!
//! Sessions and the transport tag their tracing events with a `chat_id`
//! field. [`LogFeedLayer`] lifts each event into a [`LogEntry`] with that
//! id pulled out, so the pane can filter the feed per conversation.
//! Delivery is best-effort over a broadcast channel; entries emitted with
//! no subscriber are dropped.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const FEED_CAPACITY: usize = 256;

/// One log event, structured for the pane.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub ts: String,
    pub level: &'static str,
    pub target: String,
    /// The conversation the event belongs to, when the event carried a
    /// `chat_id` field.
    pub chat_id: Option<String>,
    pub message: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    /// Render as one JSON line for wire transports that speak text.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Fan-out point for [`LogEntry`] values. The host creates one feed,
/// installs its layer, and hands receivers to log panes.
pub struct LogFeed {
    tx: broadcast::Sender<LogEntry>,
}

impl LogFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn layer(&self) -> LogFeedLayer {
        LogFeedLayer {
            tx: self.tx.clone(),
        }
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new(FEED_CAPACITY)
    }
}

/// Install tracing with an env-filter (`RUST_LOG`, default `info`), a fmt
/// layer, and the feed's layer. Call once from the host.
pub fn init(feed: &LogFeed) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(feed.layer())
        .init();
}

/// Tracing layer that forwards events to a [`LogFeed`].
pub struct LogFeedLayer {
    tx: broadcast::Sender<LogEntry>,
}

impl<S: Subscriber> Layer<S> for LogFeedLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();

        let mut visitor = EventFields::default();
        event.record(&mut visitor);
        let mut fields = visitor.map;

        let message = take_string(&mut fields, "message").unwrap_or_default();
        let chat_id = take_string(&mut fields, "chat_id");

        let entry = LogEntry {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level_str(meta.level()),
            target: meta.target().to_string(),
            chat_id,
            message,
            fields,
        };

        // Best-effort; dropped when nobody is watching the pane.
        let _ = self.tx.send(entry);
    }
}

fn take_string(
    fields: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    match fields.remove(key)? {
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn level_str(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Collects every event field into a JSON map; `message` and `chat_id`
/// are pulled back out by the layer.
#[derive(Default)]
struct EventFields {
    map: serde_json::Map<String, serde_json::Value>,
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.map.insert(
            field.name().to_string(),
            serde_json::Value::String(format!("{value:?}")),
        );
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.map.insert(
            field.name().to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.map.insert(
            field.name().to_string(),
            serde_json::Value::Number(value.into()),
        );
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.map.insert(
            field.name().to_string(),
            serde_json::Value::Number(value.into()),
        );
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.map
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

// ── Tests ────────────────────────────────────────────────────
