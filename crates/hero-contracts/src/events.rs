use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

const RESERVED_KEYS: [&str; 3] = ["type", "invocation_id", "ts"];

#[derive(Debug)]
struct AuditSink {
    path: PathBuf,
    append: Mutex<()>,
}

/// JSONL audit trail of hero image invocations.
///
/// Each line holds `type`, `invocation_id` and `ts` plus the event payload.
/// Writers derived with [`EventWriter::next_invocation`] append to the same
/// file under one lock, so lines from concurrent invocations never interleave.
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Arc<AuditSink>,
    invocation_id: String,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, invocation_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(AuditSink {
                path: path.into(),
                append: Mutex::new(()),
            }),
            invocation_id: invocation_id.into(),
        }
    }

    pub fn for_new_invocation(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    /// Writer for another invocation on the same trail.
    pub fn next_invocation(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            invocation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.sink.path
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Appends one event and returns the line as written. Payload keys that
    /// collide with the envelope fields are dropped.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        if let Some(parent) = self.sink.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _append = self
            .sink
            .append
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.sink.path)?
            .write_all(line.as_bytes())?;
        Ok(event)
    }

    /// [`EventWriter::emit`] for callers that must not fail on audit I/O.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            log::warn!(
                "audit event '{event_type}' not written to {}: {err:#}",
                self.sink.path.display()
            );
        }
    }

    fn envelope(&self, event_type: &str, payload: EventPayload) -> Value {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert(
            "invocation_id".to_string(),
            Value::from(self.invocation_id.as_str()),
        );
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        for (key, value) in payload {
            if RESERVED_KEYS.contains(&key.as_str()) {
                log::debug!("audit payload key '{key}' shadows the envelope; dropped");
                continue;
            }
            event.insert(key, value);
        }
        Value::Object(event)
    }
}
