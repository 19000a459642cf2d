//! The append-only event log (`events/events.jsonl`): cross-process ordering
//! and the substrate for cold-rig detection.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Event types that count as rig activity for cold detection. Everything
/// else (`mail`, `spawn`, `kill`, `patrol_started`, ...) is ignored there.
pub const ACTIVITY_TYPES: &[&str] = &[
    "session_start",
    "session_end",
    "sling",
    "hook",
    "done",
    "handoff",
];

impl Event {
    pub fn new(event_type: &str, actor: &str, source: &str) -> Self {
        Self {
            ts: Utc::now(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            source: source.to_string(),
            payload: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_activity(&self) -> bool {
        ACTIVITY_TYPES.contains(&self.event_type.as_str())
    }
}

/// Handle on the town's event log file.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

/// Outcome of a bounded wait for an event.
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    Matched(Box<Event>),
    TimedOut,
    Cancelled,
}

impl EventLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Append one event. Single-line JSON plus newline, O_APPEND.
    pub fn append(&self, event: &Event) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))
    }

    /// Read every parseable event. Unreadable or missing files yield an
    /// empty list; garbage lines are skipped (the log is advisory, readers
    /// fail open).
    pub fn read_all(&self) -> Vec<Event> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                match serde_json::from_str(line) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping malformed event line");
                        None
                    }
                }
            })
            .collect()
    }

    /// The newest activity event whose source is `rig`, if any.
    pub fn last_activity_for(&self, rig: &str) -> Option<Event> {
        self.read_all()
            .into_iter()
            .filter(|e| e.source == rig && e.is_activity())
            .max_by_key(|e| e.ts)
    }

    /// Block until an event with the given type (and source, when set)
    /// arrives, the deadline passes, or `cancel` flips. Events already in
    /// the log when the wait starts do not match.
    pub fn await_event(
        &self,
        event_type: &str,
        source: Option<&str>,
        timeout: Duration,
        cancel: &Arc<AtomicBool>,
    ) -> anyhow::Result<AwaitOutcome> {
        let start_len = self.read_all().len();
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(AwaitOutcome::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(AwaitOutcome::TimedOut);
            }

            let events = self.read_all();
            if let Some(event) = events.into_iter().skip(start_len).find(|e| {
                e.event_type == event_type && source.is_none_or(|s| e.source == s)
            }) {
                return Ok(AwaitOutcome::Matched(Box::new(event)));
            }

            std::thread::sleep(Duration::from_millis(100));
        }
    }
}
