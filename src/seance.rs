//! Auto-seance: recovering working context from a predecessor session when
//! an agent wakes up in a cold rig.
//!
//! Everything here fails open. A seance that cannot run produces no output
//! and never blocks agent startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::identity::Role;
use crate::config::SeanceConfig;
use crate::error::GtError;
use crate::events::EventLog;
use crate::town::write_json_atomic;

/// The fixed prompt handed to the summarizer.
pub const SEANCE_PROMPT: &str = "Provide a brief handoff summary for the next agent: \
(1) What were you working on? (2) What did you complete? (3) What's still in progress \
or blocked? (4) Any decisions or context the next agent should know? (5) Any gotchas \
or things that didn't work? Keep total response under 500 words.";

/// Shell metacharacters rejected in session ids before they go anywhere
/// near a subprocess.
const SHELL_META: &str = ";&|`$(){}[]<>\\\"'";

/// The external summarizer seam.
pub trait Summarizer {
    fn summarize(
        &self,
        session_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> anyhow::Result<String>;
}

/// Production summarizer: resumes the predecessor session in the LLM runtime
/// and captures its answer. Never retried.
pub struct CliSummarizer {
    program: String,
}

impl CliSummarizer {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Summarizer for CliSummarizer {
    fn summarize(
        &self,
        session_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> anyhow::Result<String> {
        let output = crate::subprocess::Tool::new(&self.program)
            .args(&["--resume", session_id, "-p", prompt])
            .timeout(timeout)
            .run_ok()?;
        Ok(output.stdout.trim().to_string())
    }
}

/// One cached handoff summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSummary {
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

type SeanceCache = BTreeMap<String, CachedSummary>;

/// Why a seance produced no output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeanceOutcome {
    /// The formatted handoff block.
    Produced(String),
    Skipped { reason: String },
}

impl SeanceOutcome {
    pub const fn output(&self) -> Option<&String> {
        match self {
            Self::Produced(text) => Some(text),
            Self::Skipped { .. } => None,
        }
    }
}

/// Validate a session id before handing it to the summarizer: non-empty and
/// free of shell metacharacters.
pub fn validate_session_id(session_id: &str) -> anyhow::Result<()> {
    if session_id.trim().is_empty() {
        return Err(GtError::Invalid("empty session id".into()).into());
    }
    if let Some(bad) = session_id.chars().find(|c| SHELL_META.contains(*c)) {
        return Err(GtError::Invalid(format!(
            "session id contains shell metacharacter {bad:?}"
        ))
        .into());
    }
    Ok(())
}

/// Truncate a session id for display, on character boundaries, ending with
/// an ellipsis when anything was cut.
fn truncate_session_id(session_id: &str, max_chars: usize) -> String {
    if session_id.chars().count() <= max_chars {
        return session_id.to_string();
    }
    let kept: String = session_id.chars().take(max_chars).collect();
    format!("{kept}…")
}

pub struct Seance<'a> {
    events: &'a EventLog,
    summarizer: &'a dyn Summarizer,
    cache_path: PathBuf,
    config: SeanceConfig,
}

impl<'a> Seance<'a> {
    pub fn new(
        events: &'a EventLog,
        summarizer: &'a dyn Summarizer,
        cache_path: &Path,
        config: SeanceConfig,
    ) -> Self {
        Self {
            events,
            summarizer,
            cache_path: cache_path.to_path_buf(),
            config,
        }
    }

    /// Run the seance for an agent starting up. `current_session` is the
    /// caller's own session id, excluded from predecessor selection.
    pub fn run(&self, role: Role, rig: &str, current_session: &str) -> SeanceOutcome {
        match self.try_run(role, rig, current_session) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(error = %e, "seance failed open");
                SeanceOutcome::Skipped {
                    reason: format!("seance error: {e}"),
                }
            }
        }
    }

    fn try_run(
        &self,
        role: Role,
        rig: &str,
        current_session: &str,
    ) -> anyhow::Result<SeanceOutcome> {
        if !matches!(role, Role::Crew | Role::Polecat) {
            return Ok(SeanceOutcome::Skipped {
                reason: format!("role {role} has no seance"),
            });
        }
        if !self.config.enabled {
            return Ok(SeanceOutcome::Skipped {
                reason: "seance disabled".to_string(),
            });
        }

        let now = Utc::now();
        let cold_threshold = to_delta(self.config.cold_threshold()?);

        // A rig with recent activity is warm; the new agent can pick up
        // context the ordinary way.
        if let Some(last) = self.events.last_activity_for(rig) {
            if now - last.ts < cold_threshold {
                return Ok(SeanceOutcome::Skipped {
                    reason: "rig is warm".to_string(),
                });
            }
        }

        let min_age = to_delta(self.config.min_session_age()?);
        let predecessor = self
            .events
            .read_all()
            .into_iter()
            .filter(|e| e.event_type == "session_start" && e.source == rig)
            .filter(|e| now - e.ts >= min_age)
            .filter(|e| session_id_of(e) != current_session)
            .max_by_key(|e| e.ts);

        let Some(predecessor) = predecessor else {
            return Ok(SeanceOutcome::Skipped {
                reason: "rig cold".to_string(),
            });
        };
        let predecessor_id = session_id_of(&predecessor);
        validate_session_id(&predecessor_id)?;

        let summary = match self.cached(&predecessor_id)? {
            Some(cached) => cached,
            None => {
                let timeout = self.config.timeout()?;
                let summary =
                    self.summarizer
                        .summarize(&predecessor_id, SEANCE_PROMPT, timeout)?;
                if summary.is_empty() {
                    return Ok(SeanceOutcome::Skipped {
                        reason: "summarizer returned nothing".to_string(),
                    });
                }
                self.store_cache(&predecessor_id, &summary)?;
                summary
            }
        };

        Ok(SeanceOutcome::Produced(format_handoff(
            &predecessor_id,
            predecessor.ts,
            &summary,
        )))
    }

    fn cached(&self, session_id: &str) -> anyhow::Result<Option<String>> {
        let Ok(text) = std::fs::read_to_string(&self.cache_path) else {
            return Ok(None);
        };
        let cache: SeanceCache = match serde_json::from_str(&text) {
            Ok(cache) => cache,
            // A clobbered cache file just re-derives.
            Err(_) => return Ok(None),
        };
        let ttl = to_delta(self.config.cache_ttl()?);
        Ok(cache
            .get(session_id)
            .filter(|entry| Utc::now() - entry.timestamp < ttl)
            .map(|entry| entry.summary.clone()))
    }

    fn store_cache(&self, session_id: &str, summary: &str) -> anyhow::Result<()> {
        let mut cache: SeanceCache = std::fs::read_to_string(&self.cache_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        cache.insert(
            session_id.to_string(),
            CachedSummary {
                summary: summary.to_string(),
                timestamp: Utc::now(),
            },
        );
        write_json_atomic(&self.cache_path, &cache)
    }
}

fn session_id_of(event: &crate::events::Event) -> String {
    event
        .payload
        .as_ref()
        .and_then(|p| p.get("session_id"))
        .and_then(|v| v.as_str())
        .unwrap_or(&event.actor)
        .to_string()
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn format_handoff(session_id: &str, started_at: DateTime<Utc>, summary: &str) -> String {
    let short = truncate_session_id(session_id, 12);
    format!(
        "=== Auto-Seance Context Recovery ===\n\
         Previous agent: {short} (session started {})\n\
         \n\
         {summary}\n\
         ====================================",
        started_at.format("%Y-%m-%d %H:%M UTC")
    )
}
