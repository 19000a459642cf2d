//! Per-rig tunables (`.beads-wisp/config/<rig>.json`) and the environment
//! knobs the core consults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::GtError;

/// Default latency budget for the anchor health gate, in milliseconds.
pub const DEFAULT_ANCHOR_BUDGET_MS: u64 = 250;

/// Per-rig configuration. Missing file or missing keys mean defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RigConfig {
    #[serde(default)]
    pub seance: SeanceConfig,
}

/// Auto-seance tunables. Durations are strings like `"24h"`, `"90m"`,
/// `"30s"`; a present-but-unparseable value is a hard error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cold_threshold")]
    pub cold_threshold: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_min_session_age")]
    pub min_session_age: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: String,
}

impl Default for SeanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cold_threshold: default_cold_threshold(),
            timeout: default_timeout(),
            min_session_age: default_min_session_age(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

const fn default_true() -> bool {
    true
}
fn default_cold_threshold() -> String {
    "24h".to_string()
}
fn default_timeout() -> String {
    "30s".to_string()
}
fn default_min_session_age() -> String {
    "1h".to_string()
}
fn default_cache_ttl() -> String {
    "1h".to_string()
}

impl SeanceConfig {
    pub fn cold_threshold(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.cold_threshold)
    }

    pub fn timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.timeout)
    }

    pub fn min_session_age(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.min_session_age)
    }

    pub fn cache_ttl(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.cache_ttl)
    }
}

impl RigConfig {
    /// Load the per-rig config, defaulting when the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Parse a duration string: one or more `<int><h|m|s>` terms, e.g. `"24h"`,
/// `"1h30m"`, `"90s"`. Empty or malformed input is `Invalid`.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(GtError::Invalid("empty duration".into()).into());
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut saw_term = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| GtError::Invalid(format!("bad duration {s:?}")))?;
        digits.clear();
        let secs = match ch {
            'h' => n * 3600,
            'm' => n * 60,
            's' => n,
            _ => return Err(GtError::Invalid(format!("bad duration unit {ch:?} in {s:?}")).into()),
        };
        total += Duration::from_secs(secs);
        saw_term = true;
    }

    if !digits.is_empty() || !saw_term {
        return Err(GtError::Invalid(format!("bad duration {s:?}")).into());
    }
    Ok(total)
}

/// Anchor-gate latency budget: `GT_ANCHOR_HEALTH_MAX_LATENCY_MS` when it is
/// a positive integer, else the 250 ms default. Invalid values never error.
pub fn anchor_latency_budget() -> Duration {
    let ms = std::env::var("GT_ANCHOR_HEALTH_MAX_LATENCY_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_ANCHOR_BUDGET_MS);
    Duration::from_millis(ms)
}

/// Read `CLAUDE_AUTOCOMPACT_PCT_OVERRIDE`, warning when the value is set but
/// outside the sensible 30..=90 band. Returns the parsed value either way.
pub fn autocompact_pct_override() -> Option<i64> {
    let raw = std::env::var("CLAUDE_AUTOCOMPACT_PCT_OVERRIDE").ok()?;
    let pct = raw.trim().parse::<i64>().ok()?;
    if !(30..=90).contains(&pct) {
        tracing::warn!(pct, "CLAUDE_AUTOCOMPACT_PCT_OVERRIDE outside 30..=90");
    }
    Some(pct)
}

/// Backend stanza from `.beads/config.yaml` (prefix + daemon options).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub socket: Option<String>,
}

impl BackendConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn bad_durations_are_invalid() {
        for bad in ["", "h", "12", "12x", "1.5h", "one hour"] {
            let err = parse_duration(bad).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<GtError>(), Some(GtError::Invalid(_))),
                "expected Invalid for {bad:?}"
            );
        }
    }

    #[test]
    fn seance_defaults() {
        let cfg = SeanceConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.cold_threshold().unwrap(), Duration::from_secs(86400));
        assert_eq!(cfg.timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(cfg.min_session_age().unwrap(), Duration::from_secs(3600));
        assert_eq!(cfg.cache_ttl().unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rig_config_missing_file_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = RigConfig::load(&tmp.path().join("nope.json")).unwrap();
        assert!(cfg.seance.enabled);
    }

    #[test]
    fn rig_config_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gastown.json");
        std::fs::write(&path, r#"{"seance":{"enabled":false,"coldThreshold":"48h"}}"#).unwrap();
        let cfg = RigConfig::load(&path).unwrap();
        assert!(!cfg.seance.enabled);
        assert_eq!(
            cfg.seance.cold_threshold().unwrap(),
            Duration::from_secs(172_800)
        );
        // untouched keys keep their defaults
        assert_eq!(cfg.seance.timeout, "30s");
    }

    #[test]
    fn anchor_budget_env_fallback() {
        // SAFETY: tests in this module run on one thread per test; the var is
        // removed before returning.
        unsafe { std::env::set_var("GT_ANCHOR_HEALTH_MAX_LATENCY_MS", "abc") };
        assert_eq!(anchor_latency_budget(), Duration::from_millis(250));

        unsafe { std::env::set_var("GT_ANCHOR_HEALTH_MAX_LATENCY_MS", "") };
        assert_eq!(anchor_latency_budget(), Duration::from_millis(250));

        unsafe { std::env::set_var("GT_ANCHOR_HEALTH_MAX_LATENCY_MS", "0") };
        assert_eq!(anchor_latency_budget(), Duration::from_millis(250));

        unsafe { std::env::set_var("GT_ANCHOR_HEALTH_MAX_LATENCY_MS", "750") };
        assert_eq!(anchor_latency_budget(), Duration::from_millis(750));

        unsafe { std::env::remove_var("GT_ANCHOR_HEALTH_MAX_LATENCY_MS") };
        assert_eq!(anchor_latency_budget(), Duration::from_millis(250));
    }

    #[test]
    fn backend_config_yaml_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        let cfg = BackendConfig {
            prefix: "hq-".to_string(),
            daemon: DaemonConfig {
                enabled: true,
                socket: Some("/tmp/bd.sock".to_string()),
            },
        };
        cfg.save(&path).unwrap();
        let loaded = BackendConfig::load(&path).unwrap();
        assert_eq!(loaded.prefix, "hq-");
        assert!(loaded.daemon.enabled);
    }
}
