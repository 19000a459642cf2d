//! Typed side-fields embedded as `key: value` lines in bead descriptions.
//!
//! The description stays free text; these accessors are the only way the
//! core reads or writes the embedded fields, so callers never munge raw
//! description text themselves.

use std::fmt;

use crate::error::GtError;

/// Read the value of an embedded `key: value` line, if present.
pub fn get_field<'a>(description: &'a str, key: &str) -> Option<&'a str> {
    description.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k.trim() == key {
            Some(v.trim())
        } else {
            None
        }
    })
}

/// Set (replace or append) embedded `key: value` lines, leaving all other
/// description text untouched.
pub fn set_fields(description: &str, pairs: &[(&str, &str)]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for line in description.lines() {
        let replaced = line.split_once(':').and_then(|(k, _)| {
            let k = k.trim();
            pairs
                .iter()
                .find(|(key, _)| *key == k)
                .map(|(key, value)| {
                    seen.push(*key);
                    format!("{key}: {value}")
                })
        });
        lines.push(replaced.unwrap_or_else(|| line.to_string()));
    }

    for (key, value) in pairs {
        if !seen.contains(key) {
            lines.push(format!("{key}: {value}"));
        }
    }

    lines.join("\n")
}

/// Epic lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpicState {
    Drafting,
    Ready,
    InProgress,
    Review,
    Submitted,
    Landed,
    Closed,
}

impl EpicState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Submitted => "submitted",
            Self::Landed => "landed",
            Self::Closed => "closed",
        }
    }

    /// Forward transitions only; `closed` is reachable from anywhere.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Drafting, Self::Ready)
                | (Self::Ready, Self::InProgress)
                | (Self::InProgress, Self::Review)
                | (Self::Review, Self::Submitted)
                | (Self::InProgress, Self::Submitted)
                | (Self::Submitted, Self::Landed)
                | (_, Self::Closed)
        )
    }
}

impl fmt::Display for EpicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EpicState {
    type Err = GtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drafting" => Ok(Self::Drafting),
            "ready" => Ok(Self::Ready),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "submitted" => Ok(Self::Submitted),
            "landed" => Ok(Self::Landed),
            "closed" => Ok(Self::Closed),
            other => Err(GtError::Invalid(format!("unknown epic state {other:?}"))),
        }
    }
}

/// The typed view over an epic bead's embedded fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpicFields {
    pub state: EpicState,
    pub integration_branch: Option<String>,
    pub contributing_md: Option<String>,
    pub upstream_prs: Vec<String>,
    pub subtask_count: Option<u64>,
    pub completed_count: Option<u64>,
}

impl EpicFields {
    /// Decode from a description; a missing `epic_state` means `drafting`.
    pub fn parse(description: &str) -> anyhow::Result<Self> {
        let state = match get_field(description, "epic_state") {
            Some(s) => s.parse()?,
            None => EpicState::Drafting,
        };
        let count = |key: &str| -> anyhow::Result<Option<u64>> {
            match get_field(description, key) {
                None => Ok(None),
                Some(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|_| GtError::Invalid(format!("bad {key}: {raw:?}")).into()),
            }
        };
        Ok(Self {
            state,
            integration_branch: get_field(description, "integration_branch").map(str::to_string),
            contributing_md: get_field(description, "contributing_md").map(str::to_string),
            upstream_prs: get_field(description, "upstream_prs")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            subtask_count: count("subtask_count")?,
            completed_count: count("completed_count")?,
        })
    }

    /// Re-embed into a description, preserving surrounding prose.
    pub fn apply(&self, description: &str) -> String {
        let state = self.state.to_string();
        let mut pairs: Vec<(&str, String)> = vec![("epic_state", state)];
        if let Some(ref branch) = self.integration_branch {
            pairs.push(("integration_branch", branch.clone()));
        }
        if let Some(ref path) = self.contributing_md {
            pairs.push(("contributing_md", path.clone()));
        }
        if !self.upstream_prs.is_empty() {
            pairs.push(("upstream_prs", self.upstream_prs.join(", ")));
        }
        if let Some(n) = self.subtask_count {
            pairs.push(("subtask_count", n.to_string()));
        }
        if let Some(n) = self.completed_count {
            pairs.push(("completed_count", n.to_string()));
        }
        let borrowed: Vec<(&str, &str)> =
            pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        set_fields(description, &borrowed)
    }
}

/// Embedded fields on a subtask created from a plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskFields {
    pub tier: Option<String>,
    pub instantiated_from: String,
    pub step: String,
}

impl SubtaskFields {
    pub fn parse(description: &str) -> Self {
        Self {
            tier: get_field(description, "tier").map(str::to_string),
            instantiated_from: get_field(description, "instantiated_from")
                .unwrap_or_default()
                .to_string(),
            step: get_field(description, "step").unwrap_or_default().to_string(),
        }
    }

    pub fn apply(&self, description: &str) -> String {
        let mut pairs: Vec<(&str, &str)> = vec![
            ("instantiated_from", self.instantiated_from.as_str()),
            ("step", self.step.as_str()),
        ];
        if let Some(ref tier) = self.tier {
            pairs.push(("tier", tier.as_str()));
        }
        set_fields(description, &pairs)
    }
}
