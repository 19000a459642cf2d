//! Bead record types shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        variants: [ $( ($variant:ident, $str:expr) ),+ $(,)? ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
        }

        impl $name {
            /// The wire string for this variant.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $str, )+
                }
            }

            pub const ALL: &'static [Self] = &[ $( Self::$variant, )+ ];
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::GtError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $str => Ok(Self::$variant), )+
                    other => Err(crate::error::GtError::Invalid(format!(
                        concat!("unknown ", stringify!($name), " {:?}"),
                        other
                    ))),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_enum! {
    /// The record type of a bead.
    BeadType, default = Task,
    variants: [
        (Task, "task"),
        (Epic, "epic"),
        (Convoy, "convoy"),
        (Agent, "agent"),
        (Rig, "rig"),
        (Route, "route"),
        (Config, "config"),
        (Message, "message"),
        (Queue, "queue"),
        (Mr, "mr"),
        (Bug, "bug"),
        (Patrol, "patrol"),
        (Wisp, "wisp"),
    ]
}

string_enum! {
    /// Lifecycle status. Closure is soft: closed beads stay readable.
    BeadStatus, default = Open,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Hooked, "hooked"),
        (Pinned, "pinned"),
        (Closed, "closed"),
    ]
}

string_enum! {
    /// Dependency edge types.
    DepType, default = Blocks,
    variants: [
        (Blocks, "blocks"),
        (ParentChild, "parent-child"),
        (WaitsFor, "waits-for"),
        (ConditionalBlocks, "conditional-blocks"),
        (Tracks, "tracks"),
    ]
}

impl BeadType {
    /// Task-like beads participate in wave scheduling; epics and convoys are
    /// structural and never appear in a wave.
    pub const fn is_task_like(self) -> bool {
        !matches!(self, Self::Epic | Self::Convoy)
    }
}

/// The universal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    #[serde(rename = "issue_type", default)]
    pub bead_type: BeadType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: BeadStatus,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Bead {
    /// The routing prefix: everything through the first `-`, e.g. `"gt-"`.
    pub fn prefix(&self) -> Option<&str> {
        id_prefix(&self.id)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// First label value for a `tag:` family, e.g. `label_value("queue")`
    /// over `queue:reviews` yields `Some("reviews")`.
    pub fn label_value(&self, tag: &str) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|l| l.strip_prefix(tag)?.strip_prefix(':'))
    }

    /// All labels in a `tag:` family.
    pub fn label_values<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> {
        self.labels
            .iter()
            .filter_map(move |l| l.strip_prefix(tag)?.strip_prefix(':'))
    }
}

/// Extract the routing prefix from a bead id (`"gt-epic-auth"` → `"gt-"`).
pub fn id_prefix(id: &str) -> Option<&str> {
    let dash = id.find('-')?;
    Some(&id[..=dash])
}

/// A directed edge between two beads. Edges are not beads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,
    pub depends_on_id: String,
    #[serde(rename = "type")]
    pub dep_type: DepType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

/// Conjunction filter for listing beads.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<BeadStatus>,
    pub assignee: Option<String>,
    pub bead_type: Option<BeadType>,
    pub parent: Option<String>,
    pub labels: Vec<String>,
    pub priority_at_least: Option<i64>,
}

impl ListFilter {
    pub fn matches(&self, bead: &Bead) -> bool {
        if let Some(status) = self.status {
            if bead.status != status {
                return false;
            }
        }
        if let Some(ref assignee) = self.assignee {
            if &bead.assignee != assignee {
                return false;
            }
        }
        if let Some(bead_type) = self.bead_type {
            if bead.bead_type != bead_type {
                return false;
            }
        }
        if let Some(ref parent) = self.parent {
            if &bead.parent != parent {
                return false;
            }
        }
        if let Some(min) = self.priority_at_least {
            if bead.priority < min {
                return false;
            }
        }
        self.labels.iter().all(|l| bead.has_label(l))
    }
}

/// Direction for dependency listing relative to a bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepDirection {
    /// Edges where the bead depends on others.
    Up,
    /// Edges where others depend on the bead.
    Down,
    Both,
}

impl DepDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Both => "both",
        }
    }
}

#[cfg(test)]
pub fn test_bead(id: &str, bead_type: BeadType) -> Bead {
    Bead {
        id: id.to_string(),
        bead_type,
        title: format!("bead {id}"),
        description: String::new(),
        status: BeadStatus::Open,
        priority: 2,
        assignee: String::new(),
        parent: String::new(),
        labels: Vec::new(),
        created_at: Utc::now(),
        updated_at: None,
    }
}
