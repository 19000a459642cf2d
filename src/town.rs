//! Town root discovery and the mayor's records (`town.json`, `rigs.json`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GtError;

/// `mayor/town.json`: identity record for the town.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TownRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl TownRecord {
    pub fn new(name: &str) -> Self {
        Self {
            record_type: "town".to_string(),
            version: 1,
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// One rig's registration inside `mayor/rigs.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigEntry {
    pub git_url: String,
    pub added_at: DateTime<Utc>,
    pub beads: RigBeads,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigBeads {
    pub prefix: String,
}

/// `mayor/rigs.json`: the registry of managed rigs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigsFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rigs: BTreeMap<String, RigEntry>,
}

const fn default_version() -> u32 {
    1
}

/// Handle on a town directory. All paths below the root derive from here.
#[derive(Debug, Clone)]
pub struct Town {
    root: PathBuf,
}

impl Town {
    /// Open a town at an explicit root. Fails unless `mayor/town.json` exists.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let marker = root.join("mayor").join("town.json");
        if !marker.is_file() {
            return Err(GtError::NotFound(format!("no town at {}", root.display())).into());
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Discover the town root: `GT_TOWN_ROOT`, then an upward walk from the
    /// current directory, then `~/gt`.
    pub fn discover() -> anyhow::Result<Self> {
        if let Ok(root) = std::env::var("GT_TOWN_ROOT") {
            return Self::open(Path::new(&root));
        }

        if let Ok(cwd) = std::env::current_dir() {
            let mut dir = cwd.as_path();
            loop {
                if dir.join("mayor").join("town.json").is_file() {
                    return Self::open(dir);
                }
                match dir.parent() {
                    Some(parent) => dir = parent,
                    None => break,
                }
            }
        }

        if let Some(home) = dirs::home_dir() {
            let fallback = home.join("gt");
            if fallback.join("mayor").join("town.json").is_file() {
                return Self::open(&fallback);
            }
        }

        Err(GtError::NotFound("no town found (set GT_TOWN_ROOT or run inside one)".into()).into())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The town-level bead directory (`hq-` routes here).
    pub fn beads_dir(&self) -> PathBuf {
        self.root.join(".beads")
    }

    pub fn routes_path(&self) -> PathBuf {
        self.root.join(".beads").join("routes.jsonl")
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join("events").join("events.jsonl")
    }

    pub fn wisp_dir(&self) -> PathBuf {
        self.root.join(".beads-wisp")
    }

    pub fn rig_config_path(&self, rig: &str) -> PathBuf {
        self.wisp_dir().join("config").join(format!("{rig}.json"))
    }

    pub fn seance_cache_path(&self) -> PathBuf {
        self.wisp_dir().join("seance-cache.json")
    }

    pub fn town_record(&self) -> anyhow::Result<TownRecord> {
        let path = self.root.join("mayor").join("town.json");
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn load_rigs(&self) -> anyhow::Result<RigsFile> {
        let path = self.root.join("mayor").join("rigs.json");
        if !path.is_file() {
            return Ok(RigsFile::default());
        }
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write `rigs.json` atomically (write-temp-then-rename) so concurrent
    /// readers see either the old or the new complete value.
    pub fn save_rigs(&self, rigs: &RigsFile) -> anyhow::Result<()> {
        let path = self.root.join("mayor").join("rigs.json");
        write_json_atomic(&path, rigs)
    }

    /// Look up a registered rig, with `NotFound` naming the rig.
    pub fn rig(&self, name: &str) -> anyhow::Result<RigEntry> {
        self.load_rigs()?
            .rigs
            .get(name)
            .cloned()
            .ok_or_else(|| GtError::NotFound(format!("rig {name}")).into())
    }
}

/// Serialize `value` to `path` via a temp file + rename in the same directory.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| GtError::Invalid(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().map_or_else(
            || "json".to_string(),
            |n| n.to_string_lossy().into_owned()
        ),
        std::process::id()
    ));
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaffold(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir.join("mayor")).unwrap();
        let record = TownRecord::new(name);
        write_json_atomic(&dir.join("mayor").join("town.json"), &record).unwrap();
    }

    #[test]
    fn open_requires_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Town::open(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::NotFound(_))
        ));

        scaffold(tmp.path(), "testtown");
        let town = Town::open(tmp.path()).unwrap();
        assert_eq!(town.town_record().unwrap().name, "testtown");
    }

    #[test]
    fn rigs_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        scaffold(tmp.path(), "t");
        let town = Town::open(tmp.path()).unwrap();

        assert!(town.load_rigs().unwrap().rigs.is_empty());

        let mut rigs = RigsFile::default();
        rigs.rigs.insert(
            "gastown".to_string(),
            RigEntry {
                git_url: "git@example.com:org/gastown.git".to_string(),
                added_at: Utc::now(),
                beads: RigBeads {
                    prefix: "gt-".to_string(),
                },
            },
        );
        town.save_rigs(&rigs).unwrap();

        let loaded = town.load_rigs().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.rigs["gastown"].beads.prefix, "gt-");
        assert!(town.rig("gastown").is_ok());
        assert!(town.rig("missing").is_err());
    }

    #[test]
    fn derived_paths() {
        let tmp = tempfile::tempdir().unwrap();
        scaffold(tmp.path(), "t");
        let town = Town::open(tmp.path()).unwrap();
        assert!(town.routes_path().ends_with(".beads/routes.jsonl"));
        assert!(town.events_path().ends_with("events/events.jsonl"));
        assert!(
            town.rig_config_path("gastown")
                .ends_with(".beads-wisp/config/gastown.json")
        );
    }
}
