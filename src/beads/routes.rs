//! Prefix routing: which bead directory serves a given bead id.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::bead::id_prefix;
use super::redirect::resolve_beads_dir;
use crate::error::GtError;

/// One line of `.beads/routes.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub path: String,
}

/// The routing table. `hq-` always routes to the town root and never appears
/// in the file.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

pub const HQ_PREFIX: &str = "hq-";

impl RouteTable {
    /// Load from `routes.jsonl`. A missing file is an empty table.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut routes = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let route: Route = serde_json::from_str(line)
                .with_context(|| format!("parsing {} line {}", path.display(), n + 1))?;
            routes.push(route);
        }
        Ok(Self { routes })
    }

    /// Append a route, rewriting the whole file. Duplicate prefixes are
    /// `Exists`.
    pub fn add(path: &Path, route: Route) -> anyhow::Result<()> {
        let mut table = Self::load(path)?;
        if route.prefix == HQ_PREFIX || table.routes.iter().any(|r| r.prefix == route.prefix) {
            return Err(GtError::Exists(format!("route {}", route.prefix)).into());
        }
        table.routes.push(route);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for r in &table.routes {
            out.push_str(&serde_json::to_string(r)?);
            out.push('\n');
        }
        std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// The relative path serving `prefix`, longest match first.
    pub fn path_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.routes
            .iter()
            .filter(|r| prefix.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
            .map(|r| r.path.as_str())
    }

    /// Resolve the concrete beads directory for a bead id, chasing redirects.
    /// An id without a routable prefix is a hard error.
    pub fn resolve(&self, town_root: &Path, id: &str) -> anyhow::Result<PathBuf> {
        let prefix =
            id_prefix(id).ok_or_else(|| GtError::NotFound(format!("unroutable id {id:?}")))?;

        let candidate = if prefix == HQ_PREFIX {
            town_root.join(".beads")
        } else {
            let path = self
                .path_for_prefix(prefix)
                .ok_or_else(|| GtError::NotFound(format!("no route for prefix {prefix:?}")))?;
            town_root.join(path).join(".beads")
        };

        resolve_beads_dir(&candidate)
    }
}
