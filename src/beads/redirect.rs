//! Redirect pointers: a workspace `.beads/` directory whose `redirect` file
//! names another beads directory presents that directory as a view.
//!
//! The pointer is a path relative to the workspace directory (the parent of
//! the `.beads` directory holding it), so a polecat workspace carries
//! `polecats/<name>/.beads/redirect` -> `../../mayor/rig/.beads`.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::GtError;

/// Redirects may nest; resolution is capped to keep pointer loops from
/// walking forever.
pub const MAX_REDIRECT_DEPTH: usize = 8;

/// Follow `redirect` files from `dir` to the concrete beads directory.
/// Exceeding [`MAX_REDIRECT_DEPTH`] hops is `Invalid`.
pub fn resolve_beads_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    let mut current = dir.to_path_buf();
    let mut hops = 0;

    loop {
        let pointer = current.join("redirect");
        if !pointer.is_file() {
            return Ok(normalize(&current));
        }
        if hops == MAX_REDIRECT_DEPTH {
            return Err(GtError::Invalid(format!(
                "redirect chain from {} exceeds {MAX_REDIRECT_DEPTH} levels",
                dir.display()
            ))
            .into());
        }
        let target = std::fs::read_to_string(&pointer)
            .with_context(|| format!("reading {}", pointer.display()))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(GtError::Invalid(format!("empty redirect at {}", pointer.display())).into());
        }
        let base = current.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        current = base.join(target);
        hops += 1;
    }
}

/// Write a redirect pointer for a workspace view.
pub fn write_redirect(beads_dir: &Path, target: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(beads_dir)?;
    std::fs::write(beads_dir.join("redirect"), format!("{target}\n"))
        .with_context(|| format!("writing redirect in {}", beads_dir.display()))
}

/// Collapse `.` and `..` components lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
