//! Wave scheduling: peel a `blocks` DAG into dependency-ordered layers.

use std::collections::{BTreeMap, BTreeSet};

use crate::beads::{Bead, Beads, DepType, ListFilter};
use crate::beads::bead::DepDirection;
use crate::error::GtError;

/// One scheduling wave: every member's blockers are satisfied by earlier
/// waves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub number: usize,
    pub bead_ids: Vec<String>,
}

/// Compute waves over `beads` with the given `blocks` edges, expressed as
/// `(blocker, blocked)` pairs.
///
/// Only task-like beads participate; epics and convoys never appear in a
/// wave, and edges touching them are ignored. A cycle among the remaining
/// nodes is `Cycle`.
pub fn compute_waves(
    beads: &[Bead],
    edges: &[(String, String)],
) -> anyhow::Result<Vec<Wave>> {
    let tasks: BTreeSet<&str> = beads
        .iter()
        .filter(|b| b.bead_type.is_task_like())
        .map(|b| b.id.as_str())
        .collect();

    // In-degree in the blocked-by relation, restricted to task-like nodes.
    let mut in_degree: BTreeMap<&str, usize> = tasks.iter().map(|id| (*id, 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (blocker, blocked) in edges {
        if !tasks.contains(blocker.as_str()) || !tasks.contains(blocked.as_str()) {
            continue;
        }
        *in_degree.entry(blocked.as_str()).or_default() += 1;
        dependents
            .entry(blocker.as_str())
            .or_default()
            .push(blocked.as_str());
    }

    let mut waves = Vec::new();
    let mut remaining = tasks.len();
    let mut number = 0;

    while remaining > 0 {
        let ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        if ready.is_empty() {
            let stuck: Vec<&str> = in_degree.keys().copied().collect();
            return Err(GtError::Cycle(format!(
                "no progress with {} beads remaining: {}",
                stuck.len(),
                stuck.join(", ")
            ))
            .into());
        }

        number += 1;
        for id in &ready {
            in_degree.remove(id);
            for dependent in dependents.remove(id).unwrap_or_default() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg = deg.saturating_sub(1);
                }
            }
        }
        remaining -= ready.len();
        waves.push(Wave {
            number,
            bead_ids: ready.into_iter().map(str::to_string).collect(),
        });
    }

    Ok(waves)
}

/// Load an epic's subtasks and their `blocks` edges, then compute waves.
pub fn epic_waves(store: &dyn Beads, epic_id: &str) -> anyhow::Result<Vec<Wave>> {
    let subtasks = store.list(&ListFilter {
        parent: Some(epic_id.to_string()),
        ..ListFilter::default()
    })?;

    let mut edges = Vec::new();
    for bead in &subtasks {
        for dep in store.dep_list(&bead.id, DepDirection::Up, Some(DepType::Blocks))? {
            edges.push((dep.depends_on_id, dep.issue_id));
        }
    }
    compute_waves(&subtasks, &edges)
}
