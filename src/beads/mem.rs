//! In-memory bead store used by unit tests. Mirrors the backend's observable
//! semantics: atomic per-call mutation, single-valued `tag:` label families,
//! soft closure.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;

use super::bead::{Bead, BeadStatus, DepDirection, DepType, Dependency, ListFilter};
use super::store::{Beads, CreateOpts, UpdateOpts};
use crate::error::GtError;

#[derive(Default)]
struct Inner {
    beads: BTreeMap<String, Bead>,
    deps: Vec<Dependency>,
    next_id: u64,
    actor: String,
}

#[derive(Default)]
pub struct MemBeads {
    inner: Mutex<Inner>,
}

impl MemBeads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(actor: &str) -> Self {
        let store = Self::default();
        store.inner.lock().expect("store lock").actor = actor.to_string();
        store
    }

    /// Seed a bead directly, bypassing create semantics.
    pub fn insert(&self, bead: Bead) {
        self.inner
            .lock()
            .expect("store lock")
            .beads
            .insert(bead.id.clone(), bead);
    }

    pub fn dep_count(&self) -> usize {
        self.inner.lock().expect("store lock").deps.len()
    }
}

/// Apply one label, honoring single-valued `tag:` families: a new
/// `claimed-by:alice` displaces an existing `claimed-by:bob`.
fn apply_label(labels: &mut Vec<String>, label: &str) {
    if let Some((tag, _)) = label.split_once(':') {
        labels.retain(|l| l.split_once(':').is_none_or(|(t, _)| t != tag));
    } else if labels.iter().any(|l| l == label) {
        return;
    }
    labels.push(label.to_string());
}

impl Beads for MemBeads {
    fn create(&self, opts: &CreateOpts) -> anyhow::Result<Bead> {
        let id = {
            let mut inner = self.inner.lock().expect("store lock");
            inner.next_id += 1;
            format!("hq-auto-{}", inner.next_id)
        };
        self.create_with_id(&id, opts)
    }

    fn create_with_id(&self, id: &str, opts: &CreateOpts) -> anyhow::Result<Bead> {
        let mut inner = self.inner.lock().expect("store lock");
        if inner.beads.contains_key(id) {
            return Err(GtError::Exists(id.to_string()).into());
        }
        let bead = Bead {
            id: id.to_string(),
            bead_type: opts.bead_type,
            title: opts.title.clone(),
            description: opts.description.clone(),
            status: BeadStatus::Open,
            priority: opts.priority.unwrap_or(2),
            assignee: String::new(),
            parent: opts.parent.clone().unwrap_or_default(),
            labels: opts.labels.clone(),
            created_at: Utc::now(),
            updated_at: None,
        };
        inner.beads.insert(id.to_string(), bead.clone());
        Ok(bead)
    }

    fn show(&self, id: &str) -> anyhow::Result<Bead> {
        self.inner
            .lock()
            .expect("store lock")
            .beads
            .get(id)
            .cloned()
            .ok_or_else(|| GtError::NotFound(id.to_string()).into())
    }

    fn update(&self, id: &str, opts: &UpdateOpts) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        let bead = inner
            .beads
            .get_mut(id)
            .ok_or_else(|| GtError::NotFound(id.to_string()))?;

        if let Some(status) = opts.status {
            bead.status = status;
        }
        if let Some(ref assignee) = opts.assignee {
            bead.assignee.clone_from(assignee);
        }
        if let Some(ref description) = opts.description {
            bead.description.clone_from(description);
        }
        for label in &opts.remove_labels {
            bead.labels.retain(|l| l != label);
        }
        for label in &opts.add_labels {
            apply_label(&mut bead.labels, label);
        }
        bead.updated_at = Some(Utc::now());
        Ok(())
    }

    fn list(&self, filter: &ListFilter) -> anyhow::Result<Vec<Bead>> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .beads
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    fn close(&self, id: &str, _reason: &str, force: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        let bead = inner
            .beads
            .get_mut(id)
            .ok_or_else(|| GtError::NotFound(id.to_string()))?;
        if bead.status == BeadStatus::Pinned && !force {
            return Err(GtError::Invalid(format!("{id} is pinned")).into());
        }
        bead.status = BeadStatus::Closed;
        bead.updated_at = Some(Utc::now());
        Ok(())
    }

    fn add_dependency(&self, from: &str, to: &str, dep_type: DepType) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        if !inner.beads.contains_key(from) {
            return Err(GtError::NotFound(from.to_string()).into());
        }
        if !inner.beads.contains_key(to) {
            return Err(GtError::NotFound(to.to_string()).into());
        }
        let actor = inner.actor.clone();
        // Stored on the dependent side: `to` depends on `from`.
        inner.deps.push(Dependency {
            issue_id: to.to_string(),
            depends_on_id: from.to_string(),
            dep_type,
            created_at: Utc::now(),
            created_by: actor,
        });
        Ok(())
    }

    fn dep_list(
        &self,
        id: &str,
        direction: DepDirection,
        dep_type: Option<DepType>,
    ) -> anyhow::Result<Vec<Dependency>> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .deps
            .iter()
            .filter(|d| match direction {
                DepDirection::Up => d.issue_id == id,
                DepDirection::Down => d.depends_on_id == id,
                DepDirection::Both => d.issue_id == id || d.depends_on_id == id,
            })
            .filter(|d| dep_type.is_none_or(|t| d.dep_type == t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::bead::BeadType;
    use super::super::store::epic_subtasks;
    use super::*;

    #[test]
    fn create_show_roundtrip() {
        let store = MemBeads::new();
        let created = store
            .create_with_id(
                "gt-task-1",
                &CreateOpts {
                    bead_type: BeadType::Task,
                    title: "wire codec".to_string(),
                    description: "step: codec-1".to_string(),
                    ..CreateOpts::default()
                },
            )
            .unwrap();
        let shown = store.show("gt-task-1").unwrap();
        assert_eq!(shown.id, created.id);
        assert_eq!(shown.title, created.title);
        assert_eq!(shown.description, created.description);
        assert_eq!(shown.status, BeadStatus::Open);
    }

    #[test]
    fn create_with_taken_id_is_exists() {
        let store = MemBeads::new();
        let opts = CreateOpts {
            title: "x".to_string(),
            ..CreateOpts::default()
        };
        store.create_with_id("gt-task-1", &opts).unwrap();
        let err = store.create_with_id("gt-task-1", &opts).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Exists(_))
        ));
    }

    #[test]
    fn pinned_close_requires_force() {
        let store = MemBeads::new();
        store
            .create_with_id(
                "gt-task-1",
                &CreateOpts {
                    title: "x".to_string(),
                    ..CreateOpts::default()
                },
            )
            .unwrap();
        store
            .update(
                "gt-task-1",
                &UpdateOpts {
                    status: Some(BeadStatus::Pinned),
                    ..UpdateOpts::default()
                },
            )
            .unwrap();

        assert!(store.close("gt-task-1", "done", false).is_err());
        store.close("gt-task-1", "done", true).unwrap();
        assert_eq!(store.show("gt-task-1").unwrap().status, BeadStatus::Closed);
    }

    #[test]
    fn label_families_are_single_valued() {
        let mut labels = vec!["queue:reviews".to_string(), "urgent".to_string()];
        apply_label(&mut labels, "claimed-by:alice");
        apply_label(&mut labels, "claimed-by:bob");
        assert_eq!(
            labels.iter().filter(|l| l.starts_with("claimed-by:")).count(),
            1
        );
        assert!(labels.contains(&"claimed-by:bob".to_string()));

        apply_label(&mut labels, "urgent");
        assert_eq!(labels.iter().filter(|l| *l == "urgent").count(), 1);
    }

    #[test]
    fn dep_list_directions() {
        let store = MemBeads::with_actor("hq-mayor");
        for id in ["gt-a", "gt-b", "gt-c"] {
            store
                .create_with_id(
                    id,
                    &CreateOpts {
                        title: id.to_string(),
                        ..CreateOpts::default()
                    },
                )
                .unwrap();
        }
        // a blocks b; c tracks a
        store.add_dependency("gt-a", "gt-b", DepType::Blocks).unwrap();
        store.add_dependency("gt-c", "gt-a", DepType::Tracks).unwrap();

        // b depends on a
        let up = store.dep_list("gt-b", DepDirection::Up, None).unwrap();
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].depends_on_id, "gt-a");
        assert_eq!(up[0].created_by, "hq-mayor");

        // a is depended on by b, and tracked by c
        let down = store.dep_list("gt-a", DepDirection::Down, None).unwrap();
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].issue_id, "gt-b");

        let both = store.dep_list("gt-a", DepDirection::Both, None).unwrap();
        assert_eq!(both.len(), 2);

        let tracked = store
            .dep_list("gt-a", DepDirection::Both, Some(DepType::Tracks))
            .unwrap();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].depends_on_id, "gt-c");
    }

    #[test]
    fn subtask_enumeration_by_parent() {
        let store = MemBeads::new();
        store
            .create_with_id(
                "gt-epic-auth",
                &CreateOpts {
                    bead_type: BeadType::Epic,
                    title: "auth".to_string(),
                    ..CreateOpts::default()
                },
            )
            .unwrap();
        for id in ["gt-task-1", "gt-task-2"] {
            store
                .create_with_id(
                    id,
                    &CreateOpts {
                        title: id.to_string(),
                        parent: Some("gt-epic-auth".to_string()),
                        ..CreateOpts::default()
                    },
                )
                .unwrap();
        }
        let subtasks = epic_subtasks(&store, "gt-epic-auth").unwrap();
        assert_eq!(subtasks.len(), 2);
    }
}
