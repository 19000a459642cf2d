//! The `Beads` trait: the seam between the core and the issue-database
//! backend. Production goes through the `bd` CLI; tests use the in-memory
//! store.

use super::bead::{Bead, BeadStatus, BeadType, DepDirection, DepType, Dependency, ListFilter};

/// Options for creating a bead. The backend stamps `created_at` and sets the
/// initial status to `open`.
#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub bead_type: BeadType,
    pub title: String,
    pub description: String,
    pub parent: Option<String>,
    pub labels: Vec<String>,
    pub priority: Option<i64>,
}

/// Partial mutation of a bead. `None` leaves a field untouched. Label edits
/// apply removals before additions.
#[derive(Debug, Clone, Default)]
pub struct UpdateOpts {
    pub status: Option<BeadStatus>,
    pub assignee: Option<String>,
    pub description: Option<String>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
}

impl UpdateOpts {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.assignee.is_none()
            && self.description.is_none()
            && self.add_labels.is_empty()
            && self.remove_labels.is_empty()
    }
}

/// Bead store operations. Implementations retry transient backend errors
/// (3x, exponential backoff from ~100 ms); every other error surfaces to the
/// caller unchanged.
pub trait Beads {
    /// Create a bead with a backend-generated id.
    fn create(&self, opts: &CreateOpts) -> anyhow::Result<Bead>;

    /// Create a bead with a caller-chosen id; `Exists` when taken.
    fn create_with_id(&self, id: &str, opts: &CreateOpts) -> anyhow::Result<Bead>;

    /// Fetch one bead; `NotFound` when absent.
    fn show(&self, id: &str) -> anyhow::Result<Bead>;

    /// Apply a partial mutation atomically; `NotFound` when absent.
    fn update(&self, id: &str, opts: &UpdateOpts) -> anyhow::Result<()>;

    /// All beads matching the conjunction filter.
    fn list(&self, filter: &ListFilter) -> anyhow::Result<Vec<Bead>>;

    /// Soft-close; `force` is required for pinned beads.
    fn close(&self, id: &str, reason: &str, force: bool) -> anyhow::Result<()>;

    /// Record a directed edge `from` → `to`: for `blocks`, `from` blocks
    /// `to`; for `tracks`, `from` tracks `to`. The backend stores the edge
    /// on the dependent side (`issue_id = to`, `depends_on_id = from`).
    fn add_dependency(&self, from: &str, to: &str, dep_type: DepType) -> anyhow::Result<()>;

    /// Edges touching `id`: `Up` lists what `id` depends on (`issue_id ==
    /// id`), `Down` lists what depends on `id` (`depends_on_id == id`).
    fn dep_list(
        &self,
        id: &str,
        direction: DepDirection,
        dep_type: Option<DepType>,
    ) -> anyhow::Result<Vec<Dependency>>;
}

/// Children of an epic: every bead whose `parent` is the epic id.
pub fn epic_subtasks(store: &dyn Beads, epic_id: &str) -> anyhow::Result<Vec<Bead>> {
    store.list(&ListFilter {
        parent: Some(epic_id.to_string()),
        ..ListFilter::default()
    })
}
