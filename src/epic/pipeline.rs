//! Epic lifecycle: creation (`start`) and plan instantiation (`ready`).

use std::path::{Path, PathBuf};

use super::branch::{BranchContext, DEFAULT_INTEGRATION_TEMPLATE, render_branch_template, slugify};
use super::plan::Plan;
use super::submit::Vcs;
use crate::beads::fields::{EpicFields, EpicState, SubtaskFields};
use crate::beads::{Bead, BeadType, Beads, CreateOpts, DepType, UpdateOpts};
use crate::dispatch::hook::hook;
use crate::error::GtError;
use crate::events::EventLog;

/// Who initiated `start`; controls where the fresh epic gets hooked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOrigin {
    /// A crew or polecat starting their own epic: hook it to them.
    Worker { agent_bead: String },
    /// Mayor-origin: sling to the chosen crew member's bead.
    Mayor { crew_bead: String },
}

impl StartOrigin {
    fn assignee(&self) -> &str {
        match self {
            Self::Worker { agent_bead } | Self::Mayor { crew_bead: agent_bead } => agent_bead,
        }
    }
}

/// Files consulted, in order, when discovering contribution guidelines.
const GUIDELINE_CANDIDATES: &[&str] = &[
    "CONTRIBUTING.md",
    ".github/CONTRIBUTING.md",
    "docs/CONTRIBUTING.md",
    "CONTRIBUTING.rst",
];

/// Locate the contribution-guideline file inside a rig's repo, if any.
pub fn discover_guidelines(repo: &Path) -> Option<String> {
    GUIDELINE_CANDIDATES
        .iter()
        .find(|candidate| repo.join(candidate).is_file())
        .map(|s| (*s).to_string())
}

pub struct EpicPipeline<'a> {
    store: &'a dyn Beads,
    vcs: &'a dyn Vcs,
    events: &'a EventLog,
    repo: PathBuf,
    actor: String,
}

impl<'a> EpicPipeline<'a> {
    pub fn new(
        store: &'a dyn Beads,
        vcs: &'a dyn Vcs,
        events: &'a EventLog,
        repo: &Path,
        actor: &str,
    ) -> Self {
        Self {
            store,
            vcs,
            events,
            repo: repo.to_path_buf(),
            actor: actor.to_string(),
        }
    }

    /// Create an epic in `drafting` and hook it to its owner.
    pub fn start(
        &self,
        rig_prefix: &str,
        title: &str,
        origin: &StartOrigin,
    ) -> anyhow::Result<Bead> {
        let slug = slugify(title);
        if slug.is_empty() {
            return Err(GtError::Invalid(format!("title {title:?} yields an empty slug")).into());
        }
        let epic_id = format!("{rig_prefix}epic-{slug}");

        let fields = EpicFields {
            state: EpicState::Drafting,
            integration_branch: None,
            contributing_md: discover_guidelines(&self.repo),
            upstream_prs: Vec::new(),
            subtask_count: None,
            completed_count: None,
        };

        let epic = self.store.create_with_id(
            &epic_id,
            &CreateOpts {
                bead_type: BeadType::Epic,
                title: title.to_string(),
                description: fields.apply(""),
                ..CreateOpts::default()
            },
        )?;

        hook(self.store, self.events, &epic_id, origin.assignee(), &self.actor)?;
        self.store.show(&epic.id)
    }

    /// Instantiate the epic's plan: subtask beads, `blocks` wiring, the
    /// integration branch, a tracking convoy, and the `ready` transition.
    ///
    /// On partial failure every subtask created so far is closed before the
    /// error surfaces.
    pub fn ready(&self, epic_id: &str, branch_template: Option<&str>) -> anyhow::Result<Vec<Bead>> {
        let epic = self.store.show(epic_id)?;
        let mut fields = EpicFields::parse(&epic.description)?;
        if !fields.state.can_transition_to(EpicState::Ready) {
            return Err(GtError::Invalid(format!(
                "epic {epic_id}: cannot move from {} to ready",
                fields.state
            ))
            .into());
        }

        let plan = Plan::parse(&epic.description)?;

        match self.instantiate(&epic, &plan, &mut fields, branch_template) {
            Ok(subtasks) => Ok(subtasks),
            Err(e) => {
                self.cleanup_partial(epic_id, &plan);
                Err(e)
            }
        }
    }

    fn subtask_id(epic_id: &str, index: usize) -> String {
        format!("{epic_id}.{}", index + 1)
    }

    fn instantiate(
        &self,
        epic: &Bead,
        plan: &Plan,
        fields: &mut EpicFields,
        branch_template: Option<&str>,
    ) -> anyhow::Result<Vec<Bead>> {
        let mut subtasks = Vec::new();
        for (index, step) in plan.steps.iter().enumerate() {
            let description = SubtaskFields {
                tier: step.tier.clone(),
                instantiated_from: epic.id.clone(),
                step: step.step_ref.clone(),
            }
            .apply(&step.instructions);

            let subtask = self.store.create_with_id(
                &Self::subtask_id(&epic.id, index),
                &CreateOpts {
                    bead_type: BeadType::Task,
                    title: step.title.clone(),
                    description,
                    parent: Some(epic.id.clone()),
                    ..CreateOpts::default()
                },
            )?;
            subtasks.push(subtask);
        }

        // Dependency wiring: each Needs entry blocks its dependent.
        for (index, step) in plan.steps.iter().enumerate() {
            for need in &step.needs {
                let dep_index = plan
                    .steps
                    .iter()
                    .position(|s| &s.step_ref == need)
                    .ok_or_else(|| {
                        GtError::Invalid(format!("step {need:?} vanished from the plan"))
                    })?;
                self.store.add_dependency(
                    &Self::subtask_id(&epic.id, dep_index),
                    &Self::subtask_id(&epic.id, index),
                    DepType::Blocks,
                )?;
            }
        }

        // Integration branch off the default branch.
        let template = branch_template.unwrap_or(DEFAULT_INTEGRATION_TEMPLATE);
        let branch = render_branch_template(
            template,
            &BranchContext {
                epic: epic.id.clone(),
                ticket: epic.id.clone(),
                user: self.actor.clone(),
            },
        )?;
        if !self.vcs.branch_exists(&self.repo, &branch)? {
            let base = self.vcs.default_branch(&self.repo)?;
            self.vcs.create_branch(&self.repo, &branch, &base)?;
        }

        // Tracking convoy.
        let convoy = self.store.create_with_id(
            &format!("{}-convoy", epic.id),
            &CreateOpts {
                bead_type: BeadType::Convoy,
                title: format!("convoy for {}", epic.title),
                parent: Some(epic.id.clone()),
                ..CreateOpts::default()
            },
        )?;
        for subtask in &subtasks {
            self.store
                .add_dependency(&convoy.id, &subtask.id, DepType::Tracks)?;
        }

        fields.state = EpicState::Ready;
        fields.integration_branch = Some(branch);
        fields.subtask_count = Some(subtasks.len() as u64);
        fields.completed_count = Some(0);
        self.store.update(
            &epic.id,
            &UpdateOpts {
                description: Some(fields.apply(&epic.description)),
                ..UpdateOpts::default()
            },
        )?;

        Ok(subtasks)
    }

    /// Close whatever subtasks the failed instantiation managed to create.
    fn cleanup_partial(&self, epic_id: &str, plan: &Plan) {
        for index in 0..plan.steps.len() {
            let id = Self::subtask_id(epic_id, index);
            if self.store.show(&id).is_ok() {
                if let Err(e) = self.store.close(&id, "epic ready failed", true) {
                    tracing::warn!(subtask = %id, error = %e, "cleanup close failed");
                }
            }
        }
        let convoy_id = format!("{epic_id}-convoy");
        if self.store.show(&convoy_id).is_ok() {
            let _ = self.store.close(&convoy_id, "epic ready failed", true);
        }
    }

    /// Advance the epic state machine, enforcing legal transitions.
    pub fn transition(&self, epic_id: &str, next: EpicState) -> anyhow::Result<()> {
        let epic = self.store.show(epic_id)?;
        let mut fields = EpicFields::parse(&epic.description)?;
        if fields.state == next {
            return Ok(());
        }
        if !fields.state.can_transition_to(next) {
            return Err(GtError::Invalid(format!(
                "epic {epic_id}: cannot move from {} to {next}",
                fields.state
            ))
            .into());
        }
        fields.state = next;
        self.store.update(
            epic_id,
            &UpdateOpts {
                description: Some(fields.apply(&epic.description)),
                ..UpdateOpts::default()
            },
        )
    }
}
