//! Stacked-PR submission: dependency-ordered branches, each PR based on the
//! branch of its first dependency.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::branch::pr_branch_name;
use crate::beads::bead::DepDirection;
use crate::beads::fields::{EpicFields, EpicState, SubtaskFields};
use crate::beads::{Bead, Beads, DepType, ListFilter, UpdateOpts};
use crate::error::GtError;
use crate::subprocess::Tool;

/// The VCS seam: branch plumbing against a rig's repository.
pub trait Vcs {
    fn default_branch(&self, repo: &Path) -> anyhow::Result<String>;
    fn branch_exists(&self, repo: &Path, name: &str) -> anyhow::Result<bool>;
    fn create_branch(&self, repo: &Path, name: &str, base: &str) -> anyhow::Result<()>;
}

/// git-backed implementation.
pub struct GitVcs;

impl Vcs for GitVcs {
    fn default_branch(&self, repo: &Path) -> anyhow::Result<String> {
        let output = Tool::new("git")
            .dir(repo)
            .args(&["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
            .run()?;
        if output.success() {
            let name = output.stdout.trim();
            return Ok(name.strip_prefix("origin/").unwrap_or(name).to_string());
        }
        // Detached mirrors fall back to the local HEAD.
        let output = Tool::new("git")
            .dir(repo)
            .args(&["symbolic-ref", "--short", "HEAD"])
            .run_ok()?;
        Ok(output.stdout.trim().to_string())
    }

    fn branch_exists(&self, repo: &Path, name: &str) -> anyhow::Result<bool> {
        let output = Tool::new("git")
            .dir(repo)
            .args(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{name}"),
            ])
            .run()?;
        Ok(output.success())
    }

    fn create_branch(&self, repo: &Path, name: &str, base: &str) -> anyhow::Result<()> {
        Tool::new("git")
            .dir(repo)
            .args(&["branch", name, base])
            .run_ok()?;
        Ok(())
    }
}

/// A PR to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRequest {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Mergeability information from the PR host, when the probe can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub mergeable: bool,
    pub details: String,
}

/// The PR host seam.
pub trait PrSubmitter {
    /// Create a PR and return its URL.
    fn create_pr(&self, repo: &Path, remote: &str, request: &PrRequest) -> anyhow::Result<String>;

    /// Probe mergeability. `None` only when the host cannot answer.
    fn check_conflicts(&self, repo: &Path, branch: &str) -> anyhow::Result<Option<ConflictInfo>>;
}

/// `gh`-backed submitter.
pub struct GhSubmitter;

impl PrSubmitter for GhSubmitter {
    fn create_pr(&self, repo: &Path, remote: &str, request: &PrRequest) -> anyhow::Result<String> {
        let output = Tool::new("gh")
            .dir(repo)
            .args(&[
                "pr",
                "create",
                "--head",
                &request.branch,
                "--base",
                &request.base,
                "--title",
                &request.title,
                "--body",
                &request.body,
                "--repo",
                remote,
            ])
            .run_ok()?;
        Ok(output.stdout.trim().to_string())
    }

    fn check_conflicts(&self, repo: &Path, branch: &str) -> anyhow::Result<Option<ConflictInfo>> {
        let output = Tool::new("gh")
            .dir(repo)
            .args(&["pr", "view", branch, "--json", "mergeable"])
            .run()?;
        if !output.success() {
            return Ok(None);
        }
        let value: serde_json::Value = output.parse_json()?;
        let Some(state) = value.get("mergeable").and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        Ok(Some(ConflictInfo {
            mergeable: state.eq_ignore_ascii_case("mergeable"),
            details: state.to_string(),
        }))
    }
}

/// Submission shape flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmitMode {
    /// Stacked PRs, each based on its first dependency.
    #[default]
    Stacked,
    /// One PR from the integration branch.
    Single,
    /// Every PR based on the default branch, submitted in order.
    Sequential,
}

/// The review gate: checks run before submission. Open subtasks are fatal;
/// everything else warns with remediation text.
#[derive(Debug, Clone)]
pub struct GateWarning {
    pub what: String,
    pub remedy: String,
}

pub fn review_gate(
    store: &dyn Beads,
    vcs: &dyn Vcs,
    repo: &Path,
    epic: &Bead,
) -> anyhow::Result<Vec<GateWarning>> {
    let fields = EpicFields::parse(&epic.description)?;
    let mut warnings = Vec::new();

    let subtasks = store.list(&ListFilter {
        parent: Some(epic.id.clone()),
        ..ListFilter::default()
    })?;
    let open: Vec<String> = subtasks
        .iter()
        .filter(|s| s.status != crate::beads::BeadStatus::Closed)
        .map(|s| s.id.clone())
        .collect();
    // Open subtasks are the verification gate's hard stop: the operator has
    // to intervene before submission can proceed.
    if !open.is_empty() {
        return Err(GtError::Escalation(format!(
            "epic {} has open subtasks: {}",
            epic.id,
            open.join(", ")
        ))
        .into());
    }

    if !matches!(fields.state, EpicState::Review | EpicState::InProgress) {
        warnings.push(GateWarning {
            what: format!("epic is in state {}", fields.state),
            remedy: "move the epic to review before submitting".to_string(),
        });
    }

    match fields.integration_branch {
        Some(ref branch) if vcs.branch_exists(repo, branch)? => {}
        Some(ref branch) => warnings.push(GateWarning {
            what: format!("integration branch {branch} does not exist"),
            remedy: format!("recreate it: git branch {branch} <default>"),
        }),
        None => warnings.push(GateWarning {
            what: "no integration branch recorded".to_string(),
            remedy: "run ready again to create one".to_string(),
        }),
    }

    match fields.contributing_md {
        Some(ref path) if repo.join(path).is_file() => {}
        Some(ref path) => warnings.push(GateWarning {
            what: format!("guidelines file {path} is gone"),
            remedy: "restore it or re-run start".to_string(),
        }),
        None => warnings.push(GateWarning {
            what: "no contribution guidelines recorded".to_string(),
            remedy: "add a CONTRIBUTING.md to the rig".to_string(),
        }),
    }

    Ok(warnings)
}

/// Topological order over subtasks by their `blocks` edges. `Cycle` when no
/// order exists.
pub fn topo_order(store: &dyn Beads, subtasks: &[Bead]) -> anyhow::Result<Vec<Bead>> {
    let ids: BTreeSet<&str> = subtasks.iter().map(|b| b.id.as_str()).collect();
    let mut deps: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for bead in subtasks {
        let blockers = store
            .dep_list(&bead.id, DepDirection::Up, Some(DepType::Blocks))?
            .into_iter()
            .map(|d| d.depends_on_id)
            .filter(|d| ids.contains(d.as_str()))
            .collect();
        deps.insert(bead.id.as_str(), blockers);
    }

    let mut ordered: Vec<Bead> = Vec::with_capacity(subtasks.len());
    let mut placed: BTreeSet<String> = BTreeSet::new();
    let mut pending: Vec<&Bead> = subtasks.iter().collect();

    while !pending.is_empty() {
        let before = pending.len();
        let (ready, rest): (Vec<&Bead>, Vec<&Bead>) = pending.into_iter().partition(|b| {
            deps[b.id.as_str()]
                .iter()
                .all(|d| placed.contains(d.as_str()))
        });
        for bead in &ready {
            placed.insert(bead.id.clone());
            ordered.push((*bead).clone());
        }
        pending = rest;
        if pending.len() == before {
            let stuck: Vec<&str> = pending.iter().map(|b| b.id.as_str()).collect();
            return Err(GtError::Cycle(format!(
                "subtask dependency cycle: {}",
                stuck.join(", ")
            ))
            .into());
        }
    }
    Ok(ordered)
}

/// Everything submit produced: the PRs in order, plus conflict probes.
#[derive(Debug, Clone)]
pub struct Submission {
    pub pr_urls: Vec<String>,
    pub conflicts: Vec<(String, Option<ConflictInfo>)>,
}

/// Build and submit the PR stack for an epic. Dependency roots base on the
/// default branch; everyone else bases on the branch of their first
/// dependency. On success the PR URLs land in the epic bead and the epic
/// moves to `submitted`.
pub fn submit(
    store: &dyn Beads,
    vcs: &dyn Vcs,
    submitter: &dyn PrSubmitter,
    repo: &Path,
    remote: &str,
    epic_id: &str,
    mode: SubmitMode,
) -> anyhow::Result<Submission> {
    let epic = store.show(epic_id)?;
    let mut fields = EpicFields::parse(&epic.description)?;

    let warnings = review_gate(store, vcs, repo, &epic)?;
    for warning in &warnings {
        tracing::warn!(what = %warning.what, remedy = %warning.remedy, "review gate");
    }

    let subtasks = store.list(&ListFilter {
        parent: Some(epic_id.to_string()),
        ..ListFilter::default()
    })?;
    let ordered = topo_order(store, &subtasks)?;
    let default_branch = vcs.default_branch(repo)?;

    if mode == SubmitMode::Single {
        let branch = fields.integration_branch.clone().ok_or_else(|| {
            GtError::Invalid(format!("epic {epic_id} has no integration branch"))
        })?;
        let url = submitter.create_pr(
            repo,
            remote,
            &PrRequest {
                branch: branch.clone(),
                base: default_branch,
                title: epic.title.clone(),
                body: epic.description.clone(),
            },
        )?;
        let conflict = submitter.check_conflicts(repo, &branch)?;
        finish_submit(store, &epic, &mut fields, vec![url.clone()])?;
        return Ok(Submission {
            pr_urls: vec![url],
            conflicts: vec![(branch, conflict)],
        });
    }

    let mut branch_by_id: BTreeMap<String, String> = BTreeMap::new();
    let mut pr_urls = Vec::new();
    let mut conflicts = Vec::new();

    for bead in &ordered {
        let step = SubtaskFields::parse(&bead.description);
        let step_ref = if step.step.is_empty() {
            bead.id.clone()
        } else {
            step.step
        };
        let branch = pr_branch_name(epic_id, &step_ref)?;

        let base = if mode == SubmitMode::Sequential {
            default_branch.clone()
        } else {
            store
                .dep_list(&bead.id, DepDirection::Up, Some(DepType::Blocks))?
                .into_iter()
                .map(|d| d.depends_on_id)
                .find_map(|dep| branch_by_id.get(&dep).cloned())
                .unwrap_or_else(|| default_branch.clone())
        };

        if !vcs.branch_exists(repo, &branch)? {
            vcs.create_branch(repo, &branch, &base)?;
        }

        let url = submitter.create_pr(
            repo,
            remote,
            &PrRequest {
                branch: branch.clone(),
                base,
                title: bead.title.clone(),
                body: bead.description.clone(),
            },
        )?;
        conflicts.push((branch.clone(), submitter.check_conflicts(repo, &branch)?));
        branch_by_id.insert(bead.id.clone(), branch);
        pr_urls.push(url);
    }

    finish_submit(store, &epic, &mut fields, pr_urls.clone())?;
    Ok(Submission { pr_urls, conflicts })
}

fn finish_submit(
    store: &dyn Beads,
    epic: &Bead,
    fields: &mut EpicFields,
    pr_urls: Vec<String>,
) -> anyhow::Result<()> {
    if !fields.state.can_transition_to(EpicState::Submitted) {
        return Err(GtError::Invalid(format!(
            "epic {}: cannot move from {} to submitted",
            epic.id, fields.state
        ))
        .into());
    }
    fields.state = EpicState::Submitted;
    fields.upstream_prs = pr_urls;
    store.update(
        &epic.id,
        &UpdateOpts {
            description: Some(fields.apply(&epic.description)),
            ..UpdateOpts::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::beads::BeadType;
    use crate::beads::bead::test_bead;
    use crate::beads::mem::MemBeads;

    /// Fake VCS tracking created branches.
    #[derive(Default)]
    struct FakeVcs {
        branches: Mutex<Vec<(String, String)>>,
    }

    impl Vcs for FakeVcs {
        fn default_branch(&self, _repo: &Path) -> anyhow::Result<String> {
            Ok("main".to_string())
        }

        fn branch_exists(&self, _repo: &Path, name: &str) -> anyhow::Result<bool> {
            Ok(self
                .branches
                .lock()
                .expect("lock")
                .iter()
                .any(|(n, _)| n == name))
        }

        fn create_branch(&self, _repo: &Path, name: &str, base: &str) -> anyhow::Result<()> {
            self.branches
                .lock()
                .expect("lock")
                .push((name.to_string(), base.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSubmitter {
        requests: Mutex<Vec<PrRequest>>,
    }

    impl PrSubmitter for FakeSubmitter {
        fn create_pr(
            &self,
            _repo: &Path,
            _remote: &str,
            request: &PrRequest,
        ) -> anyhow::Result<String> {
            let mut requests = self.requests.lock().expect("lock");
            requests.push(request.clone());
            Ok(format!("https://example.com/pr/{}", requests.len()))
        }

        fn check_conflicts(
            &self,
            _repo: &Path,
            _branch: &str,
        ) -> anyhow::Result<Option<ConflictInfo>> {
            Ok(Some(ConflictInfo {
                mergeable: true,
                details: "MERGEABLE".to_string(),
            }))
        }
    }

    fn seed_epic_with_chain(store: &MemBeads) -> String {
        let mut epic = test_bead("gt-epic-auth", BeadType::Epic);
        let fields = EpicFields {
            state: EpicState::Review,
            integration_branch: Some("integration/gt-epic-auth".to_string()),
            contributing_md: None,
            upstream_prs: Vec::new(),
            subtask_count: Some(2),
            completed_count: Some(2),
        };
        epic.description = fields.apply("The auth epic.");
        store.insert(epic);

        for (id, step) in [("gt-epic-auth.1", "auth-1"), ("gt-epic-auth.2", "auth-2")] {
            let mut task = test_bead(id, BeadType::Task);
            task.parent = "gt-epic-auth".to_string();
            task.status = crate::beads::BeadStatus::Closed;
            task.description = SubtaskFields {
                tier: None,
                instantiated_from: "gt-epic-auth".to_string(),
                step: step.to_string(),
            }
            .apply("");
            store.insert(task);
        }
        store
            .add_dependency("gt-epic-auth.1", "gt-epic-auth.2", DepType::Blocks)
            .unwrap();
        "gt-epic-auth".to_string()
    }

    #[test]
    fn stacked_submission_bases_on_first_dependency() {
        let store = MemBeads::new();
        let epic_id = seed_epic_with_chain(&store);
        let vcs = FakeVcs::default();
        vcs.create_branch(Path::new("/r"), "integration/gt-epic-auth", "main")
            .unwrap();
        let submitter = FakeSubmitter::default();

        let submission = submit(
            &store,
            &vcs,
            &submitter,
            Path::new("/r"),
            "origin",
            &epic_id,
            SubmitMode::Stacked,
        )
        .unwrap();

        assert_eq!(submission.pr_urls.len(), 2);
        let requests = submitter.requests.lock().unwrap();
        assert_eq!(requests[0].branch, "polecat/gt-epic-auth/auth-1");
        assert_eq!(requests[0].base, "main");
        assert_eq!(requests[1].branch, "polecat/gt-epic-auth/auth-2");
        assert_eq!(requests[1].base, "polecat/gt-epic-auth/auth-1");

        // PR URLs and the state transition land on the epic bead
        let epic = store.show(&epic_id).unwrap();
        let fields = EpicFields::parse(&epic.description).unwrap();
        assert_eq!(fields.state, EpicState::Submitted);
        assert_eq!(fields.upstream_prs, submission.pr_urls);

        // conflict probe is populated, not silently nil
        assert!(
            submission
                .conflicts
                .iter()
                .all(|(_, c)| c.as_ref().is_some_and(|c| c.mergeable))
        );
    }

    #[test]
    fn sequential_mode_bases_everything_on_default() {
        let store = MemBeads::new();
        let epic_id = seed_epic_with_chain(&store);
        let vcs = FakeVcs::default();
        vcs.create_branch(Path::new("/r"), "integration/gt-epic-auth", "main")
            .unwrap();
        let submitter = FakeSubmitter::default();

        submit(
            &store,
            &vcs,
            &submitter,
            Path::new("/r"),
            "origin",
            &epic_id,
            SubmitMode::Sequential,
        )
        .unwrap();

        let requests = submitter.requests.lock().unwrap();
        assert!(requests.iter().all(|r| r.base == "main"));
    }

    #[test]
    fn single_mode_submits_integration_branch() {
        let store = MemBeads::new();
        let epic_id = seed_epic_with_chain(&store);
        let vcs = FakeVcs::default();
        vcs.create_branch(Path::new("/r"), "integration/gt-epic-auth", "main")
            .unwrap();
        let submitter = FakeSubmitter::default();

        let submission = submit(
            &store,
            &vcs,
            &submitter,
            Path::new("/r"),
            "origin",
            &epic_id,
            SubmitMode::Single,
        )
        .unwrap();
        assert_eq!(submission.pr_urls.len(), 1);
        let requests = submitter.requests.lock().unwrap();
        assert_eq!(requests[0].branch, "integration/gt-epic-auth");
        assert_eq!(requests[0].base, "main");
    }

    #[test]
    fn open_subtasks_block_submission() {
        let store = MemBeads::new();
        let epic_id = seed_epic_with_chain(&store);
        store
            .update(
                "gt-epic-auth.1",
                &UpdateOpts {
                    status: Some(crate::beads::BeadStatus::Open),
                    ..UpdateOpts::default()
                },
            )
            .unwrap();

        let vcs = FakeVcs::default();
        let submitter = FakeSubmitter::default();
        let err = submit(
            &store,
            &vcs,
            &submitter,
            Path::new("/r"),
            "origin",
            &epic_id,
            SubmitMode::Stacked,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Escalation(_))
        ));
        assert!(submitter.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn topo_order_detects_cycles() {
        let store = MemBeads::new();
        let a = test_bead("gt-a", BeadType::Task);
        let b = test_bead("gt-b", BeadType::Task);
        store.insert(a.clone());
        store.insert(b.clone());
        store.add_dependency("gt-a", "gt-b", DepType::Blocks).unwrap();
        store.add_dependency("gt-b", "gt-a", DepType::Blocks).unwrap();

        let err = topo_order(&store, &[a, b]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Cycle(_))
        ));
    }
}
