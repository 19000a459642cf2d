//! `gt epic`: the epic pipeline (start, ready, submit, status).

use std::path::PathBuf;

use clap::{Args, Subcommand};
use dialoguer::Select;

use super::{TownArgs, TownCtx};
use crate::agent::identity::{Identity, Role};
use crate::beads::fields::EpicFields;
use crate::beads::{BeadStatus, BeadType, Beads, ListFilter};
use crate::epic::pipeline::{EpicPipeline, StartOrigin};
use crate::epic::submit::{GhSubmitter, GitVcs, SubmitMode, submit};
use crate::error::GtError;

#[derive(Debug, Subcommand)]
pub enum EpicCommand {
    /// Create an epic in drafting state
    Start(StartArgs),
    /// Parse the plan and instantiate subtasks, deps, branch, and convoy
    Ready(ReadyArgs),
    /// Build and submit the stacked PRs
    Submit(SubmitArgs),
    /// Show decoded epic fields and subtask progress
    Status(StatusArgs),
    /// Print dependency waves over the epic's subtasks
    Waves(WavesArgs),
    /// Mark a submitted epic as landed
    Land(LandArgs),
}

impl EpicCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Start(args) => args.execute(),
            Self::Ready(args) => args.execute(),
            Self::Submit(args) => args.execute(),
            Self::Status(args) => args.execute(),
            Self::Waves(args) => args.execute(),
            Self::Land(args) => args.execute(),
        }
    }
}

fn rig_repo(ctx: &TownCtx, rig: &str) -> anyhow::Result<PathBuf> {
    ctx.town.rig(rig)?;
    Ok(ctx.town.root().join(rig).join(".repo.git"))
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Rig the epic belongs to
    pub rig: String,
    /// Epic title
    pub title: String,
    /// Crew member to sling the epic to (mayor origin); prompts when absent
    #[arg(long)]
    pub crew: Option<String>,
    #[command(flatten)]
    town: TownArgs,
}

impl StartArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let entry = ctx.town.rig(&self.rig)?;
        let repo = rig_repo(&ctx, &self.rig)?;

        // Workers hook their own epics; the mayor picks (or is prompted for)
        // a crew member to carry it.
        let origin = if let Ok(identity) = caller_identity() {
            match identity.role {
                Role::Crew | Role::Polecat => StartOrigin::Worker {
                    agent_bead: identity.bead_id(&entry.beads.prefix)?,
                },
                _ => StartOrigin::Mayor {
                    crew_bead: self.pick_crew(&ctx, &entry.beads.prefix)?,
                },
            }
        } else {
            StartOrigin::Mayor {
                crew_bead: self.pick_crew(&ctx, &entry.beads.prefix)?,
            }
        };

        let vcs = GitVcs;
        let pipeline = EpicPipeline::new(&ctx.store, &vcs, &ctx.events, &repo, &ctx.actor);
        let epic = pipeline.start(&entry.beads.prefix, &self.title, &origin)?;
        println!("started epic {} (drafting), hooked to {}", epic.id, epic.assignee);
        Ok(())
    }

    /// Resolve the crew bead to sling to: flag, else an interactive prompt
    /// over the rig's crew.
    fn pick_crew(&self, ctx: &TownCtx, prefix: &str) -> anyhow::Result<String> {
        if let Some(ref name) = self.crew {
            let identity = Identity::named(Role::Crew, Some(&self.rig), name);
            return identity.bead_id(prefix);
        }

        let crew: Vec<String> = ctx
            .store
            .list(&ListFilter {
                bead_type: Some(BeadType::Agent),
                ..ListFilter::default()
            })?
            .into_iter()
            .filter_map(|b| Identity::parse(&b.title).ok())
            .filter(|i| i.role == Role::Crew && i.rig.as_deref() == Some(self.rig.as_str()))
            .filter_map(|i| i.name)
            .collect();

        if crew.is_empty() {
            return Err(GtError::NotFound(format!(
                "no crew in rig {} (pass --crew to name one)",
                self.rig
            ))
            .into());
        }
        if crew.len() == 1 {
            let identity = Identity::named(Role::Crew, Some(&self.rig), &crew[0]);
            return identity.bead_id(prefix);
        }

        let picked = Select::new()
            .with_prompt(format!("crew member for this epic in {}", self.rig))
            .items(&crew)
            .default(0)
            .interact()?;
        let identity = Identity::named(Role::Crew, Some(&self.rig), &crew[picked]);
        identity.bead_id(prefix)
    }
}

/// Identity of the invoking agent, from the GT_* environment.
fn caller_identity() -> anyhow::Result<Identity> {
    let role = std::env::var("GT_ROLE")
        .map_err(|_| GtError::NotFound("GT_ROLE not set".into()))?;
    let rig = std::env::var("GT_RIG").ok();
    match role.as_str() {
        "polecat" => {
            let name = std::env::var("GT_POLECAT")
                .map_err(|_| GtError::Invalid("GT_POLECAT not set".into()))?;
            let rig = rig.ok_or_else(|| GtError::Invalid("GT_RIG not set".into()))?;
            Ok(Identity::named(Role::Polecat, Some(&rig), &name))
        }
        "crew" => {
            let name = std::env::var("GT_CREW")
                .map_err(|_| GtError::Invalid("GT_CREW not set".into()))?;
            let rig = rig.ok_or_else(|| GtError::Invalid("GT_RIG not set".into()))?;
            Ok(Identity::named(Role::Crew, Some(&rig), &name))
        }
        other => Identity::parse(other),
    }
}

#[derive(Debug, Args)]
pub struct ReadyArgs {
    /// Epic bead id
    pub epic: String,
    /// Rig the epic belongs to
    #[arg(long)]
    pub rig: String,
    /// Integration branch template (default integration/{{epic}})
    #[arg(long)]
    pub branch_template: Option<String>,
    #[command(flatten)]
    town: TownArgs,
}

impl ReadyArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let repo = rig_repo(&ctx, &self.rig)?;
        let vcs = GitVcs;
        let pipeline = EpicPipeline::new(&ctx.store, &vcs, &ctx.events, &repo, &ctx.actor);

        let subtasks = pipeline.ready(&self.epic, self.branch_template.as_deref())?;
        println!("epic {} is ready with {} subtasks:", self.epic, subtasks.len());
        for subtask in subtasks {
            println!("  {}  {}", subtask.id, subtask.title);
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Epic bead id
    pub epic: String,
    /// Rig the epic belongs to
    #[arg(long)]
    pub rig: String,
    /// Remote to open PRs against, e.g. origin or owner/repo
    #[arg(long, default_value = "origin")]
    pub remote: String,
    /// One PR from the integration branch
    #[arg(long, conflicts_with = "sequential")]
    pub single: bool,
    /// Base every PR on the default branch
    #[arg(long)]
    pub sequential: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl SubmitArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let repo = rig_repo(&ctx, &self.rig)?;
        let mode = if self.single {
            SubmitMode::Single
        } else if self.sequential {
            SubmitMode::Sequential
        } else {
            SubmitMode::Stacked
        };

        let vcs = GitVcs;
        let submitter = GhSubmitter;
        let submission = submit(
            &ctx.store,
            &vcs,
            &submitter,
            &repo,
            &self.remote,
            &self.epic,
            mode,
        )?;

        for url in &submission.pr_urls {
            println!("opened {url}");
        }
        for (branch, conflict) in &submission.conflicts {
            if let Some(info) = conflict {
                if !info.mergeable {
                    println!("warning: {branch} is not mergeable ({})", info.details);
                }
            }
        }
        println!("epic {} submitted", self.epic);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct WavesArgs {
    /// Epic bead id
    pub epic: String,
    #[command(flatten)]
    town: TownArgs,
}

impl WavesArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let waves = crate::dispatch::waves::epic_waves(&ctx.store, &self.epic)?;
        if waves.is_empty() {
            println!("epic {} has no subtasks", self.epic);
        }
        for wave in waves {
            println!("wave {}: {}", wave.number, wave.bead_ids.join(", "));
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct LandArgs {
    /// Epic bead id
    pub epic: String,
    /// Rig the epic belongs to
    #[arg(long)]
    pub rig: String,
    #[command(flatten)]
    town: TownArgs,
}

impl LandArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let repo = rig_repo(&ctx, &self.rig)?;
        let vcs = GitVcs;
        let pipeline = EpicPipeline::new(&ctx.store, &vcs, &ctx.events, &repo, &ctx.actor);
        pipeline.transition(&self.epic, crate::beads::fields::EpicState::Landed)?;
        println!("epic {} landed", self.epic);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Epic bead id
    pub epic: String,
    /// Emit JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl StatusArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let epic = ctx.store.show(&self.epic)?;
        let fields = EpicFields::parse(&epic.description)?;

        let subtasks = ctx.store.list(&ListFilter {
            parent: Some(self.epic.clone()),
            bead_type: Some(BeadType::Task),
            ..ListFilter::default()
        })?;
        let closed = subtasks
            .iter()
            .filter(|s| s.status == BeadStatus::Closed)
            .count();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": epic.id,
                    "title": epic.title,
                    "state": fields.state.as_str(),
                    "integration_branch": fields.integration_branch,
                    "contributing_md": fields.contributing_md,
                    "upstream_prs": fields.upstream_prs,
                    "subtasks": subtasks.len(),
                    "closed": closed,
                }))?
            );
        } else {
            println!("{}  {}", epic.id, epic.title);
            println!("state: {}", fields.state);
            if let Some(ref branch) = fields.integration_branch {
                println!("integration branch: {branch}");
            }
            println!("subtasks: {closed}/{} closed", subtasks.len());
            for url in &fields.upstream_prs {
                println!("pr: {url}");
            }
        }
        Ok(())
    }
}
