//! `gt sling`: dispatch a bead to an agent, role pool, or rig.

use clap::Args;

use super::{TownArgs, TownCtx};
use crate::agent::session::TmuxSessions;
use crate::dispatch::sling::{SlingOptions, sling};

#[derive(Debug, Args)]
pub struct SlingArgs {
    /// Bead to dispatch
    pub bead: String,
    /// Target: <rig>/polecats/<name>, <rig>/crew/<name>, deacon/dogs,
    /// deacon/dogs/<name>, or a bare rig name
    pub target: String,
    /// Spawn a worker when the target has none available
    #[arg(long)]
    pub create: bool,
    /// Print intended actions without side effects
    #[arg(long)]
    pub dry_run: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl SlingArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;

        let outcome = sling(
            &ctx.store,
            &ctx.events,
            &registry,
            &self.bead,
            &self.target,
            &SlingOptions {
                create: self.create,
                dry_run: self.dry_run,
                actor: ctx.actor.clone(),
            },
        )?;

        if !self.dry_run {
            let spawned = if outcome.spawned { " (spawned)" } else { "" };
            println!("slung {} -> {}{spawned}", self.bead, outcome.agent_bead);
        }
        Ok(())
    }
}
