//! `gt done`: close a completed bead and its descendants.

use clap::Args;

use super::{TownArgs, TownCtx};
use crate::dispatch::hook::done;

#[derive(Debug, Args)]
pub struct DoneArgs {
    /// Bead to complete
    pub bead: String,
    /// Closure reason
    #[arg(long, default_value = "completed")]
    pub reason: String,
    #[command(flatten)]
    town: TownArgs,
}

impl DoneArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let closed = done(&ctx.store, &ctx.events, &self.bead, &ctx.actor, &self.reason)?;
        for id in &closed {
            println!("closed {id}");
        }
        Ok(())
    }
}
