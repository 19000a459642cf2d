//! `gt claim` / `gt release`: queue message claims.

use clap::Args;

use super::{TownArgs, TownCtx};
use crate::dispatch::claim::{claim, release};

#[derive(Debug, Args)]
pub struct ClaimArgs {
    /// Queue name
    pub queue: String,
    #[command(flatten)]
    town: TownArgs,
}

impl ClaimArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        match claim(&ctx.store, &self.queue, &ctx.actor)? {
            Some(message) => {
                println!("claimed {}: {}", message.id, message.title);
            }
            None => {
                println!("queue {} is empty", self.queue);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ReleaseArgs {
    /// Message bead to release
    pub message: String,
    #[command(flatten)]
    town: TownArgs,
}

impl ReleaseArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        release(&ctx.store, &self.message, &ctx.actor)?;
        println!("released {}", self.message);
        Ok(())
    }
}
