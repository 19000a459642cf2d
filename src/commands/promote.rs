//! `gt promote`: promote a transient wisp to a durable bead, behind the
//! anchor gate.

use clap::Args;

use super::{TownArgs, TownCtx};
use crate::dispatch::anchor::{AnchorGate, CmdHealthSource, promote_wisp};

#[derive(Debug, Args)]
pub struct PromoteArgs {
    /// Wisp bead to promote
    pub wisp: String,
    /// Anchor health probe command
    #[arg(long, default_value = "gt-anchor-health")]
    pub health_cmd: String,
    #[command(flatten)]
    town: TownArgs,
}

impl PromoteArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let source = CmdHealthSource::new(&self.health_cmd);
        let gate = AnchorGate::new(&source);

        let durable = promote_wisp(&ctx.store, &gate, &self.wisp)?;
        println!("promoted {} -> {}", self.wisp, durable.id);
        Ok(())
    }
}
