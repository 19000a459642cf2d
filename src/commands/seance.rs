//! `gt seance`: context recovery on agent startup. Fails open: missing
//! context never blocks the caller.

use clap::Args;

use super::{TownArgs, TownCtx};
use crate::agent::identity::Role;
use crate::config::RigConfig;
use crate::seance::{CliSummarizer, Seance, SeanceOutcome};

#[derive(Debug, Args)]
pub struct SeanceArgs {
    /// Rig to recover context for (default: $GT_RIG)
    #[arg(long)]
    pub rig: Option<String>,
    /// Summarizer program (the LLM runtime CLI)
    #[arg(long, default_value = "claude")]
    pub summarizer: String,
    #[command(flatten)]
    town: TownArgs,
}

impl SeanceArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;

        let Some(rig) = self
            .rig
            .clone()
            .or_else(|| std::env::var("GT_RIG").ok())
            .filter(|r| !r.is_empty())
        else {
            tracing::debug!("seance skipped: no rig");
            return Ok(());
        };

        let session_id = std::env::var("GT_SESSION_ID").unwrap_or_default();
        let role: Role = std::env::var("GT_ROLE")
            .ok()
            .and_then(|r| r.parse().ok())
            .unwrap_or(Role::Unknown);

        let config = RigConfig::load(&ctx.town.rig_config_path(&rig))?;
        let summarizer = CliSummarizer::new(&self.summarizer);
        let seance = Seance::new(
            &ctx.events,
            &summarizer,
            &ctx.town.seance_cache_path(),
            config.seance,
        );

        match seance.run(role, &rig, &session_id) {
            SeanceOutcome::Produced(text) => println!("{text}"),
            SeanceOutcome::Skipped { reason } => {
                tracing::debug!(reason = %reason, "seance skipped");
            }
        }
        Ok(())
    }
}
