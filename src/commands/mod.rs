//! CLI command implementations: thin wrappers that assemble the town
//! context and call into the core.

pub mod agent;
pub mod claim;
pub mod done;
pub mod epic;
pub mod events;
pub mod init;
pub mod promote;
pub mod queue;
pub mod rig;
pub mod seance;
pub mod sling;

use std::path::PathBuf;

use crate::agent::identity::TOWN_SESSION_PREFIX;
use crate::agent::registry::Registry;
use crate::agent::session::Sessions;
use crate::beads::CliBeads;
use crate::events::EventLog;
use crate::town::Town;

/// Shared flags accepted by every subcommand that touches the town.
#[derive(Debug, clap::Args)]
pub struct TownArgs {
    /// Town root directory (default: $GT_TOWN_ROOT or discovery)
    #[arg(long, global = true)]
    pub town_root: Option<PathBuf>,
    /// Audit actor (default: $BD_ACTOR or derived from GT_* identity)
    #[arg(long, global = true)]
    pub actor: Option<String>,
}

impl TownArgs {
    pub fn town(&self) -> anyhow::Result<Town> {
        match self.town_root {
            Some(ref root) => Town::open(root),
            None => Town::discover(),
        }
    }

    /// Resolve the audit actor: flag, then `BD_ACTOR`, then the GT_*
    /// identity env, then `human`.
    pub fn resolve_actor(&self) -> String {
        if let Some(ref actor) = self.actor {
            return actor.clone();
        }
        if let Ok(actor) = std::env::var("BD_ACTOR") {
            if !actor.is_empty() {
                return actor;
            }
        }
        if let Ok(role) = std::env::var("GT_ROLE") {
            let rig = std::env::var("GT_RIG").unwrap_or_default();
            let name = std::env::var("GT_POLECAT")
                .or_else(|_| std::env::var("GT_CREW"))
                .unwrap_or_default();
            let parts: Vec<&str> = [role.as_str(), rig.as_str(), name.as_str()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect();
            if !parts.is_empty() {
                return parts.join("-");
            }
        }
        "human".to_string()
    }
}

/// Everything a command needs to talk to the town.
pub struct TownCtx {
    pub town: Town,
    pub store: CliBeads,
    pub events: EventLog,
    pub actor: String,
}

impl TownCtx {
    pub fn open(args: &TownArgs) -> anyhow::Result<Self> {
        let town = args.town()?;
        let actor = args.resolve_actor();
        let cwd = std::env::current_dir().unwrap_or_else(|_| town.root().to_path_buf());
        let store = CliBeads::open(town.root(), &cwd, &actor)?;
        let events = EventLog::new(&town.events_path());
        Ok(Self {
            town,
            store,
            events,
            actor,
        })
    }

    /// Build a registry over the given session backend, with every
    /// registered rig's prefix loaded.
    pub fn registry<'a>(&'a self, sessions: &'a dyn Sessions) -> anyhow::Result<Registry<'a>> {
        let mut registry = Registry::new(
            &self.store,
            sessions,
            self.town.root(),
            TOWN_SESSION_PREFIX,
        );
        for (name, entry) in self.town.load_rigs()?.rigs {
            registry = registry.with_rig(&name, &entry.beads.prefix);
        }
        Ok(registry)
    }
}
