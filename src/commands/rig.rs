//! `gt rig`: register, list, dock, and undock rigs.

use clap::{Args, Subcommand};

use super::{TownArgs, TownCtx};
use crate::agent::session::TmuxSessions;
use crate::beads::redirect::write_redirect;
use crate::beads::routes::{Route, RouteTable};
use crate::error::GtError;
use crate::rig::create_rig_bead;
use crate::town::{RigBeads, RigEntry};

#[derive(Debug, Subcommand)]
pub enum RigCommand {
    /// Register a repository as a rig
    Add(AddArgs),
    /// List registered rigs and their dock state
    List(ListArgs),
    /// Dock a rig: stop its workers and forbid restarts
    Dock(DockArgs),
    /// Remove the docked label (does not restart agents)
    Undock(UndockArgs),
    /// Start a rig's witness and refinery
    Start(StartArgs),
}

impl RigCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Add(args) => args.execute(),
            Self::List(args) => args.execute(),
            Self::Dock(args) => args.execute(),
            Self::Undock(args) => args.execute(),
            Self::Start(args) => args.execute(),
        }
    }
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Rig name (lowercase, no hyphens)
    pub name: String,
    /// Git URL of the repository
    #[arg(long)]
    pub url: String,
    /// Bead id prefix, e.g. gt-
    #[arg(long)]
    pub prefix: String,
    #[command(flatten)]
    town: TownArgs,
}

impl AddArgs {
    fn execute(&self) -> anyhow::Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(GtError::Invalid(format!(
                "rig name {:?} must be lowercase alphanumeric (no hyphens)",
                self.name
            ))
            .into());
        }
        if !self.prefix.ends_with('-') || self.prefix.len() < 2 {
            return Err(
                GtError::Invalid(format!("prefix {:?} must end with '-'", self.prefix)).into(),
            );
        }

        let ctx = TownCtx::open(&self.town)?;
        let mut rigs = ctx.town.load_rigs()?;
        if rigs.rigs.contains_key(&self.name) {
            return Err(GtError::Exists(format!("rig {}", self.name)).into());
        }

        // Route first so the rig bead (hq-) and rig-scoped beads resolve.
        RouteTable::add(
            &ctx.town.routes_path(),
            Route {
                prefix: self.prefix.clone(),
                path: self.name.clone(),
            },
        )?;

        // Rig skeleton: bead directory plus workspace redirect targets.
        let rig_root = ctx.town.root().join(&self.name);
        std::fs::create_dir_all(rig_root.join("mayor").join("rig").join(".beads"))?;
        std::fs::create_dir_all(rig_root.join("polecats"))?;
        std::fs::create_dir_all(rig_root.join("crew"))?;
        std::fs::create_dir_all(rig_root.join("witness").join("rig"))?;
        std::fs::create_dir_all(rig_root.join("refinery").join("rig"))?;
        write_redirect(
            &rig_root.join("witness").join("rig").join(".beads"),
            "../../mayor/rig/.beads",
        )?;
        write_redirect(
            &rig_root.join("refinery").join("rig").join(".beads"),
            "../../mayor/rig/.beads",
        )?;

        rigs.rigs.insert(
            self.name.clone(),
            RigEntry {
                git_url: self.url.clone(),
                added_at: chrono::Utc::now(),
                beads: RigBeads {
                    prefix: self.prefix.clone(),
                },
            },
        );
        ctx.town.save_rigs(&rigs)?;

        create_rig_bead(&ctx.store, &self.name, &self.url, &self.prefix)?;

        println!("added rig {} ({} -> {})", self.name, self.prefix, self.url);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Emit JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl ListArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let rigs = ctx.town.load_rigs()?;

        let mut rows = Vec::new();
        for (name, entry) in &rigs.rigs {
            let docked = crate::rig::is_docked(&ctx.store, &entry.beads.prefix, name)
                .unwrap_or(false);
            rows.push(serde_json::json!({
                "name": name,
                "prefix": entry.beads.prefix,
                "git_url": entry.git_url,
                "docked": docked,
            }));
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            for row in &rows {
                let docked = if row["docked"].as_bool() == Some(true) {
                    " [docked]"
                } else {
                    ""
                };
                println!(
                    "{}  {}  {}{docked}",
                    row["name"].as_str().unwrap_or_default(),
                    row["prefix"].as_str().unwrap_or_default(),
                    row["git_url"].as_str().unwrap_or_default(),
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct DockArgs {
    /// Rig to dock
    pub name: String,
    /// Print what would be stopped without doing it
    #[arg(long)]
    pub dry_run: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl DockArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;

        let stopped = registry.dock(&self.name, self.dry_run)?;
        if self.dry_run {
            for session in &stopped {
                println!("would stop {session}");
            }
            println!("would dock rig {}", self.name);
        } else {
            for session in &stopped {
                println!("stopped {session}");
            }
            println!("docked rig {}", self.name);
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct UndockArgs {
    /// Rig to undock
    pub name: String,
    #[command(flatten)]
    town: TownArgs,
}

impl UndockArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;
        registry.undock(&self.name)?;
        println!("undocked rig {} (agents not restarted)", self.name);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Rig to start
    pub name: String,
    #[command(flatten)]
    town: TownArgs,
}

impl StartArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;
        let started = registry.start_rig(&self.name)?;
        if started.is_empty() {
            println!("rig {} already running", self.name);
        }
        for resolved in started {
            println!("spawned {}", resolved.session);
        }
        Ok(())
    }
}
