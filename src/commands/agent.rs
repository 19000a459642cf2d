//! `gt agent`: spawn, stop, cycle, and list agents.

use clap::{Args, Subcommand};

use super::{TownArgs, TownCtx};
use crate::agent::identity::{Identity, TOWN_SESSION_PREFIX};
use crate::agent::registry::CycleDirection;
use crate::agent::session::{Sessions, TmuxSessions};
use crate::events::Event;

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Spawn an agent session
    Spawn(SpawnArgs),
    /// Stop an agent (graceful, then forceful)
    Stop(StopArgs),
    /// Cycle UI focus among a rig's sessions
    Cycle(CycleArgs),
    /// List live sessions with their classification
    List(ListArgs),
    /// Record an agent heartbeat (spawning -> idle)
    Heartbeat(HeartbeatArgs),
}

impl AgentCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Spawn(args) => args.execute(),
            Self::Stop(args) => args.execute(),
            Self::Cycle(args) => args.execute(),
            Self::List(args) => args.execute(),
            Self::Heartbeat(args) => args.execute(),
        }
    }
}

#[derive(Debug, Args)]
pub struct SpawnArgs {
    /// Agent identity, e.g. gastown/polecats/nux or deacon/dogs/rex
    pub identity: String,
    #[command(flatten)]
    town: TownArgs,
}

impl SpawnArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;
        let identity = Identity::parse(&self.identity)?;

        let resolved = registry.spawn(&identity)?;
        let _ = ctx.events.append(
            &Event::new(
                "spawn",
                &ctx.actor,
                identity.rig.as_deref().unwrap_or("hq"),
            )
            .with_payload(serde_json::json!({"session": resolved.session})),
        );
        println!("spawned {} ({})", resolved.session, resolved.bead_id);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct StopArgs {
    /// Agent identity
    pub identity: String,
    /// Skip the graceful interrupt
    #[arg(long)]
    pub force: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl StopArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;
        let identity = Identity::parse(&self.identity)?;

        registry.stop(&identity, self.force)?;
        let _ = ctx.events.append(
            &Event::new(
                "kill",
                &ctx.actor,
                identity.rig.as_deref().unwrap_or("hq"),
            )
            .with_payload(serde_json::json!({"agent": identity.expr()})),
        );
        println!("stopped {identity}");
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct CycleArgs {
    /// Rig whose sessions to cycle through
    pub rig: String,
    /// Cycle backwards
    #[arg(long)]
    pub prev: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl CycleArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;

        let direction = if self.prev {
            CycleDirection::Prev
        } else {
            CycleDirection::Next
        };
        match registry.cycle(&self.rig, direction)? {
            Some(session) => println!("focused {session}"),
            None => println!("no sessions in rig {}", self.rig),
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only sessions of this rig
    #[arg(long)]
    pub rig: Option<String>,
    /// Emit JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    town: TownArgs,
}

impl ListArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let _ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();

        let mut rows = Vec::new();
        for session in sessions.list()? {
            let identity = Identity::classify(&session, TOWN_SESSION_PREFIX);
            if let Some(ref rig) = self.rig {
                if identity.rig.as_deref() != Some(rig.as_str()) {
                    continue;
                }
            }
            rows.push(serde_json::json!({
                "session": session,
                "role": identity.role.as_str(),
                "rig": identity.rig,
                "name": identity.name,
            }));
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            for row in &rows {
                println!(
                    "{}  {}  {}",
                    row["session"].as_str().unwrap_or_default(),
                    row["role"].as_str().unwrap_or_default(),
                    row["rig"].as_str().unwrap_or("-"),
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct HeartbeatArgs {
    /// Agent identity
    pub identity: String,
    #[command(flatten)]
    town: TownArgs,
}

impl HeartbeatArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let sessions = TmuxSessions::new();
        let registry = ctx.registry(&sessions)?;
        let identity = Identity::parse(&self.identity)?;
        registry.heartbeat(&identity)?;
        Ok(())
    }
}
