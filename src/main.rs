mod agent;
mod beads;
mod commands;
mod config;
mod dispatch;
mod epic;
mod error;
mod events;
mod rig;
mod seance;
mod subprocess;
mod telemetry;
mod town;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::agent::AgentCommand;
use commands::claim::{ClaimArgs, ReleaseArgs};
use commands::done::DoneArgs;
use commands::epic::EpicCommand;
use commands::events::EventsCommand;
use commands::init::InitArgs;
use commands::promote::PromoteArgs;
use commands::queue::QueueCommand;
use commands::rig::RigCommand;
use commands::seance::SeanceArgs;
use commands::sling::SlingArgs;

#[derive(Debug, Parser)]
#[command(
    name = "gt",
    version,
    about = "Town orchestrator for fleets of AI coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initialize a new town
    Init(InitArgs),
    /// Manage rigs (add, list, dock, undock, start)
    Rig {
        #[command(subcommand)]
        command: RigCommand,
    },
    /// Dispatch a bead to an agent, pool, or rig
    Sling(SlingArgs),
    /// Manage work queues (add, send, list)
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Claim the oldest unclaimed message from a queue
    Claim(ClaimArgs),
    /// Release a claimed queue message
    Release(ReleaseArgs),
    /// Promote a wisp to a durable bead (anchor-gated)
    Promote(PromoteArgs),
    /// Complete a bead and its descendants
    Done(DoneArgs),
    /// Epic pipeline (start, ready, submit, status)
    Epic {
        #[command(subcommand)]
        command: EpicCommand,
    },
    /// Agent lifecycle (spawn, stop, cycle, list, heartbeat)
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Recover context from a predecessor session
    Seance(SeanceArgs),
    /// Event log plumbing (append, tail, await)
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Rig { .. } => "rig",
            Self::Sling(_) => "sling",
            Self::Queue { .. } => "queue",
            Self::Claim(_) => "claim",
            Self::Release(_) => "release",
            Self::Promote(_) => "promote",
            Self::Done(_) => "done",
            Self::Epic { .. } => "epic",
            Self::Agent { .. } => "agent",
            Self::Seance(_) => "seance",
            Self::Events { .. } => "events",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Init(args) => args.execute(),
        Commands::Rig { command } => command.execute(),
        Commands::Sling(args) => args.execute(),
        Commands::Queue { command } => command.execute(),
        Commands::Claim(args) => args.execute(),
        Commands::Release(args) => args.execute(),
        Commands::Promote(args) => args.execute(),
        Commands::Done(args) => args.execute(),
        Commands::Epic { command } => command.execute(),
        Commands::Agent { command } => command.execute(),
        Commands::Seance(args) => args.execute(),
        Commands::Events { command } => command.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            e.downcast_ref::<error::GtError>()
                .map_or(ExitCode::FAILURE, error::GtError::exit_code)
        }
    }
}
