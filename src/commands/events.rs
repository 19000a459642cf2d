//! `gt events`: event-log plumbing (append, tail, bounded waits).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Subcommand};

use super::{TownArgs, TownCtx};
use crate::config::parse_duration;
use crate::error::GtError;
use crate::events::{AwaitOutcome, Event};

#[derive(Debug, Subcommand)]
pub enum EventsCommand {
    /// Append an event to the log
    Append(AppendArgs),
    /// Print the last N events
    Tail(TailArgs),
    /// Block until a matching event arrives
    Await(AwaitArgs),
}

impl EventsCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Append(args) => args.execute(),
            Self::Tail(args) => args.execute(),
            Self::Await(args) => args.execute(),
        }
    }
}

#[derive(Debug, Args)]
pub struct AppendArgs {
    /// Event type (session_start, sling, hook, done, ...)
    pub event_type: String,
    /// Source rig (or "hq")
    #[arg(long, default_value = "hq")]
    pub source: String,
    /// JSON payload
    #[arg(long)]
    pub payload: Option<String>,
    #[command(flatten)]
    town: TownArgs,
}

impl AppendArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let mut event = Event::new(&self.event_type, &ctx.actor, &self.source);
        if let Some(ref payload) = self.payload {
            let value: serde_json::Value = serde_json::from_str(payload)
                .map_err(|e| GtError::Invalid(format!("bad payload JSON: {e}")))?;
            event = event.with_payload(value);
        }
        ctx.events.append(&event)?;
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct TailArgs {
    /// How many events to print
    #[arg(short = 'n', long, default_value_t = 20)]
    pub count: usize,
    /// Only events from this source
    #[arg(long)]
    pub source: Option<String>,
    #[command(flatten)]
    town: TownArgs,
}

impl TailArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let events: Vec<Event> = ctx
            .events
            .read_all()
            .into_iter()
            .filter(|e| self.source.as_deref().is_none_or(|s| e.source == s))
            .collect();
        for event in events.iter().rev().take(self.count).rev() {
            println!("{}", serde_json::to_string(event)?);
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct AwaitArgs {
    /// Event type to wait for
    pub event_type: String,
    /// Only events from this source
    #[arg(long)]
    pub source: Option<String>,
    /// How long to wait, e.g. 30s or 5m
    #[arg(long, default_value = "60s")]
    pub timeout: String,
    #[command(flatten)]
    town: TownArgs,
}

impl AwaitArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let timeout = parse_duration(&self.timeout)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::Relaxed);
        })?;

        match ctx.events.await_event(
            &self.event_type,
            self.source.as_deref(),
            timeout,
            &cancel,
        )? {
            AwaitOutcome::Matched(event) => {
                println!("{}", serde_json::to_string(&event)?);
                Ok(())
            }
            AwaitOutcome::TimedOut => {
                Err(GtError::External {
                    tool: "await-event".to_string(),
                    code: 1,
                    message: format!("no {} event within {}", self.event_type, self.timeout),
                }
                .into())
            }
            AwaitOutcome::Cancelled => {
                eprintln!("cancelled");
                Ok(())
            }
        }
    }
}
