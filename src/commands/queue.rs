//! `gt queue`: named work queues and their messages.

use clap::{Args, Subcommand};

use super::{TownArgs, TownCtx};
use crate::beads::{BeadStatus, BeadType, Beads, CreateOpts, ListFilter};
use crate::error::GtError;

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Create a named queue
    Add(AddArgs),
    /// Post a message onto a queue
    Send(SendArgs),
    /// List a queue's open messages
    List(ListArgs),
}

impl QueueCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Add(args) => args.execute(),
            Self::Send(args) => args.execute(),
            Self::List(args) => args.execute(),
        }
    }
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Queue name
    pub name: String,
    /// Glob matched against canonical agent ids at claim time
    #[arg(long, default_value = "*")]
    pub pattern: String,
    #[command(flatten)]
    town: TownArgs,
}

impl AddArgs {
    fn execute(&self) -> anyhow::Result<()> {
        if self.name.is_empty() || self.name.contains(':') {
            return Err(GtError::Invalid(format!("bad queue name {:?}", self.name)).into());
        }
        let ctx = TownCtx::open(&self.town)?;
        ctx.store.create_with_id(
            &format!("hq-queue-{}", self.name),
            &CreateOpts {
                bead_type: BeadType::Queue,
                title: format!("queue {}", self.name),
                labels: vec![
                    format!("queue:{}", self.name),
                    format!("claim-pattern:{}", self.pattern),
                ],
                ..CreateOpts::default()
            },
        )?;
        println!("created queue {} (pattern {})", self.name, self.pattern);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Queue name
    pub queue: String,
    /// Message title
    pub title: String,
    /// Message body
    #[arg(long, default_value = "")]
    pub body: String,
    #[command(flatten)]
    town: TownArgs,
}

impl SendArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        // The queue must exist before anyone posts into it.
        let queues = ctx.store.list(&ListFilter {
            bead_type: Some(BeadType::Queue),
            labels: vec![format!("queue:{}", self.queue)],
            ..ListFilter::default()
        })?;
        if queues.is_empty() {
            return Err(GtError::NotFound(format!("queue {}", self.queue)).into());
        }

        let message = ctx.store.create(&CreateOpts {
            bead_type: BeadType::Message,
            title: self.title.clone(),
            description: self.body.clone(),
            labels: vec![
                format!("queue:{}", self.queue),
                format!("from:{}", ctx.actor),
            ],
            ..CreateOpts::default()
        })?;
        println!("queued {} on {}", message.id, self.queue);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Queue name
    pub queue: String,
    #[command(flatten)]
    town: TownArgs,
}

impl ListArgs {
    fn execute(&self) -> anyhow::Result<()> {
        let ctx = TownCtx::open(&self.town)?;
        let mut messages = ctx.store.list(&ListFilter {
            status: Some(BeadStatus::Open),
            bead_type: Some(BeadType::Message),
            labels: vec![format!("queue:{}", self.queue)],
            ..ListFilter::default()
        })?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        for message in messages {
            let claimed = message
                .label_value("claimed-by")
                .map_or_else(String::new, |by| format!("  [claimed by {by}]"));
            println!("{}  {}{claimed}", message.id, message.title);
        }
        Ok(())
    }
}
