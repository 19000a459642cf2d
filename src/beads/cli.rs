//! Production bead store: every operation shells out to the `bd` CLI with
//! `BEADS_DIR` pointing at the routed directory and `BD_ACTOR` carrying the
//! audit actor.

use std::path::{Path, PathBuf};

use super::bead::{Bead, DepDirection, DepType, Dependency, ListFilter};
use super::redirect::resolve_beads_dir;
use super::routes::RouteTable;
use super::store::{Beads, CreateOpts, UpdateOpts};
use crate::error::GtError;
use crate::subprocess::{RunOutput, Tool, with_backend_retry};

pub struct CliBeads {
    town_root: PathBuf,
    routes: RouteTable,
    /// Directory used for operations that carry no bead id to route by
    /// (plain `create`, scoped `list`). This is the caller's workspace view.
    default_dir: PathBuf,
    actor: String,
}

impl CliBeads {
    /// Open a store rooted at the town, with bead-id routing from the town's
    /// route table and unrouted operations going to `workspace`'s beads
    /// directory (redirects chased).
    pub fn open(town_root: &Path, workspace: &Path, actor: &str) -> anyhow::Result<Self> {
        let routes = RouteTable::load(&town_root.join(".beads").join("routes.jsonl"))?;
        let candidate = workspace.join(".beads");
        let default_dir = if candidate.exists() {
            resolve_beads_dir(&candidate)?
        } else {
            resolve_beads_dir(&town_root.join(".beads"))?
        };
        Ok(Self {
            town_root: town_root.to_path_buf(),
            routes,
            default_dir,
            actor: actor.to_string(),
        })
    }

    fn dir_for(&self, id: &str) -> anyhow::Result<PathBuf> {
        self.routes.resolve(&self.town_root, id)
    }

    fn bd(&self, dir: &Path) -> Tool {
        Tool::new("bd")
            .env("BEADS_DIR", &dir.to_string_lossy())
            .env("BD_ACTOR", &self.actor)
    }

    /// Map a failed `bd` invocation to the error taxonomy. Unrecognized
    /// failures become `Backend` so the retry policy can take a swing.
    fn map_failure(output: &RunOutput, what: &str) -> GtError {
        let stderr = output.stderr.trim();
        let lower = stderr.to_lowercase();
        if lower.contains("not found") || lower.contains("no such issue") {
            GtError::NotFound(what.to_string())
        } else if lower.contains("already exists") || lower.contains("duplicate") {
            GtError::Exists(what.to_string())
        } else if lower.contains("pinned") {
            GtError::Invalid(format!("{what}: {stderr}"))
        } else {
            GtError::Backend(format!("bd {what}: {stderr}"))
        }
    }

    fn run_bd(&self, dir: &Path, args: &[&str], what: &str) -> anyhow::Result<RunOutput> {
        with_backend_retry(what, || {
            let output = self.bd(dir).args(args).run()?;
            if output.success() {
                Ok(output)
            } else {
                Err(Self::map_failure(&output, what).into())
            }
        })
    }

    fn create_in(&self, dir: &Path, id: Option<&str>, opts: &CreateOpts) -> anyhow::Result<Bead> {
        let type_arg = format!("--type={}", opts.bead_type);
        let title_arg = format!("--title={}", opts.title);
        let mut args: Vec<String> = vec!["create".to_string(), type_arg, title_arg];
        if let Some(id) = id {
            args.push(format!("--id={id}"));
        }
        if !opts.description.is_empty() {
            args.push(format!("--description={}", opts.description));
        }
        if let Some(ref parent) = opts.parent {
            args.push(format!("--parent={parent}"));
        }
        if let Some(priority) = opts.priority {
            args.push(format!("--priority={priority}"));
        }
        args.push("--json".to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let what = id.map_or_else(|| "create".to_string(), |id| format!("create {id}"));
        let output = self.run_bd(dir, &arg_refs, &what)?;
        let bead = parse_single_bead(&output)?;

        // Labels ride a separate subcommand on this backend.
        if !opts.labels.is_empty() {
            let mut label_args = vec!["label", "add", bead.id.as_str()];
            label_args.extend(opts.labels.iter().map(String::as_str));
            self.run_bd(dir, &label_args, &format!("label add {}", bead.id))?;
        }

        self.show_in(dir, &bead.id)
    }

    fn show_in(&self, dir: &Path, id: &str) -> anyhow::Result<Bead> {
        let output = self.run_bd(dir, &["show", id, "--json"], &format!("show {id}"))?;
        parse_single_bead(&output)
    }
}

/// `bd show --json` and `bd create --json` emit a JSON array with one object.
fn parse_single_bead(output: &RunOutput) -> anyhow::Result<Bead> {
    let beads: Vec<Bead> = output.parse_json()?;
    beads
        .into_iter()
        .next()
        .ok_or_else(|| GtError::Backend("bd returned an empty array".into()).into())
}

impl Beads for CliBeads {
    fn create(&self, opts: &CreateOpts) -> anyhow::Result<Bead> {
        self.create_in(&self.default_dir, None, opts)
    }

    fn create_with_id(&self, id: &str, opts: &CreateOpts) -> anyhow::Result<Bead> {
        let dir = self.dir_for(id)?;
        self.create_in(&dir, Some(id), opts)
    }

    fn show(&self, id: &str) -> anyhow::Result<Bead> {
        let dir = self.dir_for(id)?;
        self.show_in(&dir, id)
    }

    fn update(&self, id: &str, opts: &UpdateOpts) -> anyhow::Result<()> {
        if opts.is_empty() {
            return Ok(());
        }
        let dir = self.dir_for(id)?;

        let mut args: Vec<String> = vec!["update".to_string(), id.to_string()];
        if let Some(status) = opts.status {
            args.push(format!("--status={status}"));
        }
        if let Some(ref assignee) = opts.assignee {
            args.push(format!("--assignee={assignee}"));
        }
        if let Some(ref description) = opts.description {
            args.push(format!("--description={description}"));
        }
        if args.len() > 2 {
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            self.run_bd(&dir, &arg_refs, &format!("update {id}"))?;
        }

        if !opts.remove_labels.is_empty() {
            let mut label_args = vec!["label", "remove", id];
            label_args.extend(opts.remove_labels.iter().map(String::as_str));
            self.run_bd(&dir, &label_args, &format!("label remove {id}"))?;
        }
        if !opts.add_labels.is_empty() {
            let mut label_args = vec!["label", "add", id];
            label_args.extend(opts.add_labels.iter().map(String::as_str));
            self.run_bd(&dir, &label_args, &format!("label add {id}"))?;
        }
        Ok(())
    }

    fn list(&self, filter: &ListFilter) -> anyhow::Result<Vec<Bead>> {
        // Route by the parent id when the filter names one; otherwise list
        // the caller's workspace view.
        let dir = match filter.parent {
            Some(ref parent) => self.dir_for(parent)?,
            None => self.default_dir.clone(),
        };

        let mut args: Vec<String> = vec!["list".to_string()];
        if let Some(status) = filter.status {
            args.push(format!("--status={status}"));
        }
        if let Some(ref assignee) = filter.assignee {
            args.push(format!("--assignee={assignee}"));
        }
        if let Some(bead_type) = filter.bead_type {
            args.push(format!("--type={bead_type}"));
        }
        if let Some(ref parent) = filter.parent {
            args.push(format!("--parent={parent}"));
        }
        for label in &filter.labels {
            args.push(format!("--label={label}"));
        }
        if let Some(priority) = filter.priority_at_least {
            args.push(format!("--priority={priority}"));
        }
        args.push("--json".to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_bd(&dir, &arg_refs, "list")?;
        let beads: Vec<Bead> = output.parse_json()?;
        // The backend treats label filters as any-of; the contract here is a
        // conjunction, so re-filter.
        Ok(beads.into_iter().filter(|b| filter.matches(b)).collect())
    }

    fn close(&self, id: &str, reason: &str, force: bool) -> anyhow::Result<()> {
        let dir = self.dir_for(id)?;
        let reason_arg = format!("--reason={reason}");
        let mut args = vec!["close", id, reason_arg.as_str()];
        if force {
            args.push("--force");
        }
        self.run_bd(&dir, &args, &format!("close {id}"))?;
        Ok(())
    }

    fn add_dependency(&self, from: &str, to: &str, dep_type: DepType) -> anyhow::Result<()> {
        let dir = self.dir_for(from)?;
        let type_arg = format!("--type={dep_type}");
        self.run_bd(
            &dir,
            &["dep", "add", from, to, type_arg.as_str()],
            &format!("dep add {from} {to}"),
        )?;
        Ok(())
    }

    fn dep_list(
        &self,
        id: &str,
        direction: DepDirection,
        dep_type: Option<DepType>,
    ) -> anyhow::Result<Vec<Dependency>> {
        let dir = self.dir_for(id)?;
        let mut args: Vec<String> = vec!["dep".to_string(), "list".to_string(), id.to_string()];
        if direction != DepDirection::Both {
            args.push(format!("--direction={}", direction.as_str()));
        }
        if let Some(t) = dep_type {
            args.push(format!("--type={t}"));
        }
        args.push("--json".to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_bd(&dir, &arg_refs, &format!("dep list {id}"))?;
        output.parse_json()
    }
}
