//! The agent registry: the one component that talks to the session backend.
//! It owns the `state:` label on agent beads; the dispatch engine and the
//! backend's lifecycle callbacks drive transitions through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::identity::{AgentState, Identity, Role};
use super::session::Sessions;
use crate::beads::{Beads, BeadType, CreateOpts, UpdateOpts};
use crate::error::GtError;
use crate::rig::{DOCKED_LABEL, rig_bead_id};

/// Focus movement for [`Registry::cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    Next,
    Prev,
}

/// A resolved identity: its bead id, session name, and liveness.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub identity: Identity,
    pub bead_id: String,
    pub session: String,
    pub running: bool,
}

pub struct Registry<'a> {
    store: &'a dyn Beads,
    sessions: &'a dyn Sessions,
    town_root: PathBuf,
    town_prefix: String,
    rig_prefixes: BTreeMap<String, String>,
}

impl<'a> Registry<'a> {
    pub fn new(
        store: &'a dyn Beads,
        sessions: &'a dyn Sessions,
        town_root: &Path,
        town_prefix: &str,
    ) -> Self {
        Self {
            store,
            sessions,
            town_root: town_root.to_path_buf(),
            town_prefix: town_prefix.to_string(),
            rig_prefixes: BTreeMap::new(),
        }
    }

    /// Register a rig's bead prefix (normally loaded from `rigs.json`).
    #[must_use]
    pub fn with_rig(mut self, rig: &str, prefix: &str) -> Self {
        self.rig_prefixes.insert(rig.to_string(), prefix.to_string());
        self
    }

    pub fn rig_prefix(&self, rig: &str) -> anyhow::Result<&str> {
        self.rig_prefixes
            .get(rig)
            .map(String::as_str)
            .ok_or_else(|| GtError::NotFound(format!("rig {rig}")).into())
    }

    /// Bead id for an identity, resolving the rig's prefix when rig-scoped.
    pub fn bead_id(&self, identity: &Identity) -> anyhow::Result<String> {
        let prefix = match identity.rig.as_deref() {
            Some(rig) => self.rig_prefix(rig)?,
            None => "hq-",
        };
        identity.bead_id(prefix)
    }

    pub fn session_name(&self, identity: &Identity) -> anyhow::Result<String> {
        identity.session_name(&self.town_prefix)
    }

    /// Resolve an identity to its bead and runtime address.
    pub fn resolve(&self, identity: &Identity) -> anyhow::Result<Resolved> {
        let bead_id = self.bead_id(identity)?;
        self.store.show(&bead_id)?;
        let session = self.session_name(identity)?;
        let running = self.sessions.exists(&session)?;
        Ok(Resolved {
            identity: identity.clone(),
            bead_id,
            session,
            running,
        })
    }

    /// Current state label of an agent bead; absent labels read as stopped.
    pub fn state(&self, identity: &Identity) -> anyhow::Result<AgentState> {
        let bead = self.store.show(&self.bead_id(identity)?)?;
        bead.label_value("state")
            .map_or(Ok(AgentState::Stopped), str::parse)
            .map_err(Into::into)
    }

    /// Transition the state label, enforcing the agent state machine.
    pub fn set_state(&self, identity: &Identity, next: AgentState) -> anyhow::Result<()> {
        let current = self.state(identity)?;
        if current != next && !current.can_transition_to(next) {
            return Err(GtError::Invalid(format!(
                "agent {identity}: illegal transition {current} -> {next}"
            ))
            .into());
        }
        self.store.update(
            &self.bead_id(identity)?,
            &UpdateOpts {
                add_labels: vec![next.label()],
                remove_labels: vec![current.label()],
                ..UpdateOpts::default()
            },
        )
    }

    /// First heartbeat after spawn: `spawning -> idle`.
    pub fn heartbeat(&self, identity: &Identity) -> anyhow::Result<()> {
        if self.state(identity)? == AgentState::Spawning {
            self.set_state(identity, AgentState::Idle)?;
        }
        Ok(())
    }

    /// Spawn a session for `identity` and reconcile its agent bead to
    /// `spawning`. Refused for rig-scoped identities on a docked rig.
    /// Transient backend failures get one retry.
    pub fn spawn(&self, identity: &Identity) -> anyhow::Result<Resolved> {
        if let Some(rig) = identity.rig.as_deref() {
            if self.is_docked(rig)? {
                return Err(GtError::Docked(rig.to_string()).into());
            }
        }

        let session = self.session_name(identity)?;
        if self.sessions.exists(&session)? {
            return Err(GtError::Exists(format!("session {session}")).into());
        }

        let cwd = self.workspace_dir(identity);
        self.prepare_workspace(identity, &cwd)?;
        let env = self.spawn_env(identity, &session);

        if let Err(e) = self.sessions.spawn(&session, &cwd, &env) {
            let transient = e
                .downcast_ref::<GtError>()
                .is_some_and(GtError::is_transient);
            if !transient {
                return Err(e);
            }
            tracing::warn!(session = %session, error = %e, "spawn failed, retrying once");
            self.sessions.spawn(&session, &cwd, &env)?;
        }

        self.reconcile_spawned(identity)?;
        self.resolve(identity)
    }

    /// Ensure the workspace directory exists; rig-scoped workers get a
    /// redirect pointer presenting the rig's bead directory as their view.
    fn prepare_workspace(&self, identity: &Identity, cwd: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(cwd)?;
        if identity.rig.is_some()
            && matches!(identity.role, Role::Polecat | Role::Crew)
            && !cwd.join(".beads").exists()
        {
            crate::beads::redirect::write_redirect(
                &cwd.join(".beads"),
                "../../mayor/rig/.beads",
            )?;
        }
        Ok(())
    }

    fn reconcile_spawned(&self, identity: &Identity) -> anyhow::Result<()> {
        let bead_id = self.bead_id(identity)?;
        match self.store.show(&bead_id) {
            Ok(bead) => {
                let current: AgentState = bead
                    .label_value("state")
                    .map_or(Ok(AgentState::Stopped), str::parse)?;
                self.store.update(
                    &bead_id,
                    &UpdateOpts {
                        add_labels: vec![AgentState::Spawning.label()],
                        remove_labels: vec![current.label()],
                        ..UpdateOpts::default()
                    },
                )
            }
            Err(e) if matches!(e.downcast_ref::<GtError>(), Some(GtError::NotFound(_))) => {
                self.store.create_with_id(
                    &bead_id,
                    &CreateOpts {
                        bead_type: BeadType::Agent,
                        title: identity.expr(),
                        labels: vec![AgentState::Spawning.label()],
                        ..CreateOpts::default()
                    },
                )?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop an agent: graceful kill, then forceful; mark the bead stopped.
    /// Idempotent: a missing session or bead is not an error.
    pub fn stop(&self, identity: &Identity, force: bool) -> anyhow::Result<()> {
        let session = self.session_name(identity)?;
        self.sessions.kill(&session, force)?;
        if self.sessions.exists(&session)? {
            self.sessions.kill(&session, true)?;
        }

        let bead_id = self.bead_id(identity)?;
        match self.store.show(&bead_id) {
            Ok(_) => self.set_state(identity, AgentState::Stopped),
            Err(e) if matches!(e.downcast_ref::<GtError>(), Some(GtError::NotFound(_))) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// All live sessions belonging to `rig`, classified.
    pub fn rig_sessions(&self, rig: &str) -> anyhow::Result<Vec<(String, Identity)>> {
        Ok(self
            .sessions
            .list()?
            .into_iter()
            .map(|s| {
                let id = Identity::classify(&s, &self.town_prefix);
                (s, id)
            })
            .filter(|(_, id)| id.rig.as_deref() == Some(rig))
            .collect())
    }

    /// Switch focus among the rig's sessions in lexicographic order with
    /// wrap-around. A single-session set is returned unmodified.
    pub fn cycle(&self, rig: &str, direction: CycleDirection) -> anyhow::Result<Option<String>> {
        let mut names: Vec<String> =
            self.rig_sessions(rig)?.into_iter().map(|(s, _)| s).collect();
        names.sort();

        if names.len() <= 1 {
            return Ok(names.into_iter().next());
        }

        let focused = self.sessions.focused()?;
        let current = focused
            .as_deref()
            .and_then(|f| names.iter().position(|n| n == f))
            .unwrap_or(0);

        let target = match direction {
            CycleDirection::Next => (current + 1) % names.len(),
            CycleDirection::Prev => (current + names.len() - 1) % names.len(),
        };

        self.sessions.focus(&names[target])?;
        Ok(Some(names[target].clone()))
    }

    pub fn is_docked(&self, rig: &str) -> anyhow::Result<bool> {
        let prefix = self.rig_prefix(rig)?;
        crate::rig::is_docked(self.store, prefix, rig)
    }

    /// Dock a rig: stop witness, refinery, and every polecat, then set the
    /// `status:docked` label. Crew sessions keep running; leftovers are a
    /// warning, not a failure.
    pub fn dock(&self, rig: &str, dry_run: bool) -> anyhow::Result<Vec<String>> {
        let prefix = self.rig_prefix(rig)?.to_string();
        let mut stopped = Vec::new();

        for (session, identity) in self.rig_sessions(rig)? {
            if matches!(identity.role, Role::Witness | Role::Refinery | Role::Polecat) {
                stopped.push(session.clone());
                if !dry_run {
                    self.stop(&identity, false)?;
                }
            }
        }

        if dry_run {
            return Ok(stopped);
        }

        self.store.update(
            &rig_bead_id(&prefix, rig),
            &UpdateOpts {
                add_labels: vec![DOCKED_LABEL.to_string()],
                ..UpdateOpts::default()
            },
        )?;

        let leftovers = self.rig_sessions(rig)?;
        if !leftovers.is_empty() {
            tracing::warn!(
                rig,
                sessions = ?leftovers.iter().map(|(s, _)| s).collect::<Vec<_>>(),
                "rig docked with sessions still running"
            );
        }
        Ok(stopped)
    }

    /// Remove the docked label. Does not restart anything.
    pub fn undock(&self, rig: &str) -> anyhow::Result<()> {
        let prefix = self.rig_prefix(rig)?.to_string();
        self.store.update(
            &rig_bead_id(&prefix, rig),
            &UpdateOpts {
                remove_labels: vec![DOCKED_LABEL.to_string()],
                ..UpdateOpts::default()
            },
        )
    }

    /// Supervisor entry point: bring up a rig's witness and refinery.
    /// Refused outright when the rig is docked.
    pub fn start_rig(&self, rig: &str) -> anyhow::Result<Vec<Resolved>> {
        if self.is_docked(rig)? {
            return Err(GtError::Docked(rig.to_string()).into());
        }

        let mut started = Vec::new();
        for role in [Role::Witness, Role::Refinery] {
            let identity = Identity::rig_scoped(role, rig);
            let session = self.session_name(&identity)?;
            if self.sessions.exists(&session)? {
                continue;
            }
            started.push(self.spawn(&identity)?);
        }
        Ok(started)
    }

    /// Workspace directory for a spawned session, per the town layout.
    pub fn workspace_dir(&self, identity: &Identity) -> PathBuf {
        let root = &self.town_root;
        match (identity.role, identity.rig.as_deref(), identity.name.as_deref()) {
            (Role::Polecat, Some(rig), Some(name)) => root.join(rig).join("polecats").join(name),
            (Role::Crew, Some(rig), Some(name)) => root.join(rig).join("crew").join(name),
            (Role::Witness, Some(rig), _) => root.join(rig).join("witness").join("rig"),
            (Role::Refinery, Some(rig), _) => root.join(rig).join("refinery").join("rig"),
            (Role::Dog, _, Some(name)) => root.join("deacon").join("dogs").join(name),
            (Role::Deacon | Role::Boot | Role::Dog, _, _) => root.join("deacon"),
            _ => root.join("mayor"),
        }
    }

    fn spawn_env(&self, identity: &Identity, session: &str) -> Vec<(String, String)> {
        let mut env = vec![
            ("GT_ROLE".to_string(), identity.role.to_string()),
            ("GT_SESSION_ID".to_string(), session.to_string()),
        ];
        // Forward the operator's autocompact override into agent sessions;
        // the config layer warns when it is out of band.
        if let Some(pct) = crate::config::autocompact_pct_override() {
            env.push((
                "CLAUDE_AUTOCOMPACT_PCT_OVERRIDE".to_string(),
                pct.to_string(),
            ));
        }
        if let Some(ref rig) = identity.rig {
            env.push(("GT_RIG".to_string(), rig.clone()));
        }
        match (identity.role, identity.name.as_deref()) {
            (Role::Polecat, Some(name)) => {
                env.push(("GT_POLECAT".to_string(), name.to_string()));
            }
            (Role::Crew, Some(name)) => {
                env.push(("GT_CREW".to_string(), name.to_string()));
            }
            _ => {}
        }
        env
    }
}
