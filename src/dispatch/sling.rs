//! Sling: the top-level dispatch verb. Resolves a target expression to a
//! concrete agent (spawning one when asked), then hooks the bead to it.

use rand::seq::IndexedRandom;

use super::hook::hook;
use crate::agent::identity::{AgentState, Identity, Role};
use crate::agent::registry::Registry;
use crate::beads::{BeadType, Beads, ListFilter};
use crate::error::GtError;
use crate::events::{Event, EventLog};

/// A parsed sling target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A concrete agent identity.
    Agent(Identity),
    /// The dog pool: any idle dog.
    DogPool,
    /// A bare rig: any idle worker in it.
    Rig(String),
}

impl Target {
    /// Parse a target expression. Resolution order: identity shapes first
    /// (which covers dog detection), then the bare-rig form.
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        if let Ok(identity) = Identity::parse(expr) {
            if identity.role == Role::Dog && identity.name.is_none() {
                return Ok(Self::DogPool);
            }
            return Ok(Self::Agent(identity));
        }
        if !expr.is_empty() && !expr.contains('/') {
            return Ok(Self::Rig(expr.to_string()));
        }
        Err(GtError::Invalid(format!("bad sling target {expr:?}")).into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlingOptions {
    /// Spawn a worker when the target has none available.
    pub create: bool,
    /// Print intent without side effects.
    pub dry_run: bool,
    pub actor: String,
}

/// Result of a sling: who got the bead, and whether we had to spawn them.
#[derive(Debug, Clone)]
pub struct SlingOutcome {
    pub agent: Identity,
    pub agent_bead: String,
    pub spawned: bool,
}

const WORKER_NAMES: &[&str] = &[
    "nux", "slit", "capable", "toast", "dag", "cheedo", "rictus", "valkyrie", "furiosa", "ace",
];

/// Pick a worker name not already in `taken`.
fn fresh_name(taken: &[String]) -> String {
    let mut rng = rand::rng();
    if let Some(name) = WORKER_NAMES
        .iter()
        .filter(|n| !taken.iter().any(|t| t == *n))
        .collect::<Vec<_>>()
        .choose(&mut rng)
    {
        return (**name).to_string();
    }
    // Pool exhausted; suffix a number.
    let base = WORKER_NAMES.choose(&mut rng).copied().unwrap_or("worker");
    let mut n = 2;
    loop {
        let candidate = format!("{base}{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Idle agents of a role, by scanning agent beads for `state:idle`.
fn idle_agents(
    store: &dyn Beads,
    registry: &Registry<'_>,
    role: Role,
    rig: Option<&str>,
) -> anyhow::Result<Vec<Identity>> {
    let beads = store.list(&ListFilter {
        bead_type: Some(BeadType::Agent),
        labels: vec![AgentState::Idle.label()],
        ..ListFilter::default()
    })?;

    let mut idle = Vec::new();
    for bead in beads {
        // Agent bead titles carry the canonical identity expression.
        let Ok(identity) = Identity::parse(&bead.title) else {
            continue;
        };
        if identity.role != role || identity.rig.as_deref() != rig {
            continue;
        }
        // An idle bead without a live session is stale; skip it.
        if registry.resolve(&identity).is_ok_and(|r| r.running) {
            idle.push(identity);
        }
    }
    idle.sort_by_key(Identity::expr);
    Ok(idle)
}

fn names_in_use(store: &dyn Beads, role: Role, rig: Option<&str>) -> anyhow::Result<Vec<String>> {
    let beads = store.list(&ListFilter {
        bead_type: Some(BeadType::Agent),
        ..ListFilter::default()
    })?;
    Ok(beads
        .iter()
        .filter_map(|b| Identity::parse(&b.title).ok())
        .filter(|i| i.role == role && i.rig.as_deref() == rig)
        .filter_map(|i| i.name)
        .collect())
}

/// Resolve the target to a concrete identity, spawning when permitted.
/// Returns the identity and whether a spawn happened.
fn resolve_target(
    store: &dyn Beads,
    registry: &Registry<'_>,
    target: &Target,
    opts: &SlingOptions,
) -> anyhow::Result<(Identity, bool)> {
    match target {
        Target::DogPool => {
            if let Some(identity) = idle_agents(store, registry, Role::Dog, None)?.into_iter().next()
            {
                return Ok((identity, false));
            }
            if !opts.create {
                return Err(GtError::NotFound("no idle dog (use --create)".into()).into());
            }
            let name = fresh_name(&names_in_use(store, Role::Dog, None)?);
            let identity = Identity::named(Role::Dog, None, &name);
            if !opts.dry_run {
                registry.spawn(&identity)?;
            }
            Ok((identity, true))
        }

        Target::Rig(rig) => {
            // A sling into an unregistered rig is hard-fatal.
            registry.rig_prefix(rig)?;
            if let Some(identity) =
                idle_agents(store, registry, Role::Polecat, Some(rig))?.into_iter().next()
            {
                return Ok((identity, false));
            }
            if !opts.create {
                return Err(
                    GtError::NotFound(format!("no idle worker in {rig} (use --create)")).into(),
                );
            }
            let name = fresh_name(&names_in_use(store, Role::Polecat, Some(rig))?);
            let identity = Identity::named(Role::Polecat, Some(rig), &name);
            if !opts.dry_run {
                registry.spawn(&identity)?;
            }
            Ok((identity, true))
        }

        Target::Agent(identity) => {
            if let Some(rig) = identity.rig.as_deref() {
                registry.rig_prefix(rig)?;
            }
            let session = registry.session_name(identity)?;
            let running = registry
                .resolve(identity)
                .map(|r| r.running)
                .or_else(|e| {
                    // No agent bead yet is fine for spawnable roles.
                    if matches!(e.downcast_ref::<GtError>(), Some(GtError::NotFound(_))) {
                        Ok(false)
                    } else {
                        Err(e)
                    }
                })?;

            if running {
                // An occupied worker is hard-fatal without --create; with it,
                // fall back to a fresh worker beside them.
                if registry.state(identity)? == AgentState::Working {
                    if !opts.create {
                        return Err(GtError::Contention(format!(
                            "{identity} is occupied (use --create for a fresh worker)"
                        ))
                        .into());
                    }
                    return match (identity.role, identity.rig.as_deref()) {
                        (Role::Polecat, Some(rig)) => {
                            resolve_target(store, registry, &Target::Rig(rig.to_string()), opts)
                        }
                        (Role::Dog, _) => resolve_target(store, registry, &Target::DogPool, opts),
                        _ => Err(GtError::Contention(format!("{identity} is occupied")).into()),
                    };
                }
                return Ok((identity.clone(), false));
            }

            // Crew must already exist; everyone else may be spawned.
            if identity.role == Role::Crew {
                return Err(GtError::NotFound(format!("crew session {session}")).into());
            }
            if !opts.create {
                return Err(
                    GtError::NotFound(format!("{identity} not running (use --create)")).into(),
                );
            }
            if !opts.dry_run {
                registry.spawn(identity)?;
            }
            Ok((identity.clone(), true))
        }
    }
}

/// Dispatch `bead_id` to `target`: parse, resolve, spawn if needed, hook.
///
/// On hook failure the agent returns to its previous state; on spawn failure
/// the bead stays unhooked and the error surfaces.
pub fn sling(
    store: &dyn Beads,
    events: &EventLog,
    registry: &Registry<'_>,
    bead_id: &str,
    target_expr: &str,
    opts: &SlingOptions,
) -> anyhow::Result<SlingOutcome> {
    // Bead must exist before we consider spawning anything.
    store.show(bead_id)?;

    let target = Target::parse(target_expr)?;
    let (identity, spawned) = resolve_target(store, registry, &target, opts)?;
    let agent_bead = registry.bead_id(&identity)?;

    if opts.dry_run {
        println!("would sling {bead_id} -> {identity} ({agent_bead})");
        return Ok(SlingOutcome {
            agent: identity,
            agent_bead,
            spawned,
        });
    }

    let prev_state = registry.state(&identity)?;

    if let Err(e) = hook(store, events, bead_id, &agent_bead, &opts.actor) {
        // The hook never happened; make sure the agent's state reflects that.
        if registry.state(&identity)? != prev_state {
            let _ = registry.set_state(&identity, prev_state);
        }
        return Err(e);
    }

    if prev_state == AgentState::Idle {
        registry.set_state(&identity, AgentState::Working)?;
    }

    let _ = events.append(
        &Event::new(
            "sling",
            &opts.actor,
            identity.rig.as_deref().unwrap_or("hq"),
        )
        .with_payload(serde_json::json!({
            "bead": bead_id,
            "target": target_expr,
            "agent": agent_bead,
            "spawned": spawned,
        })),
    );

    Ok(SlingOutcome {
        agent: identity,
        agent_bead,
        spawned,
    })
}
