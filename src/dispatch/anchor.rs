//! The anchor gate: an external health signal consulted before any
//! state-persistent promotion (e.g. wisp → durable bead). Errors fail
//! closed.

use std::time::{Duration, Instant};

use crate::beads::{Bead, BeadType, Beads, CreateOpts};
use crate::config::anchor_latency_budget;
use crate::error::GtError;
use crate::subprocess::Tool;

/// Health states the anchor source may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorHealth {
    Ok,
    /// Degraded but operating normally; promotions still proceed.
    DegradedNormal,
    /// The anchor is frozen; promotions must not proceed.
    FrozenAnchor,
}

impl AnchorHealth {
    pub const fn allows_promotion(self) -> bool {
        matches!(self, Self::Ok | Self::DegradedNormal)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::DegradedNormal => "degraded+normal",
            Self::FrozenAnchor => "frozen-anchor",
        }
    }
}

/// The external health source. `check` must respect the deadline it is
/// given; the gate treats overruns as errors.
pub trait HealthSource {
    fn check(&self, deadline: Duration) -> anyhow::Result<AnchorHealth>;
}

/// Gate wrapper with the latency budget and fail-closed policy.
pub struct AnchorGate<'a> {
    source: &'a dyn HealthSource,
    budget: Duration,
}

impl<'a> AnchorGate<'a> {
    /// Budget from `GT_ANCHOR_HEALTH_MAX_LATENCY_MS` (default 250 ms).
    pub fn new(source: &'a dyn HealthSource) -> Self {
        Self {
            source,
            budget: anchor_latency_budget(),
        }
    }

    pub const fn with_budget(source: &'a dyn HealthSource, budget: Duration) -> Self {
        Self { source, budget }
    }

    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Check whether promotion may proceed. Retries transient source errors
    /// with backoff, but never past the latency budget; anything short of a
    /// clean allow is `Gate` with the reason.
    pub fn check_promotion(&self) -> anyhow::Result<()> {
        let start = Instant::now();
        let mut delay = Duration::from_millis(100);

        loop {
            let remaining = self.budget.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(
                    GtError::Gate(format!("no healthy answer within {:?}", self.budget)).into(),
                );
            }

            match self.source.check(remaining) {
                Ok(health) if health.allows_promotion() => return Ok(()),
                Ok(health) => {
                    return Err(GtError::Gate(format!("anchor reported {}", health.as_str())).into());
                }
                Err(e) => {
                    // Fail closed, but give transient errors a chance inside
                    // the budget.
                    if start.elapsed() + delay >= self.budget {
                        return Err(GtError::Gate(format!("health source failed: {e}")).into());
                    }
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
}

/// Health source backed by an external probe command. The first word of
/// stdout names the state; anything else (including a nonzero exit) is an
/// error, which the gate treats as a refusal.
pub struct CmdHealthSource {
    program: String,
}

impl CmdHealthSource {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl HealthSource for CmdHealthSource {
    fn check(&self, deadline: Duration) -> anyhow::Result<AnchorHealth> {
        let output = Tool::new(&self.program).timeout(deadline).run_ok()?;
        let word = output
            .stdout
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match word.as_str() {
            "ok" => Ok(AnchorHealth::Ok),
            "degraded+normal" | "degraded" => Ok(AnchorHealth::DegradedNormal),
            "frozen-anchor" | "frozen" => Ok(AnchorHealth::FrozenAnchor),
            other => Err(GtError::Backend(format!(
                "anchor probe said {other:?}"
            ))
            .into()),
        }
    }
}

/// Promote a transient wisp into a durable task bead, gated on anchor
/// health. The durable bead copies the wisp's content; the wisp closes with
/// a pointer once the copy exists.
pub fn promote_wisp(
    store: &dyn Beads,
    gate: &AnchorGate<'_>,
    wisp_id: &str,
) -> anyhow::Result<Bead> {
    let wisp = store.show(wisp_id)?;
    if wisp.bead_type != BeadType::Wisp {
        return Err(GtError::Invalid(format!("{wisp_id} is not a wisp")).into());
    }

    gate.check_promotion()?;

    let durable = store.create(&CreateOpts {
        bead_type: BeadType::Task,
        title: wisp.title.clone(),
        description: wisp.description.clone(),
        parent: (!wisp.parent.is_empty()).then(|| wisp.parent.clone()),
        labels: wisp.labels.clone(),
        priority: Some(wisp.priority),
    })?;

    store.close(wisp_id, &format!("promoted to {}", durable.id), false)?;
    Ok(durable)
}
