//! The plan grammar embedded in an epic's description:
//!
//! ```text
//! ## Overview
//! <prose>
//!
//! ## Step: <ref>
//! <instructions prose>
//! Needs: <ref>[, <ref>...]
//! Tier: <tier-string>
//! ```

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::GtError;

/// One parsed plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// Unique reference within the epic, e.g. `auth-1`.
    pub step_ref: String,
    /// Display title: the first instruction line, or the ref itself.
    pub title: String,
    pub instructions: String,
    /// Refs of steps that must land first (`blocks` edges).
    pub needs: Vec<String>,
    pub tier: Option<String>,
}

/// A parsed plan: overview prose plus ordered steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub overview: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Parse a plan out of an epic description. Duplicate refs, unknown
    /// `Needs:` targets, and dependency cycles are all rejected.
    pub fn parse(description: &str) -> anyhow::Result<Self> {
        let step_header = Regex::new(r"^##\s+Step:\s*(\S+)\s*$").expect("static regex");
        let overview_header = Regex::new(r"^##\s+Overview\s*$").expect("static regex");

        let mut overview = String::new();
        let mut steps: Vec<PlanStep> = Vec::new();
        let mut section: Option<Section> = None;

        for line in description.lines() {
            if overview_header.is_match(line) {
                flush(&mut steps, &mut overview, section.take())?;
                section = Some(Section::Overview(String::new()));
                continue;
            }
            if let Some(caps) = step_header.captures(line) {
                flush(&mut steps, &mut overview, section.take())?;
                section = Some(Section::Step {
                    step_ref: caps[1].to_string(),
                    body: String::new(),
                });
                continue;
            }
            match section {
                Some(Section::Overview(ref mut body)) | Some(Section::Step { ref mut body, .. }) => {
                    body.push_str(line);
                    body.push('\n');
                }
                None => {} // prose before any section is ignored
            }
        }
        flush(&mut steps, &mut overview, section.take())?;

        if steps.is_empty() {
            return Err(GtError::Invalid("plan has no steps".into()).into());
        }

        let plan = Self { overview, steps };
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_ref.as_str()) {
                return Err(
                    GtError::Invalid(format!("duplicate step ref {:?}", step.step_ref)).into(),
                );
            }
        }
        for step in &self.steps {
            for need in &step.needs {
                if !seen.contains(need.as_str()) {
                    return Err(GtError::Invalid(format!(
                        "step {:?} needs unknown step {need:?}",
                        step.step_ref
                    ))
                    .into());
                }
                if need == &step.step_ref {
                    return Err(
                        GtError::Cycle(format!("step {:?} needs itself", step.step_ref)).into(),
                    );
                }
            }
        }
        self.check_acyclic()
    }

    /// Kahn's algorithm over the `needs` relation; leftovers mean a cycle.
    fn check_acyclic(&self) -> anyhow::Result<()> {
        let mut pending: Vec<&PlanStep> = self.steps.iter().collect();
        let mut satisfied: BTreeSet<&str> = BTreeSet::new();

        loop {
            let before = pending.len();
            pending.retain(|step| {
                let ready = step.needs.iter().all(|n| satisfied.contains(n.as_str()));
                if ready {
                    satisfied.insert(step.step_ref.as_str());
                }
                !ready
            });
            if pending.is_empty() {
                return Ok(());
            }
            if pending.len() == before {
                let stuck: Vec<&str> = pending.iter().map(|s| s.step_ref.as_str()).collect();
                return Err(GtError::Cycle(format!(
                    "plan steps form a dependency cycle: {}",
                    stuck.join(", ")
                ))
                .into());
            }
        }
    }

    pub fn step(&self, step_ref: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_ref == step_ref)
    }
}

enum Section {
    Overview(String),
    Step { step_ref: String, body: String },
}

fn flush(
    steps: &mut Vec<PlanStep>,
    overview: &mut String,
    section: Option<Section>,
) -> anyhow::Result<()> {
    match section {
        None => Ok(()),
        Some(Section::Overview(body)) => {
            *overview = body.trim().to_string();
            Ok(())
        }
        Some(Section::Step { step_ref, body }) => {
            let mut needs = Vec::new();
            let mut tier = None;
            let mut instructions = Vec::new();

            for line in body.lines() {
                if let Some(rest) = line.strip_prefix("Needs:") {
                    needs = rest
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                } else if let Some(rest) = line.strip_prefix("Tier:") {
                    let t = rest.trim();
                    if t.is_empty() {
                        return Err(
                            GtError::Invalid(format!("step {step_ref:?}: empty Tier")).into()
                        );
                    }
                    tier = Some(t.to_string());
                } else {
                    instructions.push(line);
                }
            }

            let instructions = instructions.join("\n").trim().to_string();
            let title = instructions
                .lines()
                .next()
                .filter(|l| !l.is_empty())
                .unwrap_or(step_ref.as_str())
                .to_string();

            steps.push(PlanStep {
                step_ref,
                title,
                instructions,
                needs,
                tier,
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STEP_PLAN: &str = "\
## Overview
Split the auth work into token parsing and the middleware.

## Step: auth-1
Parse and validate bearer tokens.
Tier: core

## Step: auth-2
Wire the middleware through the router.
Needs: auth-1
";

    #[test]
    fn parses_overview_and_steps() {
        let plan = Plan::parse(TWO_STEP_PLAN).unwrap();
        assert!(plan.overview.starts_with("Split the auth work"));
        assert_eq!(plan.steps.len(), 2);

        let first = &plan.steps[0];
        assert_eq!(first.step_ref, "auth-1");
        assert_eq!(first.title, "Parse and validate bearer tokens.");
        assert_eq!(first.tier.as_deref(), Some("core"));
        assert!(first.needs.is_empty());

        let second = &plan.steps[1];
        assert_eq!(second.needs, vec!["auth-1"]);
        assert!(second.tier.is_none());
    }

    #[test]
    fn multiple_needs_comma_separated() {
        let text = "\
## Step: a
A.

## Step: b
B.

## Step: c
C.
Needs: a, b
";
        let plan = Plan::parse(text).unwrap();
        assert_eq!(plan.step("c").unwrap().needs, vec!["a", "b"]);
    }

    #[test]
    fn empty_plan_is_invalid() {
        let err = Plan::parse("## Overview\nJust prose, no steps.\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));
    }

    #[test]
    fn duplicate_refs_rejected() {
        let text = "## Step: a\nFirst.\n\n## Step: a\nAgain.\n";
        let err = Plan::parse(text).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_needs_rejected() {
        let text = "## Step: a\nA.\nNeeds: ghost\n";
        let err = Plan::parse(text).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));
    }

    #[test]
    fn needs_cycle_is_cycle_error() {
        let text = "\
## Step: a
A.
Needs: b

## Step: b
B.
Needs: a
";
        let err = Plan::parse(text).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Cycle(_))
        ));
    }

    #[test]
    fn self_need_is_cycle_error() {
        let text = "## Step: a\nA.\nNeeds: a\n";
        let err = Plan::parse(text).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Cycle(_))
        ));
    }

    #[test]
    fn step_without_instructions_titles_from_ref() {
        let text = "## Step: bare\n\n## Step: other\nSomething.\nNeeds: bare\n";
        let plan = Plan::parse(text).unwrap();
        assert_eq!(plan.step("bare").unwrap().title, "bare");
    }
}
