//! Hooking: assigning a bead to exactly one agent.
//!
//! The transition is a single bead write carrying both `status=hooked` and
//! the assignee, so no observer ever sees one without the other. The event
//! record lands after the write; a hook that fails leaves the bead in its
//! previous state.

use crate::beads::{BeadStatus, Beads, UpdateOpts};
use crate::error::GtError;
use crate::events::{Event, EventLog};

/// Hook `bead_id` to `agent` (a canonical agent bead id).
///
/// Fails with `Exists` when the bead is already hooked to someone else, and
/// with `Contention` when the agent already holds a hooked bead, since an agent
/// has at most one hook at a time.
pub fn hook(
    store: &dyn Beads,
    events: &EventLog,
    bead_id: &str,
    agent: &str,
    actor: &str,
) -> anyhow::Result<()> {
    let bead = store.show(bead_id)?;
    if bead.status == BeadStatus::Hooked && bead.assignee != agent {
        return Err(GtError::Exists(format!(
            "{bead_id} already hooked to {}",
            bead.assignee
        ))
        .into());
    }
    if bead.status == BeadStatus::Closed {
        return Err(GtError::Invalid(format!("{bead_id} is closed")).into());
    }

    let held = store.list(&crate::beads::ListFilter {
        status: Some(BeadStatus::Hooked),
        assignee: Some(agent.to_string()),
        ..crate::beads::ListFilter::default()
    })?;
    if held.iter().any(|b| b.id != bead_id) {
        return Err(GtError::Contention(format!(
            "{agent} already holds {}",
            held[0].id
        ))
        .into());
    }

    // Status and assignee ride one write; there is no intermediate state.
    store.update(
        bead_id,
        &UpdateOpts {
            status: Some(BeadStatus::Hooked),
            assignee: Some(agent.to_string()),
            ..UpdateOpts::default()
        },
    )?;

    let _ = events.append(
        &Event::new("hook", actor, agent).with_payload(serde_json::json!({
            "bead": bead_id,
            "from": bead.assignee,
            "to": agent,
        })),
    );
    Ok(())
}

/// Release a hook, returning the bead to `open` with no assignee. Only the
/// holder may unhook.
pub fn unhook(
    store: &dyn Beads,
    events: &EventLog,
    bead_id: &str,
    agent: &str,
) -> anyhow::Result<()> {
    let bead = store.show(bead_id)?;
    if bead.status != BeadStatus::Hooked {
        return Ok(());
    }
    if bead.assignee != agent {
        return Err(GtError::Invalid(format!(
            "{bead_id} is hooked to {}, not {agent}",
            bead.assignee
        ))
        .into());
    }

    store.update(
        bead_id,
        &UpdateOpts {
            status: Some(BeadStatus::Open),
            assignee: Some(String::new()),
            ..UpdateOpts::default()
        },
    )?;

    let _ = events.append(
        &Event::new("hook", agent, agent).with_payload(serde_json::json!({
            "bead": bead_id,
            "from": agent,
            "to": "",
        })),
    );
    Ok(())
}

/// Close a hooked bead and its descendants, leaves first. A failure
/// mid-sequence leaves everything upstream intact for a retry.
pub fn done(
    store: &dyn Beads,
    events: &EventLog,
    bead_id: &str,
    agent: &str,
    reason: &str,
) -> anyhow::Result<Vec<String>> {
    let bead = store.show(bead_id)?;
    if bead.status == BeadStatus::Hooked && bead.assignee != agent {
        return Err(GtError::Invalid(format!(
            "{bead_id} is hooked to {}, not {agent}",
            bead.assignee
        ))
        .into());
    }

    let mut closed = Vec::new();
    close_subtree(store, bead_id, reason, &mut closed)?;

    let _ = events.append(
        &Event::new("done", agent, agent).with_payload(serde_json::json!({
            "bead": bead_id,
            "closed": closed,
        })),
    );
    Ok(closed)
}

fn close_subtree(
    store: &dyn Beads,
    id: &str,
    reason: &str,
    closed: &mut Vec<String>,
) -> anyhow::Result<()> {
    let children = store.list(&crate::beads::ListFilter {
        parent: Some(id.to_string()),
        ..crate::beads::ListFilter::default()
    })?;
    for child in children {
        if child.status != BeadStatus::Closed {
            close_subtree(store, &child.id, reason, closed)?;
        }
    }
    store.close(id, reason, false)?;
    closed.push(id.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::bead::test_bead;
    use crate::beads::mem::MemBeads;
    use crate::beads::{Bead, BeadType};

    fn setup() -> (MemBeads, EventLog, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let log = EventLog::new(&tmp.path().join("events.jsonl"));
        (MemBeads::new(), log, tmp)
    }

    fn seed(store: &MemBeads, id: &str) -> Bead {
        let bead = test_bead(id, BeadType::Task);
        store.insert(bead.clone());
        bead
    }

    #[test]
    fn hook_sets_status_and_assignee_together() {
        let (store, log, _tmp) = setup();
        seed(&store, "gt-task-1");

        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();
        let bead = store.show("gt-task-1").unwrap();
        assert_eq!(bead.status, BeadStatus::Hooked);
        assert_eq!(bead.assignee, "gt-gastown-polecat-nux");

        let events = log.read_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "hook");
        assert_eq!(events[0].payload.as_ref().unwrap()["to"], "gt-gastown-polecat-nux");
    }

    #[test]
    fn hook_refuses_foreign_hook() {
        let (store, log, _tmp) = setup();
        seed(&store, "gt-task-1");
        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();

        let err =
            hook(&store, &log, "gt-task-1", "gt-gastown-polecat-slit", "hq-mayor").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Exists(_))
        ));
        // bead untouched
        let bead = store.show("gt-task-1").unwrap();
        assert_eq!(bead.assignee, "gt-gastown-polecat-nux");
    }

    #[test]
    fn agent_holds_at_most_one_hook() {
        let (store, log, _tmp) = setup();
        seed(&store, "gt-task-1");
        seed(&store, "gt-task-2");
        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();

        let err =
            hook(&store, &log, "gt-task-2", "gt-gastown-polecat-nux", "hq-mayor").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Contention(_))
        ));
        assert_eq!(store.show("gt-task-2").unwrap().status, BeadStatus::Open);
    }

    #[test]
    fn rehook_same_agent_is_idempotent() {
        let (store, log, _tmp) = setup();
        seed(&store, "gt-task-1");
        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();
        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();
        assert_eq!(store.show("gt-task-1").unwrap().status, BeadStatus::Hooked);
    }

    #[test]
    fn unhook_requires_holder() {
        let (store, log, _tmp) = setup();
        seed(&store, "gt-task-1");
        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();

        let err = unhook(&store, &log, "gt-task-1", "gt-gastown-polecat-slit").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));

        unhook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux").unwrap();
        let bead = store.show("gt-task-1").unwrap();
        assert_eq!(bead.status, BeadStatus::Open);
        assert_eq!(bead.assignee, "");
    }

    #[test]
    fn done_closes_descendants_leaves_first() {
        let (store, log, _tmp) = setup();
        seed(&store, "gt-task-1");
        let mut child = test_bead("gt-task-2", BeadType::Task);
        child.parent = "gt-task-1".to_string();
        store.insert(child);
        let mut grandchild = test_bead("gt-task-3", BeadType::Task);
        grandchild.parent = "gt-task-2".to_string();
        store.insert(grandchild);

        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();
        let closed = done(
            &store,
            &log,
            "gt-task-1",
            "gt-gastown-polecat-nux",
            "completed",
        )
        .unwrap();

        assert_eq!(closed, vec!["gt-task-3", "gt-task-2", "gt-task-1"]);
        for id in ["gt-task-1", "gt-task-2", "gt-task-3"] {
            assert_eq!(store.show(id).unwrap().status, BeadStatus::Closed);
        }
    }

    #[test]
    fn done_refused_for_non_holder() {
        let (store, log, _tmp) = setup();
        seed(&store, "gt-task-1");
        hook(&store, &log, "gt-task-1", "gt-gastown-polecat-nux", "hq-mayor").unwrap();
        let err = done(
            &store,
            &log,
            "gt-task-1",
            "gt-gastown-polecat-slit",
            "completed",
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));
    }
}
