//! Queue claims: at-most-one consumer per message.
//!
//! The claim is a label write; the race discipline is optimistic. After
//! adding `claimed-by`, the claimant re-reads the message; if the label
//! names someone else, the write was clobbered by a concurrent claimant and
//! this attempt restarts from the queue scan.

use crate::beads::{Bead, BeadStatus, BeadType, Beads, ListFilter, UpdateOpts};
use crate::error::GtError;

/// Attempts before a lost race becomes `Contention`.
const MAX_CLAIM_ATTEMPTS: usize = 3;

/// Match a queue claim pattern (glob: `*` wildcards) against a canonical
/// agent id.
pub fn pattern_matches(pattern: &str, agent: &str) -> bool {
    fn inner(pattern: &[u8], agent: &[u8]) -> bool {
        match (pattern.first(), agent.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], agent)
                    || (!agent.is_empty() && inner(pattern, &agent[1..]))
            }
            (Some(p), Some(a)) if p == a => inner(&pattern[1..], &agent[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), agent.as_bytes())
}

/// Look up the queue bead by name: a `queue`-typed bead labeled
/// `queue:<name>`.
fn find_queue(store: &dyn Beads, queue: &str) -> anyhow::Result<Bead> {
    let queues = store.list(&ListFilter {
        bead_type: Some(BeadType::Queue),
        labels: vec![format!("queue:{queue}")],
        ..ListFilter::default()
    })?;
    queues
        .into_iter()
        .next()
        .ok_or_else(|| GtError::NotFound(format!("queue {queue}")).into())
}

/// Unclaimed open messages in the queue, FIFO by `created_at` with ties
/// broken by id.
fn unclaimed_messages(store: &dyn Beads, queue: &str) -> anyhow::Result<Vec<Bead>> {
    let mut messages: Vec<Bead> = store
        .list(&ListFilter {
            status: Some(BeadStatus::Open),
            bead_type: Some(BeadType::Message),
            labels: vec![format!("queue:{queue}")],
            ..ListFilter::default()
        })?
        .into_iter()
        .filter(|m| m.label_value("claimed-by").is_none())
        .collect();
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(messages)
}

/// Claim the oldest unclaimed message from `queue` for `agent`.
///
/// Returns `None` when the queue is empty. Lost races are retried up to
/// [`MAX_CLAIM_ATTEMPTS`] times before `Contention`.
pub fn claim(store: &dyn Beads, queue: &str, agent: &str) -> anyhow::Result<Option<Bead>> {
    let queue_bead = find_queue(store, queue)?;
    if let Some(pattern) = queue_bead.label_value("claim-pattern") {
        if !pattern_matches(pattern, agent) {
            return Err(GtError::Invalid(format!(
                "agent {agent} does not match queue {queue} claim pattern {pattern:?}"
            ))
            .into());
        }
    }

    for attempt in 1..=MAX_CLAIM_ATTEMPTS {
        let candidates = unclaimed_messages(store, queue)?;
        let Some(message) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let now = chrono::Utc::now().to_rfc3339();
        store.update(
            &message.id,
            &UpdateOpts {
                add_labels: vec![
                    format!("claimed-by:{agent}"),
                    format!("claimed-at:{now}"),
                ],
                ..UpdateOpts::default()
            },
        )?;

        // Read-verify: the claim stands only if our label survived.
        let readback = store.show(&message.id)?;
        match readback.label_value("claimed-by") {
            Some(owner) if owner == agent => return Ok(Some(readback)),
            _ => {
                tracing::debug!(
                    message = %message.id,
                    attempt,
                    "claim lost to a concurrent claimant"
                );
            }
        }
    }

    Err(GtError::Contention(format!(
        "queue {queue}: lost {MAX_CLAIM_ATTEMPTS} claim races"
    ))
    .into())
}

/// Release a claimed message back to the pool. Only the claim holder may
/// release; both claim labels go in one write.
pub fn release(store: &dyn Beads, message_id: &str, agent: &str) -> anyhow::Result<()> {
    let message = store.show(message_id)?;
    let Some(owner) = message.label_value("claimed-by") else {
        return Err(GtError::Invalid(format!("{message_id} is not claimed")).into());
    };
    if owner != agent {
        return Err(GtError::Invalid(format!(
            "{message_id} is claimed by {owner}, not {agent}"
        ))
        .into());
    }

    let claimed_at = message
        .label_value("claimed-at")
        .map_or_else(String::new, str::to_string);
    let mut remove = vec![format!("claimed-by:{owner}")];
    if !claimed_at.is_empty() {
        remove.push(format!("claimed-at:{claimed_at}"));
    }
    store.update(
        message_id,
        &UpdateOpts {
            remove_labels: remove,
            ..UpdateOpts::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::beads::bead::test_bead;
    use crate::beads::mem::MemBeads;
    use chrono::TimeDelta;

    fn seed_queue(store: &MemBeads, name: &str, pattern: Option<&str>) {
        let mut queue = test_bead(&format!("hq-queue-{name}"), BeadType::Queue);
        queue.labels = vec![format!("queue:{name}")];
        if let Some(p) = pattern {
            queue.labels.push(format!("claim-pattern:{p}"));
        }
        store.insert(queue);
    }

    fn seed_message(store: &MemBeads, id: &str, queue: &str, age_secs: i64) {
        let mut msg = test_bead(id, BeadType::Message);
        msg.labels = vec![format!("queue:{queue}"), "from:hq-mayor".to_string()];
        msg.created_at = chrono::Utc::now() - TimeDelta::seconds(age_secs);
        store.insert(msg);
    }

    #[test]
    fn glob_pattern_matching() {
        assert!(pattern_matches("*", "gt-gastown-polecat-nux"));
        assert!(pattern_matches("gt-gastown-*", "gt-gastown-polecat-nux"));
        assert!(pattern_matches("hq-dog-*", "hq-dog-rex"));
        assert!(!pattern_matches("hq-dog-*", "hq-mayor"));
        assert!(pattern_matches("hq-mayor", "hq-mayor"));
        assert!(!pattern_matches("", "hq-mayor"));
        assert!(pattern_matches("*-witness", "gt-gastown-witness"));
    }

    #[test]
    fn claim_takes_oldest_first() {
        let store = MemBeads::new();
        seed_queue(&store, "reviews", None);
        seed_message(&store, "hq-msg-new", "reviews", 10);
        seed_message(&store, "hq-msg-old", "reviews", 100);

        let claimed = claim(&store, "reviews", "gt-gastown-crew-max")
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, "hq-msg-old");
        assert_eq!(
            claimed.label_value("claimed-by"),
            Some("gt-gastown-crew-max")
        );
        assert!(claimed.label_value("claimed-at").is_some());
    }

    #[test]
    fn claim_empty_queue_is_none() {
        let store = MemBeads::new();
        seed_queue(&store, "reviews", None);
        assert!(claim(&store, "reviews", "hq-mayor").unwrap().is_none());
    }

    #[test]
    fn claim_missing_queue_is_not_found() {
        let store = MemBeads::new();
        let err = claim(&store, "ghost", "hq-mayor").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::NotFound(_))
        ));
    }

    #[test]
    fn claim_pattern_mismatch_is_invalid() {
        let store = MemBeads::new();
        seed_queue(&store, "dogwork", Some("hq-dog-*"));
        seed_message(&store, "hq-msg-1", "dogwork", 5);

        let err = claim(&store, "dogwork", "hq-mayor").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));
    }

    #[test]
    fn release_roundtrip_restores_unclaimed_pool() {
        let store = MemBeads::new();
        seed_queue(&store, "reviews", None);
        seed_message(&store, "hq-msg-1", "reviews", 5);

        let claimed = claim(&store, "reviews", "hq-mayor").unwrap().unwrap();
        release(&store, &claimed.id, "hq-mayor").unwrap();

        let msg = store.show("hq-msg-1").unwrap();
        assert!(msg.label_value("claimed-by").is_none());
        assert!(msg.label_value("claimed-at").is_none());
        // claimable again
        assert!(claim(&store, "reviews", "hq-mayor").unwrap().is_some());
    }

    #[test]
    fn release_requires_owner() {
        let store = MemBeads::new();
        seed_queue(&store, "reviews", None);
        seed_message(&store, "hq-msg-1", "reviews", 5);
        claim(&store, "reviews", "hq-mayor").unwrap().unwrap();

        let err = release(&store, "hq-msg-1", "hq-deacon").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));

        let err = release(&store, "hq-msg-1", "hq-mayor")
            .and_then(|()| release(&store, "hq-msg-1", "hq-mayor"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));
    }

    #[test]
    fn concurrent_claimants_get_exactly_one_winner() {
        let store = Arc::new(MemBeads::new());
        seed_queue(&store, "reviews", None);
        seed_message(&store, "hq-msg-1", "reviews", 5);

        let results: Vec<_> = ["hq-dog-rex", "hq-dog-fido"]
            .into_iter()
            .map(|agent| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || claim(store.as_ref(), "reviews", agent))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().expect("claimant thread"))
            .collect();

        let winners: Vec<_> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().and_then(|o| o.as_ref()))
            .collect();
        // one claimant gets the message; the other sees an empty queue or
        // loses the race outright
        assert_eq!(winners.len(), 1);

        let msg = store.show("hq-msg-1").unwrap();
        let claim_labels = msg.label_values("claimed-by").count();
        assert_eq!(claim_labels, 1);
        assert_eq!(
            msg.label_value("claimed-by"),
            winners[0].label_value("claimed-by")
        );
    }
}
