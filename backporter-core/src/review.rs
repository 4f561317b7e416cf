//! Review-state replay.
//!
//! GitHub keeps every review ever submitted on a pull request. Who currently
//! approves or blocks a pull request is not stored anywhere; it has to be
//! reconstructed by replaying the reviews in submission order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Verdict carried by a single submitted review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewKind {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    /// Any state GitHub may add in the future. Ignored by the replay.
    #[serde(other)]
    Unknown,
}

/// One review in a pull request's review log.
///
/// `sequence` is the position in the log as returned by the API; the replay
/// trusts the given order and never re-sorts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub actor: String,
    pub kind: ReviewKind,
    pub sequence: u64,
}

impl ReviewEvent {
    pub fn new(actor: impl Into<String>, kind: ReviewKind, sequence: u64) -> Self {
        Self {
            actor: actor.into(),
            kind,
            sequence,
        }
    }
}

/// Current standing verdicts on a pull request.
///
/// Invariant: `approvers` and `blockers` are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewState {
    pub approvers: BTreeSet<String>,
    pub blockers: BTreeSet<String>,
}

impl ReviewState {
    pub fn approval_count(&self) -> usize {
        self.approvers.len()
    }

    fn apply(&mut self, event: &ReviewEvent) {
        let actor = &event.actor;
        match event.kind {
            ReviewKind::Approved => {
                self.blockers.remove(actor);
                self.approvers.insert(actor.clone());
            }
            ReviewKind::ChangesRequested => {
                self.approvers.remove(actor);
                self.blockers.insert(actor.clone());
            }
            ReviewKind::Dismissed => {
                self.approvers.remove(actor);
                self.blockers.remove(actor);
            }
            ReviewKind::Commented | ReviewKind::Pending | ReviewKind::Unknown => {}
        }
    }
}

/// Replay `events` in order and derive who currently approves or blocks.
///
/// Anyone in `requested_reviewers` has been asked to review again, which
/// supersedes whatever verdict they left before, so they end up in neither
/// set.
pub fn compute_review_state<S: AsRef<str>>(
    events: &[ReviewEvent],
    requested_reviewers: &[S],
) -> ReviewState {
    let mut state = events.iter().fold(ReviewState::default(), |mut state, event| {
        state.apply(event);
        state
    });

    for reviewer in requested_reviewers {
        state.approvers.remove(reviewer.as_ref());
        state.blockers.remove(reviewer.as_ref());
    }

    state
}
