//! Approval-status bookkeeping derived from the replayed review state.

use crate::labels::{LGTM_DONE, LGTM_NEED_ONE, LGTM_NEED_TWO, LGTM_PREFIX};
use crate::pull_request::CommitStatusState;

/// Approvals a pull request needs before it may be merged
pub const REQUIRED_APPROVALS: usize = 2;

/// Context name of the commit status the bot maintains
pub const LGTM_STATUS_CONTEXT: &str = "giteabot/lgtm";

/// Desired `lgtm/*` label and commit status for a number of approvals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStatus {
    pub label: &'static str,
    pub state: CommitStatusState,
    pub description: &'static str,
}

impl ApprovalStatus {
    pub fn for_approvals(approvals: usize) -> Self {
        match approvals {
            0 => Self {
                label: LGTM_NEED_TWO,
                state: CommitStatusState::Pending,
                description: "Needs two more approvals",
            },
            n if n < REQUIRED_APPROVALS => Self {
                label: LGTM_NEED_ONE,
                state: CommitStatusState::Pending,
                description: "Needs one more approval",
            },
            _ => Self {
                label: LGTM_DONE,
                state: CommitStatusState::Success,
                description: "Approved",
            },
        }
    }
}

/// Label changes that bring `current` in line with `desired`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelChanges {
    pub remove: Vec<String>,
    pub add: Option<String>,
}

impl LabelChanges {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_none()
    }
}

/// Remove every stale `lgtm/*` label and add `desired` if it is missing.
pub fn lgtm_label_changes<'a>(
    current: impl IntoIterator<Item = &'a str>,
    desired: &str,
) -> LabelChanges {
    let lgtm_labels: Vec<&str> = current
        .into_iter()
        .filter(|name| name.starts_with(LGTM_PREFIX))
        .collect();

    LabelChanges {
        remove: lgtm_labels
            .iter()
            .filter(|name| **name != desired)
            .map(|name| name.to_string())
            .collect(),
        add: (!lgtm_labels.contains(&desired)).then(|| desired.to_string()),
    }
}
