//! What a backport looks like: branch names, the pull request that carries
//! it, and the message left when one cannot be produced.
//!
//! Everything here is pure so the engine's output can be checked without a
//! network or a git checkout.

use serde::{Deserialize, Serialize};

use crate::labels::{is_backport_label, is_lifecycle_label};
use crate::pull_request::{NewPullRequest, PullRequest};
use crate::review::ReviewState;
use crate::version::release_branch;

/// Local and fork branch carrying the backport of `pr_number` to `major_minor`.
///
/// Deterministic, so a later run for the same pair reuses the same branch.
pub fn backport_branch_name(pr_number: u64, major_minor: &str) -> String {
    format!("backport-{}-v{}", pr_number, major_minor)
}

/// Why no backport was produced for a candidate that was looked at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// An open pull request against the release branch already mentions it
    AlreadyExists,
}

/// Outcome of handling one (candidate, maintenance line) pair in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackportAttempt {
    Skipped(SkipReason),
    /// Conflict; the original was handed over for a manual backport
    CherryPickFailed,
    Succeeded { pr_number: u64 },
}

/// Comment left on the original pull request when the cherry-pick failed
pub fn manual_backport_comment(major_minor: &str, author: &str) -> String {
    format!(
        "I was unable to create a backport for {}. @{}, please send one manually. :tea:",
        major_minor, author
    )
}

/// All mutations needed to open the backport of `original` for one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackportPlan {
    pub pull_request: NewPullRequest,
    pub labels: Vec<String>,
    pub assignee: String,
    /// Whether the original can be marked `backport/done` once the backport exists
    pub mark_original_done: bool,
}

impl BackportPlan {
    pub fn new(
        original: &PullRequest,
        major_minor: &str,
        fork_owner: &str,
        review_state: &ReviewState,
    ) -> Self {
        let mut body = format!("Backport #{} by @{}", original.number, original.user.login);
        if let Some(original_body) = original.body.as_deref().filter(|b| !b.is_empty()) {
            body.push_str("\n\n");
            body.push_str(original_body);
        }

        let pull_request = NewPullRequest {
            title: format!("{} (#{})", original.title, original.number),
            head: format!(
                "{}:{}",
                fork_owner,
                backport_branch_name(original.number, major_minor)
            ),
            base: release_branch(major_minor),
            body,
            // Only people who actively approved; blockers and pending reviewers stay behind
            reviewers: review_state.approvers.iter().cloned().collect(),
        };

        let labels = original
            .label_names()
            .filter(|name| !is_lifecycle_label(name))
            .map(str::to_string)
            .collect();

        // With several backport/* labels other lines still need this change
        let mark_original_done = original
            .label_names()
            .filter(|name| is_backport_label(name))
            .count()
            == 1;

        Self {
            pull_request,
            labels,
            assignee: original.user.login.clone(),
            mark_original_done,
        }
    }
}
