use anyhow::{Context, Result};
use tracing::info;

use backporter_core::{compute_review_state, PullRequest, ReviewState};

use crate::client::RepositoryClient;

/// Reconstruct who currently approves or blocks `pr` from its full review log.
///
/// Nothing is cached: the log on GitHub is the only source of truth and a
/// review can be dismissed at any time.
pub async fn fetch_review_state(
    client: &dyn RepositoryClient,
    pr: &PullRequest,
) -> Result<ReviewState> {
    let events = client
        .fetch_review_events(pr.number)
        .await
        .with_context(|| format!("Failed to fetch reviews for PR #{}", pr.number))?;

    let state = compute_review_state(&events, &pr.requested_reviewer_logins());

    info!(
        "PR #{}: {} reviews, approvers {:?}, blockers {:?}",
        pr.number,
        events.len(),
        state.approvers,
        state.blockers
    );

    Ok(state)
}
