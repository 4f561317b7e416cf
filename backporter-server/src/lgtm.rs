//! Keeps the `lgtm/*` label and the approval commit status of a pull
//! request in line with its current reviews.

use anyhow::{Context, Result};
use tracing::info;

use backporter_core::lgtm::{lgtm_label_changes, ApprovalStatus, LGTM_STATUS_CONTEXT};

use crate::client::RepositoryClient;
use crate::review_state::fetch_review_state;

pub async fn sync_approval_status(
    client: &dyn RepositoryClient,
    pr_number: u64,
) -> Result<ApprovalStatus> {
    let pr = client
        .fetch_pull_request(pr_number)
        .await
        .with_context(|| format!("Failed to fetch PR #{}", pr_number))?;
    let review_state = fetch_review_state(client, &pr).await?;
    let status = ApprovalStatus::for_approvals(review_state.approval_count());

    let changes = lgtm_label_changes(pr.label_names(), status.label);
    for label in &changes.remove {
        client.remove_label(pr_number, label).await?;
    }
    if let Some(label) = changes.add {
        client.add_labels(pr_number, &[label]).await?;
    }

    client
        .set_commit_status(
            &pr.head.sha,
            status.state,
            status.description,
            LGTM_STATUS_CONTEXT,
        )
        .await?;

    info!(
        "PR #{}: {} approvals, {}",
        pr_number,
        review_state.approval_count(),
        status.label
    );
    Ok(status)
}
