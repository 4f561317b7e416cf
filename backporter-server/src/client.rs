//! Abstraction over the code-hosting API.
//!
//! The backport engine, the review-state replay and approval maintenance
//! only talk to the hosting service through [`RepositoryClient`]. The
//! production implementation is [`crate::github::GitHubClient`]; tests use an
//! in-memory fake.

use anyhow::Result;
use async_trait::async_trait;

use backporter_core::{
    BotIdentity, CandidateSummary, CommitStatusState, Milestone, NewPullRequest, PullRequest,
    ReviewEvent,
};

/// Read/write access to one upstream repository.
///
/// Implementations hold no state between calls; every method is a fresh
/// round trip so that callers can re-derive idempotency from the source of
/// truth.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// The account the bot acts as.
    async fn current_user(&self) -> Result<BotIdentity>;

    /// Open milestones of the upstream repository.
    async fn fetch_milestones(&self) -> Result<Vec<Milestone>>;

    /// Merged pull requests on the main line labelled for `major_minor` and
    /// not yet marked `backport/done` or `backport/manual`.
    async fn fetch_candidates(&self, major_minor: &str) -> Result<Vec<CandidateSummary>>;

    /// Whether an open pull request against the release branch of
    /// `major_minor` mentions `pr_number` in its title.
    async fn pull_request_exists_for_backport(
        &self,
        pr_number: u64,
        major_minor: &str,
    ) -> Result<bool>;

    async fn fetch_pull_request(&self, pr_number: u64) -> Result<PullRequest>;

    /// Every review submitted on the pull request, oldest first.
    async fn fetch_review_events(&self, pr_number: u64) -> Result<Vec<ReviewEvent>>;

    /// Open a pull request and request reviews from `request.reviewers`.
    /// Returns the new pull request's number.
    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<u64>;

    async fn add_labels(&self, pr_number: u64, labels: &[String]) -> Result<()>;

    async fn remove_label(&self, pr_number: u64, label: &str) -> Result<()>;

    async fn add_comment(&self, pr_number: u64, body: &str) -> Result<()>;

    async fn set_assignee(&self, pr_number: u64, login: &str) -> Result<()>;

    async fn set_commit_status(
        &self,
        sha: &str,
        state: CommitStatusState,
        description: &str,
        context: &str,
    ) -> Result<()>;
}
