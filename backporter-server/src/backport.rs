//! The backport cycle: find merged pull requests labelled for an active
//! maintenance line and turn each into a pull request against that line's
//! release branch, or hand it back to its author when it does not apply.

use anyhow::{anyhow, Context};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use backporter_core::labels::{BACKPORT_DONE, BACKPORT_MANUAL};
use backporter_core::{
    manual_backport_comment, resolve_active_lines, BackportAttempt, BackportPlan,
    CandidateSummary, MaintenanceLine, SkipReason,
};

use crate::client::RepositoryClient;
use crate::executor::ExecutorError;
use crate::git::{CherryPickOutcome, GitError, WorkingTree};
use crate::review_state::fetch_review_state;

#[derive(Debug, Error)]
pub enum BackportError {
    #[error(transparent)]
    Api(#[from] anyhow::Error),

    #[error("git {step} failed: {stderr}")]
    Git { step: &'static str, stderr: String },

    /// The working tree can no longer be trusted; nothing else may run
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl From<GitError> for BackportError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::Command { step, stderr } => BackportError::Git { step, stderr },
            GitError::Executor(e) => BackportError::Executor(e),
        }
    }
}

impl BackportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackportError::Executor(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateOutcome {
    pub pr_number: u64,
    pub major_minor: String,
    pub attempt: BackportAttempt,
}

/// Work that was given up for this cycle only. The next cycle retries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Abandoned {
    pub major_minor: String,
    /// `None` when the whole line was abandoned
    pub pr_number: Option<u64>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub lines: Vec<MaintenanceLine>,
    pub outcomes: Vec<CandidateOutcome>,
    pub abandoned: Vec<Abandoned>,
}

impl CycleReport {
    pub fn created(&self) -> impl Iterator<Item = u64> + '_ {
        self.outcomes.iter().filter_map(|o| match o.attempt {
            BackportAttempt::Succeeded { pr_number } => Some(pr_number),
            _ => None,
        })
    }
}

pub struct BackportEngine {
    client: Arc<dyn RepositoryClient>,
    tree: Arc<WorkingTree>,
    fork_owner: String,
}

impl BackportEngine {
    pub fn new(
        client: Arc<dyn RepositoryClient>,
        tree: Arc<WorkingTree>,
        fork_owner: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tree,
            fork_owner: fork_owner.into(),
        }
    }

    /// Run one full backport cycle.
    ///
    /// Per-candidate problems are reported in the returned [`CycleReport`].
    /// An `Err` means the milestones could not be read or the working tree
    /// became unusable. In the latter case candidates already running carry
    /// on until their next git step fails on the poisoned tree, and no new
    /// git work starts before the next cycle restores it.
    pub async fn run_cycle(&self) -> Result<CycleReport, BackportError> {
        if self.tree.executor().is_poisoned().await {
            self.tree.restore_clean().await?;
        }

        let milestones = self
            .client
            .fetch_milestones()
            .await
            .context("Failed to fetch milestones")?;
        let lines = resolve_active_lines(&milestones);
        info!(
            "Active maintenance lines: {}",
            lines
                .iter()
                .map(|l| l.major_minor.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut report = CycleReport {
            lines: lines.clone(),
            ..Default::default()
        };
        let mut fatal = None;

        let line_results = join_all(lines.iter().map(|line| self.run_line(line))).await;
        for (line, result) in lines.iter().zip(line_results) {
            let major_minor = &line.major_minor;
            let candidates = match result {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(version = %major_minor, "Abandoning line for this cycle: {:#}", e);
                    report.abandoned.push(Abandoned {
                        major_minor: major_minor.clone(),
                        pr_number: None,
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };

            for (pr_number, result) in candidates {
                match result {
                    Ok(attempt) => report.outcomes.push(CandidateOutcome {
                        pr_number,
                        major_minor: major_minor.clone(),
                        attempt,
                    }),
                    Err(e) if e.is_fatal() => {
                        error!(
                            pr = pr_number,
                            version = %major_minor,
                            "Working tree fault: {}",
                            e
                        );
                        fatal.get_or_insert(e);
                    }
                    Err(e) => {
                        warn!(
                            pr = pr_number,
                            version = %major_minor,
                            "Abandoning for this cycle: {:#}",
                            e
                        );
                        report.abandoned.push(Abandoned {
                            major_minor: major_minor.clone(),
                            pr_number: Some(pr_number),
                            reason: format!("{:#}", e),
                        });
                    }
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            "Backport cycle finished: {} handled, {} created, {} abandoned",
            report.outcomes.len(),
            report.created().count(),
            report.abandoned.len()
        );
        Ok(report)
    }

    /// Every candidate of one line, each with its own result.
    async fn run_line(
        &self,
        line: &MaintenanceLine,
    ) -> anyhow::Result<Vec<(u64, Result<BackportAttempt, BackportError>)>> {
        let major_minor = line.major_minor.as_str();
        let candidates = self
            .client
            .fetch_candidates(major_minor)
            .await
            .with_context(|| format!("Failed to fetch backport candidates for {}", major_minor))?;

        info!(
            "{} backport candidates for {}",
            candidates.len(),
            major_minor
        );

        Ok(join_all(candidates.iter().map(|candidate| async move {
            let result = self.backport_candidate(candidate, major_minor).await;
            (candidate.number, result)
        }))
        .await)
    }

    async fn backport_candidate(
        &self,
        candidate: &CandidateSummary,
        major_minor: &str,
    ) -> Result<BackportAttempt, BackportError> {
        let pr_number = candidate.number;

        if self
            .client
            .pull_request_exists_for_backport(pr_number, major_minor)
            .await?
        {
            info!(
                pr = pr_number,
                version = major_minor,
                "Backport already exists, skipping"
            );
            return Ok(BackportAttempt::Skipped(SkipReason::AlreadyExists));
        }

        let original = self.client.fetch_pull_request(pr_number).await?;
        let merge_commit = original
            .merge_commit_sha
            .as_deref()
            .ok_or_else(|| anyhow!("PR #{} has no merge commit", pr_number))?;

        match self
            .tree
            .cherry_pick(pr_number, major_minor, merge_commit)
            .await?
        {
            CherryPickOutcome::Conflict => {
                let comment = manual_backport_comment(major_minor, &original.user.login);
                self.client.add_comment(pr_number, &comment).await?;
                self.client
                    .add_labels(pr_number, &[BACKPORT_MANUAL.to_string()])
                    .await?;
                info!(
                    pr = pr_number,
                    version = major_minor,
                    author = %original.user.login,
                    "Cherry-pick conflicts, asked for a manual backport"
                );
                Ok(BackportAttempt::CherryPickFailed)
            }
            CherryPickOutcome::Picked { branch } => {
                let review_state = fetch_review_state(self.client.as_ref(), &original).await?;
                let plan = BackportPlan::new(&original, major_minor, &self.fork_owner, &review_state);

                let new_number = self
                    .client
                    .create_pull_request(&plan.pull_request)
                    .await
                    .with_context(|| format!("Failed to open backport from {}", branch))?;

                // Later runs skip a candidate whose backport is open, so each
                // of these is attempted even if an earlier one fails
                if !plan.labels.is_empty() {
                    if let Err(e) = self.client.add_labels(new_number, &plan.labels).await {
                        warn!(
                            pr = pr_number,
                            backport = new_number,
                            "Failed to label backport: {:#}",
                            e
                        );
                    }
                }
                if let Err(e) = self.client.set_assignee(new_number, &plan.assignee).await {
                    warn!(
                        pr = pr_number,
                        backport = new_number,
                        "Failed to assign backport: {:#}",
                        e
                    );
                }
                if plan.mark_original_done {
                    if let Err(e) = self
                        .client
                        .add_labels(pr_number, &[BACKPORT_DONE.to_string()])
                        .await
                    {
                        warn!(pr = pr_number, "Failed to mark original as backported: {:#}", e);
                    }
                }

                info!(
                    pr = pr_number,
                    version = major_minor,
                    backport = new_number,
                    "Created backport"
                );
                Ok(BackportAttempt::Succeeded {
                    pr_number: new_number,
                })
            }
        }
    }
}
