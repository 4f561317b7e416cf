//! The bot's single git checkout: a clone of the fork with the upstream
//! repository as a second remote.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use backporter_core::{backport_branch_name, release_branch, BotIdentity};

use crate::executor::{CommandExecutor, CommandOutput, ExecutorError, ExecutorSession};

const UPSTREAM_REMOTE: &str = "upstream";
const FORK_REMOTE: &str = "origin";

/// Result of the cherry-pick protocol for one (pull request, line) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPickOutcome {
    /// The change applied cleanly and `branch` was pushed to the fork
    Picked { branch: String },
    /// The change does not apply; the tree was returned to a clean state
    Conflict,
}

#[derive(Debug, Error)]
pub enum GitError {
    /// A git step other than the cherry-pick itself failed. The tree is
    /// still clean and the same work can be retried on a later run.
    #[error("git {step} failed: {stderr}")]
    Command { step: &'static str, stderr: String },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

fn check(output: CommandOutput, step: &'static str) -> Result<CommandOutput, GitError> {
    if output.succeeded {
        Ok(output)
    } else {
        Err(GitError::Command {
            step,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

pub struct WorkingTree {
    executor: Arc<CommandExecutor>,
    main_branch: String,
}

impl WorkingTree {
    pub fn new(executor: Arc<CommandExecutor>, main_branch: impl Into<String>) -> Self {
        Self {
            executor,
            main_branch: main_branch.into(),
        }
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    /// Make sure the working directory is a clone of `fork` with `upstream`
    /// as a second remote and commits authored as the bot.
    pub async fn initialize(
        &self,
        identity: &BotIdentity,
        token: &str,
        fork: &str,
        upstream: &str,
        default_email: &str,
    ) -> Result<()> {
        let working_dir = self.executor.working_dir().to_path_buf();
        let mut session = self.executor.session().await?;

        if !working_dir.join(".git").exists() {
            info!("Cloning {} into {}", fork, working_dir.display());
            if let Some(parent) = working_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let fork_url = format!(
                "https://{}:{}@github.com/{}.git",
                identity.login, token, fork
            );
            let target = working_dir.to_string_lossy().into_owned();
            let output = session
                .run_in(Path::new("."), "git", &["clone", &fork_url, &target])
                .await?;
            check(output, "clone")?;
        }

        let upstream_url = format!("https://github.com/{}.git", upstream);
        let has_upstream = session
            .git(&["remote", "get-url", UPSTREAM_REMOTE])
            .await?
            .succeeded;
        let remote_args: [&str; 4] = if has_upstream {
            ["remote", "set-url", UPSTREAM_REMOTE, &upstream_url]
        } else {
            ["remote", "add", UPSTREAM_REMOTE, &upstream_url]
        };
        check(session.git(&remote_args).await?, "remote")?;

        let email = identity.email.as_deref().unwrap_or(default_email);
        for (key, value) in [("user.name", identity.login.as_str()), ("user.email", email)] {
            check(session.git(&["config", key, value]).await?, "config")?;
        }

        info!(
            "Working tree ready at {} (fork {}, upstream {})",
            working_dir.display(),
            fork,
            upstream
        );
        Ok(())
    }

    /// Build `backport-<n>-v<mm>` on top of the release branch by
    /// cherry-picking `merge_commit` and push it to the fork.
    ///
    /// All steps run in one session. The tree is left clean whatever the
    /// outcome, unless the returned error says it has been poisoned.
    pub async fn cherry_pick(
        &self,
        pr_number: u64,
        major_minor: &str,
        merge_commit: &str,
    ) -> Result<CherryPickOutcome, GitError> {
        let release = release_branch(major_minor);
        let branch = backport_branch_name(pr_number, major_minor);
        let start_point = format!("{}/{}", UPSTREAM_REMOTE, release);

        let mut session = self.executor.session().await?;

        check(
            session
                .git(&["fetch", UPSTREAM_REMOTE, &self.main_branch])
                .await?,
            "fetch",
        )?;
        check(
            session.git(&["fetch", UPSTREAM_REMOTE, &release]).await?,
            "fetch",
        )?;
        check(
            session
                .git(&["checkout", "-B", &branch, &start_point])
                .await?,
            "checkout",
        )?;

        let pick = session.git(&["cherry-pick", merge_commit]).await?;
        if !pick.succeeded {
            abort_cherry_pick(&mut session, &branch).await?;
            info!(
                "Cherry-pick of {} onto {} failed: {}",
                merge_commit,
                release,
                pick.stderr.trim()
            );
            return Ok(CherryPickOutcome::Conflict);
        }

        check(
            session
                .git(&["push", "--force", FORK_REMOTE, &branch])
                .await?,
            "push",
        )?;

        Ok(CherryPickOutcome::Picked { branch })
    }

    /// Bring a poisoned tree back to a usable state.
    pub async fn restore_clean(&self) -> Result<(), GitError> {
        let mut session = self.executor.recovery_session().await;
        if let Some(reason) = session.poison_reason() {
            warn!("Restoring working tree after: {}", reason);
        }

        // Fails harmlessly when no cherry-pick is in progress
        session.git(&["cherry-pick", "--abort"]).await?;
        check(session.git(&["reset", "--hard"]).await?, "reset")?;
        check(session.git(&["clean", "-fd"]).await?, "clean")?;

        session.clear_poison();
        info!("Working tree restored");
        Ok(())
    }
}

async fn abort_cherry_pick(session: &mut ExecutorSession<'_>, branch: &str) -> Result<(), GitError> {
    let abort = session.git(&["cherry-pick", "--abort"]).await?;
    if abort.succeeded {
        return Ok(());
    }

    // git refuses some picks outright (merge commits, unknown objects)
    // without starting one, which leaves nothing to abort
    let status = session
        .git(&["status", "--porcelain", "--untracked-files=no"])
        .await?;
    if status.succeeded && status.stdout.trim().is_empty() {
        return Ok(());
    }

    let reason = format!(
        "cherry-pick --abort on {} failed: {}",
        branch,
        abort.stderr.trim()
    );
    session.poison(reason.clone());
    Err(ExecutorError::Poisoned { reason }.into())
}
