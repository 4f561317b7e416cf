//! Serialized execution of external programs in the shared working tree.
//!
//! The bot owns exactly one git checkout and it can only have one ref checked
//! out at a time, so every process the bot spawns (git or otherwise) runs
//! under a single process-wide lock. Multi-step protocols take the lock once
//! through [`CommandExecutor::session`] so no other task can slip a command
//! in between their steps.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::recording::{Direction, EventType, RecordingLogger, Sanitizer};

/// Captured result of one process invocation.
///
/// A non-zero exit is reported here as `succeeded == false`; it is not an
/// [`ExecutorError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Faults of the executor itself, as opposed to a command failing.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` did not finish within {timeout:?} and was killed")]
    TimedOut { program: String, timeout: Duration },

    #[error("working tree is unusable: {reason}")]
    Poisoned { reason: String },
}

/// Spawns processes. Split out from [`CommandExecutor`] so the locking and
/// protocol logic can be exercised without real processes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<CommandOutput, ExecutorError>;
}

/// Runs real processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<CommandOutput, ExecutorError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, command.output())
                .await
                .map_err(|_| ExecutorError::TimedOut {
                    program: program.to_string(),
                    timeout,
                })?,
            None => command.output().await,
        }
        .map_err(|source| ExecutorError::Spawn {
            program: program.to_string(),
            source,
        })?;

        Ok(CommandOutput {
            succeeded: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// What the lock protects besides the checkout itself.
#[derive(Debug, Default)]
struct TreeState {
    /// Set once the tree may have been left dirty; cleared by a successful restore.
    poisoned: Option<String>,
}

/// Owner of the shared working tree.
pub struct CommandExecutor {
    runner: Arc<dyn ProcessRunner>,
    working_dir: PathBuf,
    tree: Mutex<TreeState>,
    recording_logger: Option<RecordingLogger>,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            working_dir: working_dir.into(),
            tree: Mutex::new(TreeState::default()),
            recording_logger: None,
        }
    }

    pub fn with_recording(mut self, recording_logger: Option<RecordingLogger>) -> Self {
        self.recording_logger = recording_logger;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run a single command in the working tree.
    ///
    /// Must not be called while the same task holds a session; the lock is
    /// not re-entrant.
    pub async fn execute(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, ExecutorError> {
        let mut session = self.session().await?;
        session.run(program, args).await
    }

    /// Take the working tree for a sequence of commands.
    ///
    /// Waits for any other session to finish. Fails if an earlier session
    /// poisoned the tree.
    pub async fn session(&self) -> Result<ExecutorSession<'_>, ExecutorError> {
        let session = self.recovery_session().await;
        if let Some(reason) = &session.tree.poisoned {
            return Err(ExecutorError::Poisoned {
                reason: reason.clone(),
            });
        }
        Ok(session)
    }

    /// Take the working tree even if it is poisoned, in order to repair it.
    pub async fn recovery_session(&self) -> ExecutorSession<'_> {
        ExecutorSession {
            executor: self,
            tree: self.tree.lock().await,
        }
    }

    pub async fn is_poisoned(&self) -> bool {
        self.tree.lock().await.poisoned.is_some()
    }

    fn record(&self, correlation_id: &str, direction: Direction, data: serde_json::Value) {
        if let Some(logger) = &self.recording_logger {
            logger.record_now(
                correlation_id,
                EventType::CommandInvocation,
                direction,
                "command",
                data,
            );
        }
    }
}

/// Exclusive use of the working tree. The lock is released on drop.
pub struct ExecutorSession<'a> {
    executor: &'a CommandExecutor,
    tree: MutexGuard<'a, TreeState>,
}

impl ExecutorSession<'_> {
    /// Run `program` in the working tree.
    pub async fn run(
        &mut self,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, ExecutorError> {
        let cwd = self.executor.working_dir.clone();
        self.run_in(&cwd, program, args).await
    }

    /// Run `program` in another directory while still holding the tree.
    /// Used for commands that create the working tree in the first place.
    pub async fn run_in(
        &mut self,
        cwd: &Path,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, ExecutorError> {
        let display_args: Vec<String> = args.iter().map(|a| Sanitizer::sanitize_arg(a)).collect();
        let correlation_id = Uuid::new_v4().to_string();
        debug!("Running {} {}", program, display_args.join(" "));
        self.executor.record(
            &correlation_id,
            Direction::Request,
            json!({ "program": program, "args": display_args, "cwd": cwd.display().to_string() }),
        );

        let result = self.executor.runner.run(program, args, cwd).await;

        match &result {
            Ok(output) => {
                if !output.succeeded {
                    debug!(
                        "{} {} failed: {}",
                        program,
                        display_args.join(" "),
                        output.stderr.trim()
                    );
                }
                self.executor.record(
                    &correlation_id,
                    Direction::Response,
                    json!({ "succeeded": output.succeeded, "stderr": output.stderr }),
                );
            }
            Err(e) => {
                error!("Executor fault running {}: {}", program, e);
                self.executor.record(
                    &correlation_id,
                    Direction::Response,
                    json!({ "error": e.to_string() }),
                );
                // A killed process may have left the tree in any state
                if matches!(e, ExecutorError::TimedOut { .. }) {
                    self.poison(e.to_string());
                }
            }
        }

        result
    }

    /// Shorthand for `run("git", args)`.
    pub async fn git(&mut self, args: &[&str]) -> Result<CommandOutput, ExecutorError> {
        self.run("git", args).await
    }

    /// Mark the tree unusable until it is restored.
    pub fn poison(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Poisoning working tree: {}", reason);
        self.tree.poisoned = Some(reason);
    }

    pub fn poison_reason(&self) -> Option<&str> {
        self.tree.poisoned.as_deref()
    }

    pub fn clear_poison(&mut self) {
        self.tree.poisoned = None;
    }
}
