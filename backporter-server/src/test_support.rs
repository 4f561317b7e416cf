//! In-memory stand-ins for GitHub and git, shared by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use backporter_core::labels::{backport_label, BACKPORT_DONE, BACKPORT_MANUAL};
use backporter_core::{
    release_branch, BotIdentity, CandidateSummary, CommitStatusState, Label, Milestone,
    NewPullRequest, PullRequest, PullRequestRef, ReviewEvent, User,
};

use crate::client::RepositoryClient;
use crate::executor::{CommandOutput, ExecutorError, ProcessRunner};

/// A merged pull request on `main`
pub fn merged_pr(number: u64, author: &str, labels: &[&str], merge_commit: &str) -> PullRequest {
    PullRequest {
        number,
        title: format!("Change number {}", number),
        body: Some(format!("Description of {}", number)),
        user: User {
            login: author.to_string(),
        },
        labels: labels
            .iter()
            .map(|name| Label {
                name: name.to_string(),
            })
            .collect(),
        merge_commit_sha: Some(merge_commit.to_string()),
        requested_reviewers: vec![],
        head: PullRequestRef {
            sha: format!("head{}", number),
            ref_name: format!("feature-{}", number),
        },
        base: PullRequestRef {
            sha: "base".to_string(),
            ref_name: "main".to_string(),
        },
    }
}

/// A write the code under test made through the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreatePullRequest { number: u64, request: NewPullRequest },
    AddLabels { pr_number: u64, labels: Vec<String> },
    RemoveLabel { pr_number: u64, label: String },
    AddComment { pr_number: u64, body: String },
    SetAssignee { pr_number: u64, login: String },
    SetCommitStatus {
        sha: String,
        state: CommitStatusState,
        description: String,
        context: String,
    },
}

#[derive(Default)]
struct FakeClientState {
    milestones: Vec<Milestone>,
    pull_requests: BTreeMap<u64, PullRequest>,
    reviews: HashMap<u64, Vec<ReviewEvent>>,
    /// (number, title, base) of open pull requests
    open: Vec<(u64, String, String)>,
    next_number: u64,
    mutations: Vec<Mutation>,
    failing_fetches: HashSet<u64>,
    failing_assignments: bool,
}

/// GitHub as a handful of maps. Writes are applied so a second run sees the
/// results of the first.
pub struct FakeClient {
    state: Mutex<FakeClientState>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeClientState {
                next_number: 1000,
                ..Default::default()
            }),
        }
    }

    pub fn with_milestone(self, title: &str, number: u64) -> Self {
        self.state.lock().unwrap().milestones.push(Milestone {
            title: title.to_string(),
            number,
        });
        self
    }

    pub fn with_pull_request(self, pr: PullRequest) -> Self {
        self.state.lock().unwrap().pull_requests.insert(pr.number, pr);
        self
    }

    pub fn with_reviews(self, pr_number: u64, events: Vec<ReviewEvent>) -> Self {
        self.state.lock().unwrap().reviews.insert(pr_number, events);
        self
    }

    pub fn with_open_pull_request(self, number: u64, title: &str, base: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .open
            .push((number, title.to_string(), base.to_string()));
        self
    }

    /// `fetch_pull_request(pr_number)` fails as if the API were down
    pub fn with_failing_fetch(self, pr_number: u64) -> Self {
        self.state.lock().unwrap().failing_fetches.insert(pr_number);
        self
    }

    /// `set_assignee` fails, as it does for a login without push access
    pub fn with_failing_assignments(self) -> Self {
        self.state.lock().unwrap().failing_assignments = true;
        self
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state.lock().unwrap().mutations.clear();
    }

    pub fn labels_of(&self, pr_number: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .get(&pr_number)
            .map(|pr| pr.label_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn pull_request_mut<'a>(
        state: &'a mut FakeClientState,
        pr_number: u64,
    ) -> Result<&'a mut PullRequest> {
        state
            .pull_requests
            .get_mut(&pr_number)
            .ok_or_else(|| anyhow!("GitHub API error: 404 Not Found - #{}", pr_number))
    }
}

#[async_trait]
impl RepositoryClient for FakeClient {
    async fn current_user(&self) -> Result<BotIdentity> {
        Ok(BotIdentity {
            login: "teabot".to_string(),
            email: None,
        })
    }

    async fn fetch_milestones(&self) -> Result<Vec<Milestone>> {
        Ok(self.state.lock().unwrap().milestones.clone())
    }

    async fn fetch_candidates(&self, major_minor: &str) -> Result<Vec<CandidateSummary>> {
        let wanted = backport_label(major_minor);
        let state = self.state.lock().unwrap();
        Ok(state
            .pull_requests
            .values()
            .filter(|pr| pr.base.ref_name == "main" && pr.merge_commit_sha.is_some())
            .filter(|pr| {
                let names: Vec<&str> = pr.label_names().collect();
                names.contains(&wanted.as_str())
                    && !names.contains(&BACKPORT_DONE)
                    && !names.contains(&BACKPORT_MANUAL)
            })
            .map(|pr| CandidateSummary {
                number: pr.number,
                title: pr.title.clone(),
                labels: pr.labels.clone(),
            })
            .collect())
    }

    async fn pull_request_exists_for_backport(
        &self,
        pr_number: u64,
        major_minor: &str,
    ) -> Result<bool> {
        let base = release_branch(major_minor);
        let needle = pr_number.to_string();
        Ok(self
            .state
            .lock()
            .unwrap()
            .open
            .iter()
            .any(|(_, title, open_base)| *open_base == base && title.contains(&needle)))
    }

    async fn fetch_pull_request(&self, pr_number: u64) -> Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        if state.failing_fetches.contains(&pr_number) {
            return Err(anyhow!("GitHub API error: 502 Bad Gateway"));
        }
        Self::pull_request_mut(&mut state, pr_number).map(|pr| pr.clone())
    }

    async fn fetch_review_events(&self, pr_number: u64) -> Result<Vec<ReviewEvent>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .reviews
            .get(&pr_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_number;
        state.next_number += 1;
        state
            .open
            .push((number, request.title.clone(), request.base.clone()));
        state.mutations.push(Mutation::CreatePullRequest {
            number,
            request: request.clone(),
        });
        Ok(number)
    }

    async fn add_labels(&self, pr_number: u64, labels: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Ok(pr) = Self::pull_request_mut(&mut state, pr_number) {
            for name in labels {
                if !pr.labels.iter().any(|l| &l.name == name) {
                    pr.labels.push(Label { name: name.clone() });
                }
            }
        }
        state.mutations.push(Mutation::AddLabels {
            pr_number,
            labels: labels.to_vec(),
        });
        Ok(())
    }

    async fn remove_label(&self, pr_number: u64, label: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::pull_request_mut(&mut state, pr_number)?
            .labels
            .retain(|l| l.name != label);
        state.mutations.push(Mutation::RemoveLabel {
            pr_number,
            label: label.to_string(),
        });
        Ok(())
    }

    async fn add_comment(&self, pr_number: u64, body: &str) -> Result<()> {
        self.state.lock().unwrap().mutations.push(Mutation::AddComment {
            pr_number,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn set_assignee(&self, pr_number: u64, login: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_assignments {
            return Err(anyhow!("GitHub API error: 422 Unprocessable Entity"));
        }
        state.mutations.push(Mutation::SetAssignee {
            pr_number,
            login: login.to_string(),
        });
        Ok(())
    }

    async fn set_commit_status(
        &self,
        sha: &str,
        state: CommitStatusState,
        description: &str,
        context: &str,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .mutations
            .push(Mutation::SetCommitStatus {
                sha: sha.to_string(),
                state,
                description: description.to_string(),
                context: context.to_string(),
            });
        Ok(())
    }
}

#[derive(Default)]
struct FakeGitState {
    invocations: Vec<Vec<String>>,
    /// A cherry-pick stopped half way and has not been aborted or reset
    dirty: bool,
}

/// Pretends to be git closely enough for the cherry-pick protocol: records
/// every invocation, conflicts on chosen commits, refuses to check out over
/// a half-applied cherry-pick and has nothing to abort when none is running.
pub struct FakeGitRunner {
    state: Mutex<FakeGitState>,
    conflicts: HashSet<String>,
    /// Commits git refuses to pick without touching the tree
    rejected: HashSet<String>,
    /// Commands (joined arguments) that fail when they start with one of these
    failing: Vec<String>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeGitRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeGitState::default()),
            conflicts: HashSet::new(),
            rejected: HashSet::new(),
            failing: Vec::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_conflict(mut self, commit: &str) -> Self {
        self.conflicts.insert(commit.to_string());
        self
    }

    /// `commit` fails to pick the way a merge commit does: before any
    /// cherry-pick is in progress.
    pub fn with_rejected(mut self, commit: &str) -> Self {
        self.rejected.insert(commit.to_string());
        self
    }

    pub fn with_failing(mut self, command_prefix: &str) -> Self {
        self.failing.push(command_prefix.to_string());
        self
    }

    /// Every invocation so far as `[program, args...]`
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().invocations.clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().unwrap().dirty
    }

    fn respond(&self, command: &str) -> CommandOutput {
        let mut state = self.state.lock().unwrap();

        if self.failing.iter().any(|prefix| command.starts_with(prefix)) {
            return CommandOutput::failure("fatal: simulated failure");
        }

        if command == "cherry-pick --abort" {
            if !state.dirty {
                return CommandOutput::failure(
                    "error: no cherry-pick or revert in progress\nfatal: cherry-pick failed",
                );
            }
            state.dirty = false;
            return CommandOutput::success("");
        }
        if command.starts_with("status --porcelain") {
            let listing = if state.dirty { "UU src/lib.rs\n" } else { "" };
            return CommandOutput::success(listing);
        }
        if let Some(commit) = command.strip_prefix("cherry-pick ") {
            if self.rejected.contains(commit) {
                return CommandOutput::failure(format!(
                    "error: commit {} is a merge but no -m option was given.\nfatal: cherry-pick failed",
                    commit
                ));
            }
            if self.conflicts.contains(commit) {
                state.dirty = true;
                return CommandOutput::failure(format!(
                    "error: could not apply {}\nCONFLICT (content): Merge conflict",
                    commit
                ));
            }
            return CommandOutput::success("");
        }
        if command.starts_with("checkout") && state.dirty {
            return CommandOutput::failure("error: you need to resolve your current index first");
        }
        if command == "reset --hard" {
            state.dirty = false;
        }
        CommandOutput::success("")
    }
}

#[async_trait]
impl ProcessRunner for FakeGitRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _cwd: &Path,
    ) -> Result<CommandOutput, ExecutorError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        {
            let mut argv = vec![program.to_string()];
            argv.extend(args.iter().map(|a| a.to_string()));
            self.state.lock().unwrap().invocations.push(argv);
        }

        // Give any other task the chance to overlap with this one
        tokio::time::sleep(Duration::from_millis(1)).await;

        let output = self.respond(&args.join(" "));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(output)
    }
}
