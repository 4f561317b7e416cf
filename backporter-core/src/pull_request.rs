use serde::{Deserialize, Serialize};

/// A GitHub account as it appears on pull requests and reviews
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

/// The authenticated account the bot acts as.
///
/// Fetched once at startup and passed to whoever needs it. `email` is `None`
/// when the token lacks the `user` scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub login: String,
    pub email: Option<String>,
}

/// An open milestone, as listed by the hosting API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    pub number: u64,
}

/// A search hit for a merged pull request still waiting for a backport.
///
/// Search results do not carry merge commits or reviewers; the engine fetches
/// the full [`PullRequest`] once it decides to act on the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

/// Full pull request as returned by `GET /repos/{owner}/{repo}/pulls/{number}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub requested_reviewers: Vec<User>,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
}

impl PullRequest {
    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| l.name.as_str())
    }

    pub fn requested_reviewer_logins(&self) -> Vec<String> {
        self.requested_reviewers
            .iter()
            .map(|u| u.login.clone())
            .collect()
    }
}

/// Everything needed to open a pull request and request its first reviews
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    /// `owner:branch` of the pushed head
    pub head: String,
    pub base: String,
    pub body: String,
    pub reviewers: Vec<String>,
}

/// State of a commit status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatusState {
    Pending,
    Success,
    Failure,
    Error,
}
