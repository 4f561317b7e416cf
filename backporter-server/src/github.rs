use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;

use backporter_core::labels::{backport_label, BACKPORT_DONE, BACKPORT_MANUAL};
use backporter_core::{
    release_branch, BotIdentity, CandidateSummary, CommitStatusState, Milestone, NewPullRequest,
    PullRequest, ReviewEvent, ReviewKind,
};

use crate::client::RepositoryClient;
use crate::config::parse_repo_name;
use crate::recording::{RecordingLogger, RecordingMiddleware, ServiceType};

pub const GITHUB_API: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

/// GitHub REST client scoped to one upstream repository, authenticated with
/// a personal access token.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_base: String,
    token: String,
    owner: String,
    repo: String,
    main_branch: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    total_count: u64,
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    /// `None` for reviews left by deleted accounts
    user: Option<ReviewUser>,
    state: ReviewKind,
}

#[derive(Debug, Deserialize)]
struct ReviewUser {
    login: String,
}

#[derive(Debug, Serialize)]
struct CreatePullRequestBody<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
    maintainer_can_modify: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedPullRequest {
    number: u64,
}

#[derive(Debug, Serialize)]
struct RequestReviewersBody<'a> {
    reviewers: &'a [String],
}

#[derive(Debug, Serialize)]
struct LabelsBody<'a> {
    labels: &'a [String],
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct AssigneesBody<'a> {
    assignees: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct CommitStatusBody<'a> {
    state: CommitStatusState,
    description: &'a str,
    context: &'a str,
}

/// Search query for merged pull requests on `main_branch` that still need a
/// backport to `major_minor`
pub fn candidate_query(upstream: &str, main_branch: &str, major_minor: &str) -> String {
    format!(
        "is:pr is:merged base:{} label:{} -label:{} -label:{} repo:{}",
        main_branch,
        backport_label(major_minor),
        BACKPORT_DONE,
        BACKPORT_MANUAL,
        upstream
    )
}

/// Search query for open pull requests against the release branch whose
/// title mentions `pr_number`
pub fn existing_backport_query(upstream: &str, pr_number: u64, major_minor: &str) -> String {
    format!(
        "is:pr is:open repo:{} base:{} {} in:title",
        upstream,
        release_branch(major_minor),
        pr_number
    )
}

/// Number reviews in the order GitHub returned them.
fn review_events(reviews: Vec<ReviewResponse>) -> Vec<ReviewEvent> {
    reviews
        .into_iter()
        .zip(0u64..)
        .filter_map(|(review, sequence)| {
            review
                .user
                .map(|user| ReviewEvent::new(user.login, review.state, sequence))
        })
        .collect()
}

impl GitHubClient {
    pub fn new(upstream: &str, main_branch: &str, token: String) -> Result<Self> {
        Self::new_with_recording(upstream, main_branch, token, None)
    }

    pub fn new_with_recording(
        upstream: &str,
        main_branch: &str,
        token: String,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        let (owner, repo) = parse_repo_name(upstream)?;
        Ok(Self {
            client: create_github_client(recording_logger)?,
            api_base: GITHUB_API.to_string(),
            token,
            owner: owner.to_string(),
            repo: repo.to_string(),
            main_branch: main_branch.to_string(),
        })
    }

    /// Point the client at another API root, e.g. a GitHub Enterprise
    /// instance or a mock server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn upstream(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Send a request and fail on any non-success status.
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error ({}): {} - {}", what, status, error_text);
            return Err(anyhow!(
                "GitHub API error ({}): {} - {}",
                what,
                status,
                error_text
            ));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let response = self.send(self.client.get(url).query(query), what).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    /// Fetch every page of a list endpoint.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for page in 1.. {
            let mut page_query = query.to_vec();
            page_query.push(("per_page", PER_PAGE.to_string()));
            page_query.push(("page", page.to_string()));

            let items: Vec<T> = self.get_json(url, &page_query, what).await?;
            let done = items.len() < PER_PAGE;
            all.extend(items);
            if done {
                break;
            }
        }
        Ok(all)
    }

    async fn search_all<T: DeserializeOwned>(&self, query: &str, what: &str) -> Result<Vec<T>> {
        let url = format!("{}/search/issues", self.api_base);
        let mut all = Vec::new();
        for page in 1.. {
            let response: SearchResponse<T> = self
                .get_json(
                    &url,
                    &[
                        ("q", query.to_string()),
                        ("per_page", PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                    what,
                )
                .await?;
            let done = response.items.len() < PER_PAGE;
            all.extend(response.items);
            if done || all.len() as u64 >= response.total_count {
                break;
            }
        }
        Ok(all)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        what: &str,
    ) -> Result<reqwest::Response> {
        self.send(self.client.post(url).json(body), what).await
    }
}

#[async_trait]
impl RepositoryClient for GitHubClient {
    async fn current_user(&self) -> Result<BotIdentity> {
        let user: UserResponse = self
            .get_json(&format!("{}/user", self.api_base), &[], "current user")
            .await?;
        info!("Authenticated as {}", user.login);
        Ok(BotIdentity {
            login: user.login,
            email: user.email.filter(|e| !e.is_empty()),
        })
    }

    async fn fetch_milestones(&self) -> Result<Vec<Milestone>> {
        let milestones: Vec<Milestone> = self
            .get_all_pages(
                &self.repo_url("milestones"),
                &[("state", "open".to_string())],
                "milestones",
            )
            .await?;
        info!("Fetched {} open milestones", milestones.len());
        Ok(milestones)
    }

    async fn fetch_candidates(&self, major_minor: &str) -> Result<Vec<CandidateSummary>> {
        let query = candidate_query(&self.upstream(), &self.main_branch, major_minor);
        self.search_all(&query, "candidate search").await
    }

    async fn pull_request_exists_for_backport(
        &self,
        pr_number: u64,
        major_minor: &str,
    ) -> Result<bool> {
        let query = existing_backport_query(&self.upstream(), pr_number, major_minor);
        let response: SearchResponse<serde_json::Value> = self
            .get_json(
                &format!("{}/search/issues", self.api_base),
                &[("q", query), ("per_page", "1".to_string())],
                "backport search",
            )
            .await?;
        Ok(response.total_count > 0)
    }

    async fn fetch_pull_request(&self, pr_number: u64) -> Result<PullRequest> {
        self.get_json(
            &self.repo_url(&format!("pulls/{}", pr_number)),
            &[],
            "pull request",
        )
        .await
    }

    async fn fetch_review_events(&self, pr_number: u64) -> Result<Vec<ReviewEvent>> {
        let reviews: Vec<ReviewResponse> = self
            .get_all_pages(
                &self.repo_url(&format!("pulls/{}/reviews", pr_number)),
                &[],
                "reviews",
            )
            .await?;
        Ok(review_events(reviews))
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<u64> {
        info!(
            "Creating pull request {:?} from {} into {}",
            request.title, request.head, request.base
        );
        let body = CreatePullRequestBody {
            title: &request.title,
            head: &request.head,
            base: &request.base,
            body: &request.body,
            maintainer_can_modify: true,
        };
        let created: CreatedPullRequest = self
            .post_json(&self.repo_url("pulls"), &body, "create pull request")
            .await?
            .json()
            .await
            .context("Failed to parse create pull request response")?;

        // The pull request exists from here on, so its number must reach the caller
        if !request.reviewers.is_empty() {
            if let Err(e) = self
                .post_json(
                    &self.repo_url(&format!("pulls/{}/requested_reviewers", created.number)),
                    &RequestReviewersBody {
                        reviewers: &request.reviewers,
                    },
                    "request reviewers",
                )
                .await
            {
                warn!(
                    "Created pull request #{} but could not request reviewers {:?}: {:#}",
                    created.number, request.reviewers, e
                );
            }
        }

        info!("Created pull request #{}", created.number);
        Ok(created.number)
    }

    async fn add_labels(&self, pr_number: u64, labels: &[String]) -> Result<()> {
        self.post_json(
            &self.repo_url(&format!("issues/{}/labels", pr_number)),
            &LabelsBody { labels },
            "add labels",
        )
        .await?;
        Ok(())
    }

    async fn remove_label(&self, pr_number: u64, label: &str) -> Result<()> {
        let mut url = Url::parse(&self.repo_url(&format!("issues/{}/labels", pr_number)))
            .context("Invalid label URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("API base cannot carry a path"))?
            .push(label);

        let response = self
            .authorized(self.client.delete(url.as_str()))
            .send()
            .await
            .context("Failed to send remove label request")?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                warn!("Label {:?} was already gone from #{}", label, pr_number);
                Ok(())
            }
            status => {
                let error_text = response
                    .text()
                    .await
                    .context("Failed to read error response body")?;
                error!("GitHub API error (remove label): {} - {}", status, error_text);
                Err(anyhow!(
                    "GitHub API error (remove label): {} - {}",
                    status,
                    error_text
                ))
            }
        }
    }

    async fn add_comment(&self, pr_number: u64, body: &str) -> Result<()> {
        info!("Commenting on #{}", pr_number);
        self.post_json(
            &self.repo_url(&format!("issues/{}/comments", pr_number)),
            &CommentBody { body },
            "comment",
        )
        .await?;
        Ok(())
    }

    async fn set_assignee(&self, pr_number: u64, login: &str) -> Result<()> {
        self.post_json(
            &self.repo_url(&format!("issues/{}/assignees", pr_number)),
            &AssigneesBody { assignees: [login] },
            "assign",
        )
        .await?;
        Ok(())
    }

    async fn set_commit_status(
        &self,
        sha: &str,
        state: CommitStatusState,
        description: &str,
        context: &str,
    ) -> Result<()> {
        self.post_json(
            &self.repo_url(&format!("statuses/{}", sha)),
            &CommitStatusBody {
                state,
                description,
                context,
            },
            "commit status",
        )
        .await?;
        Ok(())
    }
}

pub fn create_github_client(
    recording_logger: Option<RecordingLogger>,
) -> Result<ClientWithMiddleware> {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(format!("backporter/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        let recording_middleware = RecordingMiddleware::new(logger, ServiceType::GitHub);
        builder = builder.with(recording_middleware);
    }

    Ok(builder.build())
}
