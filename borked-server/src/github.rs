use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use borked_core::{BranchStatus, CheckRun, PullRequestStatus, RepoRef, RepositoryInfo};

use crate::config::GitHubConfig;
use crate::http_log::RequestLogMiddleware;
use crate::source::{collect_pages, run_in_batches, SourceClient, CHECK_FETCH_BATCH_SIZE, PAGE_SIZE};

/// `SourceClient` backed by the GitHub REST API, authenticated with a token.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_token: String,
    api_base_url: Url,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    name: String,
    owner: OwnerResponse,
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: BranchCommitResponse,
}

#[derive(Debug, Deserialize)]
struct BranchCommitResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    title: String,
    updated_at: DateTime<Utc>,
    head: PullRequestHeadResponse,
}

#[derive(Debug, Deserialize)]
struct PullRequestHeadResponse {
    sha: String,
}

impl GitHubClient {
    pub fn new(api_token: String, api_base_url: &str) -> Result<Self> {
        let api_base_url = Url::parse(api_base_url)
            .with_context(|| format!("Invalid GitHub API URL '{}'", api_base_url))?;
        if api_base_url.cannot_be_a_base() {
            return Err(anyhow!("GitHub API URL '{}' cannot be a base", api_base_url));
        }

        Ok(Self {
            client: create_github_client()?,
            api_token,
            api_base_url,
        })
    }

    /// Build a client from configuration. `None` when no token is configured.
    pub fn from_config(config: &GitHubConfig) -> Result<Option<Self>> {
        config
            .api_token
            .clone()
            .map(|token| Self::new(token, &config.api_base_url))
            .transpose()
    }

    /// Append path segments to the API base URL, percent-encoding each one.
    fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("GitHub API URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            return Err(anyhow!(
                "GitHub API error fetching {}: {} - {}",
                what,
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    async fn fetch_check_runs(&self, repo: &RepoRef, sha: &str) -> Result<Vec<CheckRun>> {
        let url = self.api_url(&["repos", &repo.owner, &repo.name, "commits", sha, "check-runs"])?;

        collect_pages(PAGE_SIZE, |page| {
            let url = url.clone();
            async move {
                let response: CheckRunsResponse = self
                    .get_json(
                        url,
                        &[
                            ("per_page", PAGE_SIZE.to_string()),
                            ("page", page.to_string()),
                        ],
                        "check runs",
                    )
                    .await?;
                Ok(response.check_runs)
            }
        })
        .await
    }

    async fn pull_request_status(
        &self,
        repo: &RepoRef,
        pr: PullRequestResponse,
    ) -> Result<PullRequestStatus> {
        let checks = self
            .fetch_check_runs(repo, &pr.head.sha)
            .await
            .with_context(|| format!("Failed to fetch checks for {}#{}", repo, pr.number))?;

        Ok(PullRequestStatus {
            number: pr.number,
            title: pr.title,
            last_updated: pr.updated_at,
            updated: true,
            all_checks_passed: borked_core::all_checks_passed(&checks),
        })
    }
}

#[async_trait]
impl SourceClient for GitHubClient {
    async fn fetch_repository_info(&self, repo: &RepoRef) -> Result<RepositoryInfo> {
        let url = self.api_url(&["repos", &repo.owner, &repo.name])?;
        let response: RepositoryResponse = self.get_json(url, &[], "repository").await?;

        Ok(RepositoryInfo {
            name: response.name,
            owner: response.owner.login,
            default_branch: response.default_branch,
        })
    }

    async fn fetch_default_branch_status(&self, repo: &RepoRef) -> Result<BranchStatus> {
        let info = self.fetch_repository_info(repo).await?;

        let url = self.api_url(&[
            "repos",
            &repo.owner,
            &repo.name,
            "branches",
            &info.default_branch,
        ])?;
        let branch: BranchResponse = self.get_json(url, &[], "branch").await?;

        debug!(
            "Default branch {} of {} is at {}",
            info.default_branch, repo, branch.commit.sha
        );

        let checks = self.fetch_check_runs(repo, &branch.commit.sha).await?;
        Ok(BranchStatus::from_checks(checks))
    }

    async fn fetch_open_pull_requests(&self, repo: &RepoRef) -> Result<Vec<PullRequestStatus>> {
        let url = self.api_url(&["repos", &repo.owner, &repo.name, "pulls"])?;

        let pull_requests = collect_pages(PAGE_SIZE, |page| {
            let url = url.clone();
            async move {
                self.get_json::<Vec<PullRequestResponse>>(
                    url,
                    &[
                        ("state", "open".to_string()),
                        ("sort", "created".to_string()),
                        ("direction", "asc".to_string()),
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                    "pull requests",
                )
                .await
            }
        })
        .await?;

        info!(
            "Found {} open pull requests for {}, fetching checks",
            pull_requests.len(),
            repo
        );

        run_in_batches(pull_requests, CHECK_FETCH_BATCH_SIZE, |pr| {
            self.pull_request_status(repo, pr)
        })
        .await
    }
}

/// Create an HTTP client with request logging.
pub fn create_github_client() -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("borked/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ClientBuilder::new(client)
        .with(RequestLogMiddleware::new("github"))
        .build())
}
