//! Fakes shared by the reconciler, scheduler and API tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use borked_core::{BranchStatus, NewProject, PullRequestStatus, RepoRef, RepositoryInfo};

/// Upstream state of one fake repository.
#[derive(Debug, Clone)]
pub struct FakeRepo {
    pub default_branch: String,
    pub branch_passing: bool,
    pub pull_requests: Vec<PullRequestStatus>,
    /// When set, every call for this repository fails.
    pub unavailable: bool,
}

impl FakeRepo {
    pub fn with_prs(pull_requests: Vec<PullRequestStatus>) -> Self {
        Self {
            default_branch: "main".to_string(),
            branch_passing: true,
            pull_requests,
            unavailable: false,
        }
    }
}

/// In-process `SourceClient` serving canned repository state.
#[derive(Default)]
pub struct FakeSource {
    repos: Mutex<HashMap<String, FakeRepo>>,
    pull_request_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open-PR fetch sleeps for `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_repo(&self, repo: &str, state: FakeRepo) {
        self.repos.lock().unwrap().insert(repo.to_string(), state);
    }

    pub fn set_pull_requests(&self, repo: &str, pull_requests: Vec<PullRequestStatus>) {
        self.repos
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_insert_with(|| FakeRepo::with_prs(vec![]))
            .pull_requests = pull_requests;
    }

    pub fn set_unavailable(&self, repo: &str, unavailable: bool) {
        if let Some(state) = self.repos.lock().unwrap().get_mut(repo) {
            state.unavailable = unavailable;
        }
    }

    pub fn pull_request_calls(&self) -> usize {
        self.pull_request_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, repo: &RepoRef) -> Result<FakeRepo> {
        let repos = self.repos.lock().unwrap();
        match repos.get(&repo.to_string()) {
            Some(state) if state.unavailable => {
                Err(anyhow!("GitHub API error fetching repository: 503 - unavailable"))
            }
            Some(state) => Ok(state.clone()),
            None => Err(anyhow!("GitHub API error fetching repository: 404 - Not Found")),
        }
    }
}

#[async_trait]
impl crate::source::SourceClient for FakeSource {
    async fn fetch_repository_info(&self, repo: &RepoRef) -> Result<RepositoryInfo> {
        let state = self.lookup(repo)?;
        Ok(RepositoryInfo {
            name: repo.name.clone(),
            owner: repo.owner.clone(),
            default_branch: state.default_branch,
        })
    }

    async fn fetch_default_branch_status(&self, repo: &RepoRef) -> Result<BranchStatus> {
        let state = self.lookup(repo)?;
        Ok(BranchStatus {
            all_checks_passed: state.branch_passing,
            last_updated: None,
            checks: vec![],
        })
    }

    async fn fetch_open_pull_requests(&self, repo: &RepoRef) -> Result<Vec<PullRequestStatus>> {
        self.pull_request_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lookup(repo)?.pull_requests)
    }
}

/// A live PR as the source would report it.
pub fn live_pr(number: u64, updated: bool, passing: bool) -> PullRequestStatus {
    PullRequestStatus {
        number,
        title: format!("PR #{}", number),
        last_updated: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        updated,
        all_checks_passed: passing,
    }
}

pub fn catalog_project(external_id: &str, github_repo: &str) -> NewProject {
    NewProject {
        external_id: external_id.to_string(),
        name: format!("Project {}", external_id),
        github_repo: github_repo.to_string(),
        url: format!("https://github.com/{}", github_repo),
    }
}
