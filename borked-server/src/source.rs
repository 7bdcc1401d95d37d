//! The seam between the reconciler and the live source of repository state.
//!
//! `SourceClient` is implemented by [`crate::github::GitHubClient`] in
//! production and by fakes in tests. This module also holds the paging and
//! batching helpers every implementation shares.

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;

use borked_core::{BranchStatus, PullRequestStatus, RepoRef, RepositoryInfo};

/// Items requested per page from list endpoints.
pub const PAGE_SIZE: usize = 100;

/// Maximum number of per-PR check fetches in flight at once.
pub const CHECK_FETCH_BATCH_SIZE: usize = 10;

/// Source of live repository, branch and pull request state.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Repository metadata, including the default branch name.
    async fn fetch_repository_info(&self, repo: &RepoRef) -> Result<RepositoryInfo>;

    /// CI status of the head commit of the default branch.
    async fn fetch_default_branch_status(&self, repo: &RepoRef) -> Result<BranchStatus>;

    /// All open pull requests, each with its check result and `updated` flag.
    async fn fetch_open_pull_requests(&self, repo: &RepoRef) -> Result<Vec<PullRequestStatus>>;
}

/// Fetch pages starting at 1 until a page comes back shorter than `page_size`.
///
/// A short page (including an empty one) is the only termination condition;
/// no total count is consulted.
pub async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut all_items = Vec::new();
    let mut page = 1u32;

    loop {
        let items = fetch_page(page).await?;
        let count = items.len();
        all_items.extend(items);

        if count < page_size {
            break;
        }

        page += 1;
    }

    Ok(all_items)
}

/// Run `task` over `items` in consecutive batches of `batch_size`.
///
/// Each batch runs concurrently and is awaited in full before the next one
/// starts, so no more than `batch_size` tasks are ever in flight. Results keep
/// input order. If any task in a batch fails, the batch still completes and
/// the first error is returned without starting later batches.
pub async fn run_in_batches<I, T, F, Fut>(
    items: Vec<I>,
    batch_size: usize,
    task: F,
) -> Result<Vec<T>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut remaining = items.into_iter().peekable();

    while remaining.peek().is_some() {
        let batch: Vec<Fut> = remaining.by_ref().take(batch_size).map(&task).collect();
        for result in join_all(batch).await {
            results.push(result?);
        }
    }

    Ok(results)
}
