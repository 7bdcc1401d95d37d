//! Stored record types for projects, their open pull requests and the
//! snapshot history.
//!
//! Everything here is plain data. Persistence lives in `borked-server`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newtype for the internal project id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProjectId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Newtype for the internal group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for GroupId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Newtype for a snapshot row id (project or group snapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub i64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository reference in `owner/repo` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

/// Returned when a stored repository reference can't be split into owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid repository reference '{0}': expected 'owner/repo'")]
pub struct InvalidRepoRef(pub String);

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/repo`.
    ///
    /// The first two `/`-separated segments must be non-empty; anything after
    /// them (`owner/repo/tree/main`) is ignored. Surrounding whitespace is ignored.
    pub fn parse(value: &str) -> Result<Self, InvalidRepoRef> {
        let trimmed = value.trim();
        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self::new(owner, name))
            }
            _ => Err(InvalidRepoRef(value.to_string())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A group of projects. Membership is many-to-many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub external_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A group together with the ids of its member projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembers {
    pub group: Group,
    pub project_ids: Vec<ProjectId>,
}

/// A tracked repository and its cached sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub external_id: String,
    pub name: String,
    /// Raw `owner/repo` string as configured. Validated at sync time, not on load.
    pub github_repo: String,
    pub url: String,
    pub default_branch_name: Option<String>,
    pub default_branch_status: Option<bool>,
    pub open_prs: u32,
    pub failing_prs: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Catalog fields of a project, as supplied by the project configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub external_id: String,
    pub name: String,
    pub github_repo: String,
    pub url: String,
}

/// Fields written to a project at the end of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSyncUpdate {
    pub last_sync: DateTime<Utc>,
    pub default_branch_name: String,
    pub default_branch_status: bool,
    pub open_prs: u32,
    pub failing_prs: u32,
}

/// A stored open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub project_id: ProjectId,
    pub number: u64,
    pub title: String,
    pub last_updated: DateTime<Utc>,
    pub checks_passed: bool,
    pub created_at: DateTime<Utc>,
}

/// Values written when upserting a pull request record.
///
/// The creation timestamp is assigned by the store on insert and kept on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestUpsert {
    pub number: u64,
    pub title: String,
    pub last_updated: DateTime<Utc>,
    pub checks_passed: bool,
}

/// An immutable point-in-time record of a project's PR counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: SnapshotId,
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
    pub number_of_prs: u32,
    pub number_of_failed_prs: u32,
    pub failed_pr_numbers: BTreeSet<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProjectSnapshot {
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
    pub number_of_prs: u32,
    pub failed_pr_numbers: BTreeSet<u64>,
}

impl NewProjectSnapshot {
    /// The failed count is always derived from the set.
    pub fn number_of_failed_prs(&self) -> u32 {
        u32::try_from(self.failed_pr_numbers.len()).unwrap_or(u32::MAX)
    }
}

/// One member project's line in a group snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshotDetail {
    pub project_id: ProjectId,
    pub project_snapshot_id: SnapshotId,
    pub project_name: String,
    pub failed_prs: u32,
    pub total_prs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: SnapshotId,
    pub group_id: GroupId,
    pub created_at: DateTime<Utc>,
    /// Ordered by project name.
    pub details: Vec<GroupSnapshotDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroupSnapshot {
    pub group_id: GroupId,
    pub created_at: DateTime<Utc>,
    pub details: Vec<GroupSnapshotDetail>,
}

/// Default page size for snapshot history.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// A 1-based page request. Zero values are clamped to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit.max(1))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_LIMIT)
    }
}

/// One page of results, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let limit = u64::from(request.limit.max(1));
        Self {
            items,
            total,
            page: request.page,
            total_pages: total.div_ceil(limit),
        }
    }
}
