//! Typed results returned by a source of live repository state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub owner: String,
    pub default_branch: String,
}

/// Lifecycle status of a check run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    /// Any status this code doesn't know about yet.
    #[serde(other)]
    Unknown,
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
    ActionRequired,
    Stale,
    Skipped,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

/// A single CI check run against a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub details_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CheckRun {
    /// Only a completed run concluded as `failure` counts as failing.
    pub fn is_failure(&self) -> bool {
        self.status == CheckStatus::Completed
            && self.conclusion == Some(CheckConclusion::Failure)
    }
}

/// True iff no run is both completed and failed.
///
/// In-progress, neutral, skipped, cancelled and timed-out runs are all treated
/// as non-failing.
pub fn all_checks_passed(checks: &[CheckRun]) -> bool {
    !checks.iter().any(CheckRun::is_failure)
}

/// CI status of the head of the default branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    pub all_checks_passed: bool,
    /// Latest check start time; `None` when the ref has no checks.
    pub last_updated: Option<DateTime<Utc>>,
    pub checks: Vec<CheckRun>,
}

impl BranchStatus {
    pub fn from_checks(checks: Vec<CheckRun>) -> Self {
        Self {
            all_checks_passed: all_checks_passed(&checks),
            last_updated: checks.iter().filter_map(|c| c.started_at).max(),
            checks,
        }
    }
}

/// A live open pull request with its check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub number: u64,
    pub title: String,
    pub last_updated: DateTime<Utc>,
    /// Whether check data was fetched for this PR in this call. When false,
    /// `all_checks_passed` carries no signal.
    pub updated: bool,
    pub all_checks_passed: bool,
}

impl PullRequestStatus {
    /// Failing according to check data fetched this call.
    pub fn is_fresh_failure(&self) -> bool {
        self.updated && !self.all_checks_passed
    }
}
