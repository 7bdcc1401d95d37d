//! Persistence abstraction for the project catalog, PR records and snapshot
//! history.
//!
//! The reconciler, aggregator and HTTP handlers only talk to
//! `SyncRepository`. Two backends exist: an in-memory one for tests and
//! throwaway runs, and SQLite for the server.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use thiserror::Error;

use borked_core::{
    Group, GroupId, GroupMembers, GroupSnapshot, NewGroupSnapshot, NewProject, NewProjectSnapshot,
    Page, PageRequest, Project, ProjectId, ProjectSnapshot, ProjectSyncUpdate, PullRequestRecord,
    PullRequestUpsert,
};

/// Errors returned by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backend failed to perform an operation.
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    /// Stored data could not be decoded.
    #[error("corrupt data: {what}")]
    Corruption { what: String },

    /// The entity an operation depends on does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Storage for everything the reconciliation engine reads and writes.
///
/// Projects own their PR records and snapshots; removing a project removes
/// both. Snapshots are append-only.
#[async_trait]
pub trait SyncRepository: Send + Sync {
    // --- Catalog ---

    /// Create a group or refresh its name, keyed by external id.
    async fn upsert_group(&self, external_id: &str, name: &str) -> Result<Group, RepositoryError>;

    /// Create a project or refresh its catalog fields, keyed by external id.
    ///
    /// Sync fields are never touched.
    async fn upsert_project(&self, project: &NewProject) -> Result<Project, RepositoryError>;

    /// Add a project to a group. Adding an existing member is a no-op.
    async fn add_group_member(
        &self,
        group: GroupId,
        project: ProjectId,
    ) -> Result<(), RepositoryError>;

    /// All groups with their member project ids, ordered by group id.
    async fn list_groups(&self) -> Result<Vec<GroupMembers>, RepositoryError>;

    /// All projects, ordered by id.
    async fn list_projects(&self) -> Result<Vec<Project>, RepositoryError>;

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, RepositoryError>;

    async fn find_project_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Project>, RepositoryError>;

    async fn find_group_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Group>, RepositoryError>;

    // --- Project sync fields ---

    /// Write the result of a sync. Returns false if the project no longer exists.
    async fn update_project_sync(
        &self,
        id: ProjectId,
        update: &ProjectSyncUpdate,
    ) -> Result<bool, RepositoryError>;

    // --- Pull request records ---

    /// All stored PR records for a project, ordered by number.
    async fn find_pull_requests(
        &self,
        project: ProjectId,
    ) -> Result<Vec<PullRequestRecord>, RepositoryError>;

    /// Insert or update one PR record. The creation timestamp is kept on update.
    ///
    /// Returns `NotFound` when the project no longer exists.
    async fn upsert_pull_request(
        &self,
        project: ProjectId,
        pr: &PullRequestUpsert,
    ) -> Result<PullRequestRecord, RepositoryError>;

    /// Delete the given PR numbers. Returns how many records were removed.
    async fn delete_pull_requests(
        &self,
        project: ProjectId,
        numbers: &[u64],
    ) -> Result<usize, RepositoryError>;

    /// Delete `removed` and upsert every entry of `live` as one atomic write.
    ///
    /// Either every change is applied or none is. Returns how many records were
    /// deleted, or `NotFound` when the project no longer exists.
    async fn replace_pull_requests(
        &self,
        project: ProjectId,
        removed: &[u64],
        live: &[PullRequestUpsert],
    ) -> Result<usize, RepositoryError>;

    // --- Snapshots ---

    async fn create_project_snapshot(
        &self,
        snapshot: &NewProjectSnapshot,
    ) -> Result<ProjectSnapshot, RepositoryError>;

    async fn find_latest_project_snapshot(
        &self,
        project: ProjectId,
    ) -> Result<Option<ProjectSnapshot>, RepositoryError>;

    /// Project snapshot history, newest first.
    async fn find_project_snapshots(
        &self,
        project: ProjectId,
        request: PageRequest,
    ) -> Result<Page<ProjectSnapshot>, RepositoryError>;

    async fn create_group_snapshot(
        &self,
        snapshot: &NewGroupSnapshot,
    ) -> Result<GroupSnapshot, RepositoryError>;

    async fn find_latest_group_snapshot(
        &self,
        group: GroupId,
    ) -> Result<Option<GroupSnapshot>, RepositoryError>;

    /// Group snapshot history, newest first.
    async fn find_group_snapshots(
        &self,
        group: GroupId,
        request: PageRequest,
    ) -> Result<Page<GroupSnapshot>, RepositoryError>;
}

/// Convert a PR number to the signed integer SQLite stores.
pub(crate) fn pr_number_to_i64(number: u64) -> Result<i64, RepositoryError> {
    i64::try_from(number).map_err(|_| {
        RepositoryError::storage(
            "convert PR number",
            format!("PR number {} exceeds i64::MAX", number),
        )
    })
}

/// Convert a stored PR number back, rejecting negative values.
pub(crate) fn i64_to_pr_number(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::corruption(format!("negative PR number {}", value)))
}

/// Convert a stored count back, rejecting values outside `u32`.
pub(crate) fn i64_to_count(value: i64, what: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::corruption(format!("{} out of range: {}", what, value)))
}
