//! SQLite implementation of `SyncRepository`.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Encoding
//!
//! Timestamps are stored as unix milliseconds. Failed PR number sets and group
//! snapshot details are stored as JSON text.

mod snapshots;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use borked_core::{
    Group, GroupId, GroupMembers, GroupSnapshot, NewGroupSnapshot, NewProject, NewProjectSnapshot,
    Page, PageRequest, Project, ProjectId, ProjectSnapshot, ProjectSyncUpdate, PullRequestRecord,
    PullRequestUpsert,
};

use super::{i64_to_count, i64_to_pr_number, pr_number_to_i64, RepositoryError, SyncRepository};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

const PROJECT_COLUMNS: &str = "id, external_id, name, github_repo, url, default_branch_name, \
     default_branch_status, open_prs, failing_prs, last_sync, created_at";

/// SQLite-backed sync repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(value: i64, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::<Utc>::from_timestamp_millis(value)
        .ok_or_else(|| RepositoryError::corruption(format!("{} timestamp {}", what, value)))
}

/// Clamp a `u64` row offset into the `i64` SQLite accepts.
pub(crate) fn u64_to_i64_limit(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn storage_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> RepositoryError {
    move |e| RepositoryError::storage(operation, e.to_string())
}

/// Raw column values of a `projects` row, before range checks.
struct ProjectRow {
    id: i64,
    external_id: String,
    name: String,
    github_repo: String,
    url: String,
    default_branch_name: Option<String>,
    default_branch_status: Option<bool>,
    open_prs: i64,
    failing_prs: i64,
    last_sync: Option<i64>,
    created_at: i64,
}

impl ProjectRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            external_id: row.get(1)?,
            name: row.get(2)?,
            github_repo: row.get(3)?,
            url: row.get(4)?,
            default_branch_name: row.get(5)?,
            default_branch_status: row.get(6)?,
            open_prs: row.get(7)?,
            failing_prs: row.get(8)?,
            last_sync: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_project(self) -> Result<Project, RepositoryError> {
        Ok(Project {
            id: ProjectId(self.id),
            external_id: self.external_id,
            name: self.name,
            github_repo: self.github_repo,
            url: self.url,
            default_branch_name: self.default_branch_name,
            default_branch_status: self.default_branch_status,
            open_prs: i64_to_count(self.open_prs, "open PR count")?,
            failing_prs: i64_to_count(self.failing_prs, "failing PR count")?,
            last_sync: self
                .last_sync
                .map(|ms| from_millis(ms, "last sync"))
                .transpose()?,
            created_at: from_millis(self.created_at, "project creation")?,
        })
    }
}

fn read_group(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_group(
    (id, external_id, name, created_at): (i64, String, String, i64),
) -> Result<Group, RepositoryError> {
    Ok(Group {
        id: GroupId(id),
        external_id,
        name,
        created_at: from_millis(created_at, "group creation")?,
    })
}

fn project_exists(conn: &Connection, id: ProjectId) -> Result<bool, RepositoryError> {
    conn.query_row("SELECT 1 FROM projects WHERE id = ?1", params![id.0], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(storage_err("check project exists"))
}

fn select_project(
    conn: &Connection,
    clause: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<Project>, RepositoryError> {
    let sql = format!("SELECT {} FROM projects WHERE {} = ?1", PROJECT_COLUMNS, clause);
    conn.query_row(&sql, [value], ProjectRow::read)
        .optional()
        .map_err(storage_err("get project"))?
        .map(ProjectRow::into_project)
        .transpose()
}

/// Insert or update one PR row and return its stored creation time.
fn upsert_pr_row(
    conn: &Connection,
    project: ProjectId,
    number: i64,
    pr: &PullRequestUpsert,
    now: i64,
) -> Result<i64, RepositoryError> {
    conn.query_row(
        "INSERT INTO open_pull_requests
             (project_id, number, title, last_updated, checks_passed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(project_id, number) DO UPDATE SET
             title = excluded.title,
             last_updated = excluded.last_updated,
             checks_passed = excluded.checks_passed
         RETURNING created_at",
        params![
            project.0,
            number,
            pr.title,
            to_millis(pr.last_updated),
            pr.checks_passed,
            now
        ],
        |row| row.get(0),
    )
    .map_err(storage_err("upsert pull request"))
}

fn delete_pr_rows(
    conn: &Connection,
    project: ProjectId,
    numbers: &[i64],
) -> Result<usize, RepositoryError> {
    let mut stmt = conn
        .prepare("DELETE FROM open_pull_requests WHERE project_id = ?1 AND number = ?2")
        .map_err(storage_err("delete pull requests"))?;
    let mut removed = 0;
    for number in numbers {
        removed += stmt
            .execute(params![project.0, number])
            .map_err(storage_err("delete pull requests"))?;
    }
    Ok(removed)
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    /// - `foreign_keys = ON` so removing a project cascades to its records
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        // Ensure parent directory exists (unless it's :memory: or empty path)
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref).map_err(storage_err("open database"))?;

        // SQLite reports "memory" as the journal mode for in-memory databases.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(storage_err("set journal_mode"))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            warn!(
                "SQLite kept journal mode '{}' instead of WAL for {}",
                journal_mode, path_str
            );
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(storage_err("configure pragmas"))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(storage_err("create schema_version table"))?;

        // Get current version (0 if table is empty = fresh database)
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("get schema version"))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS project_groups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    external_id TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    external_id TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    github_repo TEXT NOT NULL,
                    url TEXT NOT NULL,
                    default_branch_name TEXT,
                    default_branch_status INTEGER,
                    open_prs INTEGER NOT NULL DEFAULT 0,
                    failing_prs INTEGER NOT NULL DEFAULT 0,
                    last_sync INTEGER,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS group_members (
                    group_id INTEGER NOT NULL REFERENCES project_groups(id) ON DELETE CASCADE,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    PRIMARY KEY (group_id, project_id)
                );

                CREATE TABLE IF NOT EXISTS open_pull_requests (
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    number INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    last_updated INTEGER NOT NULL,
                    checks_passed INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (project_id, number)
                );

                CREATE TABLE IF NOT EXISTS project_snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    created_at INTEGER NOT NULL,
                    number_of_prs INTEGER NOT NULL,
                    number_of_failed_prs INTEGER NOT NULL,
                    failed_pr_numbers TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_project_snapshots_recent
                    ON project_snapshots(project_id, created_at DESC, id DESC);

                CREATE TABLE IF NOT EXISTS group_snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    group_id INTEGER NOT NULL REFERENCES project_groups(id) ON DELETE CASCADE,
                    created_at INTEGER NOT NULL,
                    snapshot_details TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_group_snapshots_recent
                    ON group_snapshots(group_id, created_at DESC, id DESC);
                "#,
            )
            .map_err(storage_err("migration v1"))?;
        }

        // Future migrations would go here:
        // if from_version < 2 { ... }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(storage_err("update schema version"))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| RepositoryError::storage(operation, "connection lock poisoned"))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

#[async_trait]
impl SyncRepository for SqliteRepository {
    async fn upsert_group(&self, external_id: &str, name: &str) -> Result<Group, RepositoryError> {
        let external_id = external_id.to_string();
        let name = name.to_string();
        let now = to_millis(Utc::now());

        self.with_conn("upsert_group", move |conn| {
            let row = conn
                .query_row(
                    "INSERT INTO project_groups (external_id, name, created_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(external_id) DO UPDATE SET name = excluded.name
                     RETURNING id, external_id, name, created_at",
                    params![external_id, name, now],
                    read_group,
                )
                .map_err(storage_err("upsert_group"))?;
            into_group(row)
        })
        .await
    }

    async fn upsert_project(&self, project: &NewProject) -> Result<Project, RepositoryError> {
        let project = project.clone();
        let now = to_millis(Utc::now());

        self.with_conn("upsert_project", move |conn| {
            let sql = format!(
                "INSERT INTO projects (external_id, name, github_repo, url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(external_id) DO UPDATE SET
                     name = excluded.name,
                     github_repo = excluded.github_repo,
                     url = excluded.url
                 RETURNING {}",
                PROJECT_COLUMNS
            );
            conn.query_row(
                &sql,
                params![
                    project.external_id,
                    project.name,
                    project.github_repo,
                    project.url,
                    now
                ],
                ProjectRow::read,
            )
            .map_err(storage_err("upsert_project"))?
            .into_project()
        })
        .await
    }

    async fn add_group_member(
        &self,
        group: GroupId,
        project: ProjectId,
    ) -> Result<(), RepositoryError> {
        self.with_conn("add_group_member", move |conn| {
            if !project_exists(conn, project)? {
                return Err(RepositoryError::not_found("project", project));
            }
            let group_found = conn
                .query_row(
                    "SELECT 1 FROM project_groups WHERE id = ?1",
                    params![group.0],
                    |_| Ok(()),
                )
                .optional()
                .map_err(storage_err("add_group_member"))?;
            if group_found.is_none() {
                return Err(RepositoryError::not_found("group", group));
            }

            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, project_id) VALUES (?1, ?2)",
                params![group.0, project.0],
            )
            .map_err(storage_err("add_group_member"))?;
            Ok(())
        })
        .await
    }

    async fn list_groups(&self) -> Result<Vec<GroupMembers>, RepositoryError> {
        self.with_conn("list_groups", |conn| {
            let mut stmt = conn
                .prepare("SELECT id, external_id, name, created_at FROM project_groups ORDER BY id")
                .map_err(storage_err("list_groups"))?;
            let groups = stmt
                .query_map([], read_group)
                .map_err(storage_err("list_groups"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err("list_groups"))?;

            let mut stmt = conn
                .prepare(
                    "SELECT group_id, project_id FROM group_members
                     ORDER BY group_id, project_id",
                )
                .map_err(storage_err("list_groups"))?;
            let memberships = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
                .map_err(storage_err("list_groups"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err("list_groups"))?;

            groups
                .into_iter()
                .map(|row| {
                    let group = into_group(row)?;
                    let project_ids = memberships
                        .iter()
                        .filter(|(group_id, _)| *group_id == group.id.0)
                        .map(|(_, project_id)| ProjectId(*project_id))
                        .collect();
                    Ok(GroupMembers { group, project_ids })
                })
                .collect()
        })
        .await
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        self.with_conn("list_projects", |conn| {
            let sql = format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLUMNS);
            let mut stmt = conn.prepare(&sql).map_err(storage_err("list_projects"))?;
            let rows = stmt
                .query_map([], ProjectRow::read)
                .map_err(storage_err("list_projects"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err("list_projects"))?;
            rows.into_iter().map(ProjectRow::into_project).collect()
        })
        .await
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, RepositoryError> {
        self.with_conn("get_project", move |conn| select_project(conn, "id", &id.0))
            .await
    }

    async fn find_project_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Project>, RepositoryError> {
        let external_id = external_id.to_string();
        self.with_conn("find_project_by_external_id", move |conn| {
            select_project(conn, "external_id", &external_id)
        })
        .await
    }

    async fn find_group_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Group>, RepositoryError> {
        let external_id = external_id.to_string();
        self.with_conn("find_group_by_external_id", move |conn| {
            conn.query_row(
                "SELECT id, external_id, name, created_at FROM project_groups
                 WHERE external_id = ?1",
                params![external_id],
                read_group,
            )
            .optional()
            .map_err(storage_err("find_group_by_external_id"))?
            .map(into_group)
            .transpose()
        })
        .await
    }

    async fn update_project_sync(
        &self,
        id: ProjectId,
        update: &ProjectSyncUpdate,
    ) -> Result<bool, RepositoryError> {
        let update = update.clone();
        self.with_conn("update_project_sync", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE projects SET
                         last_sync = ?2,
                         default_branch_name = ?3,
                         default_branch_status = ?4,
                         open_prs = ?5,
                         failing_prs = ?6
                     WHERE id = ?1",
                    params![
                        id.0,
                        to_millis(update.last_sync),
                        update.default_branch_name,
                        update.default_branch_status,
                        update.open_prs,
                        update.failing_prs
                    ],
                )
                .map_err(storage_err("update_project_sync"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn find_pull_requests(
        &self,
        project: ProjectId,
    ) -> Result<Vec<PullRequestRecord>, RepositoryError> {
        self.with_conn("find_pull_requests", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT number, title, last_updated, checks_passed, created_at
                     FROM open_pull_requests WHERE project_id = ?1 ORDER BY number",
                )
                .map_err(storage_err("find_pull_requests"))?;
            let rows = stmt
                .query_map(params![project.0], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .map_err(storage_err("find_pull_requests"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err("find_pull_requests"))?;

            rows.into_iter()
                .map(|(number, title, last_updated, checks_passed, created_at)| {
                    Ok(PullRequestRecord {
                        project_id: project,
                        number: i64_to_pr_number(number)?,
                        title,
                        last_updated: from_millis(last_updated, "PR last updated")?,
                        checks_passed,
                        created_at: from_millis(created_at, "PR creation")?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn upsert_pull_request(
        &self,
        project: ProjectId,
        pr: &PullRequestUpsert,
    ) -> Result<PullRequestRecord, RepositoryError> {
        let pr = pr.clone();
        let number = pr_number_to_i64(pr.number)?;
        let now = to_millis(Utc::now());

        self.with_conn("upsert_pull_request", move |conn| {
            if !project_exists(conn, project)? {
                return Err(RepositoryError::not_found("project", project));
            }
            let created_at = upsert_pr_row(conn, project, number, &pr, now)?;

            Ok(PullRequestRecord {
                project_id: project,
                number: pr.number,
                title: pr.title,
                last_updated: from_millis(to_millis(pr.last_updated), "PR last updated")?,
                checks_passed: pr.checks_passed,
                created_at: from_millis(created_at, "PR creation")?,
            })
        })
        .await
    }

    async fn delete_pull_requests(
        &self,
        project: ProjectId,
        numbers: &[u64],
    ) -> Result<usize, RepositoryError> {
        let numbers = numbers
            .iter()
            .map(|n| pr_number_to_i64(*n))
            .collect::<Result<Vec<_>, _>>()?;

        self.with_conn("delete_pull_requests", move |conn| {
            let tx = conn
                .transaction()
                .map_err(storage_err("delete_pull_requests"))?;
            let removed = delete_pr_rows(&tx, project, &numbers)?;
            tx.commit().map_err(storage_err("delete_pull_requests"))?;
            Ok(removed)
        })
        .await
    }

    async fn replace_pull_requests(
        &self,
        project: ProjectId,
        removed: &[u64],
        live: &[PullRequestUpsert],
    ) -> Result<usize, RepositoryError> {
        let removed = removed
            .iter()
            .map(|n| pr_number_to_i64(*n))
            .collect::<Result<Vec<_>, _>>()?;
        let live = live
            .iter()
            .map(|pr| Ok((pr_number_to_i64(pr.number)?, pr.clone())))
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        let now = to_millis(Utc::now());

        self.with_conn("replace_pull_requests", move |conn| {
            // Dropping the transaction without commit rolls every change back.
            let tx = conn
                .transaction()
                .map_err(storage_err("replace_pull_requests"))?;
            if !project_exists(&tx, project)? {
                return Err(RepositoryError::not_found("project", project));
            }
            let deleted = delete_pr_rows(&tx, project, &removed)?;
            for (number, pr) in &live {
                upsert_pr_row(&tx, project, *number, pr, now)?;
            }
            tx.commit().map_err(storage_err("replace_pull_requests"))?;
            Ok(deleted)
        })
        .await
    }

    async fn create_project_snapshot(
        &self,
        snapshot: &NewProjectSnapshot,
    ) -> Result<ProjectSnapshot, RepositoryError> {
        let snapshot = snapshot.clone();
        self.with_conn("create_project_snapshot", move |conn| {
            snapshots::insert_project_snapshot(conn, &snapshot)
        })
        .await
    }

    async fn find_latest_project_snapshot(
        &self,
        project: ProjectId,
    ) -> Result<Option<ProjectSnapshot>, RepositoryError> {
        self.with_conn("find_latest_project_snapshot", move |conn| {
            snapshots::latest_project_snapshot(conn, project)
        })
        .await
    }

    async fn find_project_snapshots(
        &self,
        project: ProjectId,
        request: PageRequest,
    ) -> Result<Page<ProjectSnapshot>, RepositoryError> {
        self.with_conn("find_project_snapshots", move |conn| {
            snapshots::project_snapshot_page(conn, project, request)
        })
        .await
    }

    async fn create_group_snapshot(
        &self,
        snapshot: &NewGroupSnapshot,
    ) -> Result<GroupSnapshot, RepositoryError> {
        let snapshot = snapshot.clone();
        self.with_conn("create_group_snapshot", move |conn| {
            snapshots::insert_group_snapshot(conn, &snapshot)
        })
        .await
    }

    async fn find_latest_group_snapshot(
        &self,
        group: GroupId,
    ) -> Result<Option<GroupSnapshot>, RepositoryError> {
        self.with_conn("find_latest_group_snapshot", move |conn| {
            snapshots::latest_group_snapshot(conn, group)
        })
        .await
    }

    async fn find_group_snapshots(
        &self,
        group: GroupId,
        request: PageRequest,
    ) -> Result<Page<GroupSnapshot>, RepositoryError> {
        self.with_conn("find_group_snapshots", move |conn| {
            snapshots::group_snapshot_page(conn, group, request)
        })
        .await
    }
}
