//! Snapshot history operations for the SQLite repository.
//!
//! Project snapshots keep their failed PR numbers as a JSON array; group
//! snapshots keep their per-project details as a JSON array of objects.
//! Undecodable JSON is logged and read back as empty rather than failing the
//! whole query.

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use borked_core::{
    decode_failed_numbers, encode_failed_numbers, GroupId, GroupSnapshot, GroupSnapshotDetail,
    NewGroupSnapshot, NewProjectSnapshot, Page, PageRequest, ProjectId, ProjectSnapshot,
    SnapshotId,
};

use super::super::{i64_to_count, RepositoryError};
use super::{from_millis, storage_err, to_millis, u64_to_i64_limit};

struct ProjectSnapshotRow {
    id: i64,
    project_id: i64,
    created_at: i64,
    number_of_prs: i64,
    number_of_failed_prs: i64,
    failed_pr_numbers: Option<String>,
}

impl ProjectSnapshotRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            created_at: row.get(2)?,
            number_of_prs: row.get(3)?,
            number_of_failed_prs: row.get(4)?,
            failed_pr_numbers: row.get(5)?,
        })
    }

    fn into_snapshot(self) -> Result<ProjectSnapshot, RepositoryError> {
        Ok(ProjectSnapshot {
            id: SnapshotId(self.id),
            project_id: ProjectId(self.project_id),
            created_at: from_millis(self.created_at, "project snapshot")?,
            number_of_prs: i64_to_count(self.number_of_prs, "snapshot PR count")?,
            number_of_failed_prs: i64_to_count(
                self.number_of_failed_prs,
                "snapshot failed PR count",
            )?,
            failed_pr_numbers: decode_failed_numbers(self.failed_pr_numbers.as_deref()),
        })
    }
}

struct GroupSnapshotRow {
    id: i64,
    group_id: i64,
    created_at: i64,
    details: Option<String>,
}

impl GroupSnapshotRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            created_at: row.get(2)?,
            details: row.get(3)?,
        })
    }

    fn into_snapshot(self) -> Result<GroupSnapshot, RepositoryError> {
        Ok(GroupSnapshot {
            id: SnapshotId(self.id),
            group_id: GroupId(self.group_id),
            created_at: from_millis(self.created_at, "group snapshot")?,
            details: decode_details(self.id, self.details.as_deref()),
        })
    }
}

fn decode_details(snapshot_id: i64, raw: Option<&str>) -> Vec<GroupSnapshotDetail> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(details) => details,
        Err(e) => {
            warn!(
                "Group snapshot {} has undecodable details: {}. Treating as empty.",
                snapshot_id, e
            );
            Vec::new()
        }
    }
}

const PROJECT_SNAPSHOT_COLUMNS: &str =
    "id, project_id, created_at, number_of_prs, number_of_failed_prs, failed_pr_numbers";

const GROUP_SNAPSHOT_COLUMNS: &str = "id, group_id, created_at, snapshot_details";

pub(super) fn insert_project_snapshot(
    conn: &Connection,
    snapshot: &NewProjectSnapshot,
) -> Result<ProjectSnapshot, RepositoryError> {
    let project_found = conn
        .query_row(
            "SELECT 1 FROM projects WHERE id = ?1",
            params![snapshot.project_id.0],
            |_| Ok(()),
        )
        .optional()
        .map_err(storage_err("create_project_snapshot"))?;
    if project_found.is_none() {
        return Err(RepositoryError::not_found("project", snapshot.project_id));
    }

    let sql = format!(
        "INSERT INTO project_snapshots
             (project_id, created_at, number_of_prs, number_of_failed_prs, failed_pr_numbers)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING {}",
        PROJECT_SNAPSHOT_COLUMNS
    );
    conn.query_row(
        &sql,
        params![
            snapshot.project_id.0,
            to_millis(snapshot.created_at),
            snapshot.number_of_prs,
            snapshot.number_of_failed_prs(),
            encode_failed_numbers(&snapshot.failed_pr_numbers)
        ],
        ProjectSnapshotRow::read,
    )
    .map_err(storage_err("create_project_snapshot"))?
    .into_snapshot()
}

pub(super) fn latest_project_snapshot(
    conn: &Connection,
    project: ProjectId,
) -> Result<Option<ProjectSnapshot>, RepositoryError> {
    let sql = format!(
        "SELECT {} FROM project_snapshots WHERE project_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT 1",
        PROJECT_SNAPSHOT_COLUMNS
    );
    conn.query_row(&sql, params![project.0], ProjectSnapshotRow::read)
        .optional()
        .map_err(storage_err("find_latest_project_snapshot"))?
        .map(ProjectSnapshotRow::into_snapshot)
        .transpose()
}

pub(super) fn project_snapshot_page(
    conn: &Connection,
    project: ProjectId,
    request: PageRequest,
) -> Result<Page<ProjectSnapshot>, RepositoryError> {
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM project_snapshots WHERE project_id = ?1",
            params![project.0],
            |row| row.get(0),
        )
        .map_err(storage_err("find_project_snapshots"))?;

    let sql = format!(
        "SELECT {} FROM project_snapshots WHERE project_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
        PROJECT_SNAPSHOT_COLUMNS
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(storage_err("find_project_snapshots"))?;
    let rows = stmt
        .query_map(
            params![
                project.0,
                request.limit,
                u64_to_i64_limit(request.offset())
            ],
            ProjectSnapshotRow::read,
        )
        .map_err(storage_err("find_project_snapshots"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage_err("find_project_snapshots"))?;

    let items = rows
        .into_iter()
        .map(ProjectSnapshotRow::into_snapshot)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total.max(0) as u64, request))
}

pub(super) fn insert_group_snapshot(
    conn: &Connection,
    snapshot: &NewGroupSnapshot,
) -> Result<GroupSnapshot, RepositoryError> {
    let group_found = conn
        .query_row(
            "SELECT 1 FROM project_groups WHERE id = ?1",
            params![snapshot.group_id.0],
            |_| Ok(()),
        )
        .optional()
        .map_err(storage_err("create_group_snapshot"))?;
    if group_found.is_none() {
        return Err(RepositoryError::not_found("group", snapshot.group_id));
    }

    let details = serde_json::to_string(&snapshot.details)
        .map_err(|e| RepositoryError::storage("serialize group snapshot details", e.to_string()))?;

    let sql = format!(
        "INSERT INTO group_snapshots (group_id, created_at, snapshot_details)
         VALUES (?1, ?2, ?3)
         RETURNING {}",
        GROUP_SNAPSHOT_COLUMNS
    );
    conn.query_row(
        &sql,
        params![snapshot.group_id.0, to_millis(snapshot.created_at), details],
        GroupSnapshotRow::read,
    )
    .map_err(storage_err("create_group_snapshot"))?
    .into_snapshot()
}

pub(super) fn latest_group_snapshot(
    conn: &Connection,
    group: GroupId,
) -> Result<Option<GroupSnapshot>, RepositoryError> {
    let sql = format!(
        "SELECT {} FROM group_snapshots WHERE group_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT 1",
        GROUP_SNAPSHOT_COLUMNS
    );
    conn.query_row(&sql, params![group.0], GroupSnapshotRow::read)
        .optional()
        .map_err(storage_err("find_latest_group_snapshot"))?
        .map(GroupSnapshotRow::into_snapshot)
        .transpose()
}

pub(super) fn group_snapshot_page(
    conn: &Connection,
    group: GroupId,
    request: PageRequest,
) -> Result<Page<GroupSnapshot>, RepositoryError> {
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM group_snapshots WHERE group_id = ?1",
            params![group.0],
            |row| row.get(0),
        )
        .map_err(storage_err("find_group_snapshots"))?;

    let sql = format!(
        "SELECT {} FROM group_snapshots WHERE group_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
        GROUP_SNAPSHOT_COLUMNS
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(storage_err("find_group_snapshots"))?;
    let rows = stmt
        .query_map(
            params![group.0, request.limit, u64_to_i64_limit(request.offset())],
            GroupSnapshotRow::read,
        )
        .map_err(storage_err("find_group_snapshots"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage_err("find_group_snapshots"))?;

    let items = rows
        .into_iter()
        .map(GroupSnapshotRow::into_snapshot)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total.max(0) as u64, request))
}
