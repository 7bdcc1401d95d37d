//! Read-only JSON endpoints over the stored sync state.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use borked_core::{
    Group, GroupMembers, GroupSnapshot, Page, PageRequest, Project, ProjectId, ProjectSnapshot,
    DEFAULT_PAGE_LIMIT,
};

use crate::repository::RepositoryError;
use crate::scheduler::SchedulerStatus;
use crate::AppState;

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .route("/projects/{external_id}", get(project_handler))
        .route(
            "/projects/{external_id}/snapshots",
            get(project_snapshots_handler),
        )
        .route("/groups", get(groups_handler))
        .route("/groups/{external_id}", get(group_handler))
        .route("/groups/{external_id}/snapshots", get(group_snapshots_handler))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    fn request(&self) -> PageRequest {
        PageRequest::new(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
    }
}

/// A project's cached sync fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub github_repo: String,
    pub url: String,
    pub default_branch_name: Option<String>,
    pub default_branch_status: Option<bool>,
    pub open_prs: u32,
    pub failing_prs: u32,
    pub last_sync: Option<DateTime<Utc>>,
}

impl From<&Project> for ProjectSummary {
    fn from(p: &Project) -> Self {
        Self {
            id: p.external_id.clone(),
            name: p.name.clone(),
            github_repo: p.github_repo.clone(),
            url: p.url.clone(),
            default_branch_name: p.default_branch_name.clone(),
            default_branch_status: p.default_branch_status,
            open_prs: p.open_prs,
            failing_prs: p.failing_prs,
            last_sync: p.last_sync,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub sync: SchedulerStatus,
    pub projects: Vec<ProjectSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingPullRequest {
    pub number: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    #[serde(flatten)]
    pub project: ProjectSummary,
    /// Highest number first.
    pub failing_pull_requests: Vec<FailingPullRequest>,
    pub snapshots: Page<ProjectSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    /// External ids of the member projects, by name.
    pub project_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestView {
    pub number: u64,
    pub title: String,
    pub all_checks_passed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberResponse {
    #[serde(flatten)]
    pub project: ProjectSummary,
    /// Stored open PRs, highest number first.
    pub pull_requests: Vec<PullRequestView>,
    pub latest_snapshot: Option<ProjectSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub projects: Vec<GroupMemberResponse>,
    pub latest_snapshot: Option<GroupSnapshot>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "borked",
        "version": crate::get_version(),
    }))
}

fn storage_failure(what: &str, e: RepositoryError) -> Response {
    error!("Failed to {}: {}", what, e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {}", what)).into_response()
}

fn not_found(entity: &str, external_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("No {} with id '{}'", entity, external_id),
    )
        .into_response()
}

async fn load_project(state: &AppState, external_id: &str) -> Result<Project, Response> {
    state
        .repository
        .find_project_by_external_id(external_id)
        .await
        .map_err(|e| storage_failure("load project", e))?
        .ok_or_else(|| not_found("project", external_id))
}

/// Handler: GET /status
async fn status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, Response> {
    let projects = state
        .repository
        .list_projects()
        .await
        .map_err(|e| storage_failure("list projects", e))?;

    Ok(Json(StatusResponse {
        version: crate::get_version(),
        sync: state.scheduler.status().await,
        projects: projects.iter().map(ProjectSummary::from).collect(),
    }))
}

/// Handler: GET /projects/{external_id}
async fn project_handler(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<Json<ProjectResponse>, Response> {
    let project = load_project(&state, &external_id).await?;

    let mut failing: Vec<FailingPullRequest> = state
        .repository
        .find_pull_requests(project.id)
        .await
        .map_err(|e| storage_failure("load pull requests", e))?
        .into_iter()
        .filter(|pr| !pr.checks_passed)
        .map(|pr| FailingPullRequest {
            number: pr.number,
            title: pr.title,
            created_at: pr.created_at,
        })
        .collect();
    failing.sort_by(|a, b| b.number.cmp(&a.number));

    let snapshots = state
        .repository
        .find_project_snapshots(project.id, PageRequest::default())
        .await
        .map_err(|e| storage_failure("load project snapshots", e))?;

    Ok(Json(ProjectResponse {
        project: ProjectSummary::from(&project),
        failing_pull_requests: failing,
        snapshots,
    }))
}

/// Handler: GET /projects/{external_id}/snapshots?page&limit
async fn project_snapshots_handler(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<ProjectSnapshot>>, Response> {
    let project = load_project(&state, &external_id).await?;
    let page = state
        .repository
        .find_project_snapshots(project.id, query.request())
        .await
        .map_err(|e| storage_failure("load project snapshots", e))?;
    Ok(Json(page))
}

/// Member projects of `group`, ordered by name then id. Unknown ids are skipped.
fn members<'a>(
    group: &GroupMembers,
    projects: &'a HashMap<ProjectId, Project>,
) -> Vec<&'a Project> {
    let mut members: Vec<&Project> = group
        .project_ids
        .iter()
        .filter_map(|id| projects.get(id))
        .collect();
    members.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    members
}

async fn load_catalog_view(
    state: &AppState,
) -> Result<(Vec<GroupMembers>, HashMap<ProjectId, Project>), Response> {
    let groups = state
        .repository
        .list_groups()
        .await
        .map_err(|e| storage_failure("list groups", e))?;
    let projects = state
        .repository
        .list_projects()
        .await
        .map_err(|e| storage_failure("list projects", e))?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    Ok((groups, projects))
}

/// Handler: GET /groups
async fn groups_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<GroupSummary>>, Response> {
    let (groups, projects) = load_catalog_view(&state).await?;

    Ok(Json(
        groups
            .iter()
            .map(|g| GroupSummary {
                id: g.group.external_id.clone(),
                name: g.group.name.clone(),
                project_ids: members(g, &projects)
                    .into_iter()
                    .map(|p| p.external_id.clone())
                    .collect(),
                created_at: g.group.created_at,
            })
            .collect(),
    ))
}

async fn member_response(
    state: &AppState,
    project: &Project,
) -> Result<GroupMemberResponse, Response> {
    let mut pull_requests: Vec<PullRequestView> = state
        .repository
        .find_pull_requests(project.id)
        .await
        .map_err(|e| storage_failure("load pull requests", e))?
        .into_iter()
        .map(|pr| PullRequestView {
            number: pr.number,
            title: pr.title,
            all_checks_passed: pr.checks_passed,
            created_at: pr.created_at,
        })
        .collect();
    pull_requests.sort_by(|a, b| b.number.cmp(&a.number));

    let latest_snapshot = state
        .repository
        .find_latest_project_snapshot(project.id)
        .await
        .map_err(|e| storage_failure("load project snapshot", e))?;

    Ok(GroupMemberResponse {
        project: ProjectSummary::from(project),
        pull_requests,
        latest_snapshot,
    })
}

/// Handler: GET /groups/{external_id}
async fn group_handler(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<Json<GroupResponse>, Response> {
    let (groups, projects) = load_catalog_view(&state).await?;
    let Some(group) = groups.iter().find(|g| g.group.external_id == external_id) else {
        return Err(not_found("group", &external_id));
    };

    let mut members_out = Vec::with_capacity(group.project_ids.len());
    for project in members(group, &projects) {
        members_out.push(member_response(&state, project).await?);
    }

    let latest_snapshot = state
        .repository
        .find_latest_group_snapshot(group.group.id)
        .await
        .map_err(|e| storage_failure("load group snapshot", e))?;

    let Group {
        external_id,
        name,
        created_at,
        ..
    } = group.group.clone();
    Ok(Json(GroupResponse {
        id: external_id,
        name,
        created_at,
        projects: members_out,
        latest_snapshot,
    }))
}

/// Handler: GET /groups/{external_id}/snapshots?page&limit
async fn group_snapshots_handler(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<GroupSnapshot>>, Response> {
    let group = state
        .repository
        .find_group_by_external_id(&external_id)
        .await
        .map_err(|e| storage_failure("load group", e))?
        .ok_or_else(|| not_found("group", &external_id))?;
    let page = state
        .repository
        .find_group_snapshots(group.id, query.request())
        .await
        .map_err(|e| storage_failure("load group snapshots", e))?;
    Ok(Json(page))
}
