//! In-memory implementation of `SyncRepository`.
//!
//! All state is held in memory and lost on restart. Used by tests and by the
//! CLI for dry runs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use borked_core::{
    Group, GroupId, GroupMembers, GroupSnapshot, NewGroupSnapshot, NewProject, NewProjectSnapshot,
    Page, PageRequest, Project, ProjectId, ProjectSnapshot, ProjectSyncUpdate, PullRequestRecord,
    PullRequestUpsert, SnapshotId,
};

use super::{RepositoryError, SyncRepository};

#[derive(Default)]
struct Tables {
    next_id: i64,
    groups: BTreeMap<GroupId, Group>,
    members: BTreeMap<GroupId, BTreeSet<ProjectId>>,
    projects: BTreeMap<ProjectId, Project>,
    pull_requests: BTreeMap<ProjectId, BTreeMap<u64, PullRequestRecord>>,
    project_snapshots: Vec<ProjectSnapshot>,
    group_snapshots: Vec<GroupSnapshot>,
}

impl Tables {
    /// Ids come from one counter so they are unique across tables.
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory sync repository.
///
/// Holds every table behind a single `RwLock`, so each operation is atomic.
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Delete a project along with its PR records, snapshots and memberships.
    #[cfg(test)]
    pub(crate) async fn remove_project(&self, id: ProjectId) {
        let mut tables = self.tables.write().await;
        tables.projects.remove(&id);
        tables.pull_requests.remove(&id);
        tables.project_snapshots.retain(|s| s.project_id != id);
        for members in tables.members.values_mut() {
            members.remove(&id);
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first; ties broken by id so insertion order decides.
fn newest_first<T, K: Ord>(items: &mut [T], key: impl Fn(&T) -> K) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

fn paginate<T: Clone>(sorted: Vec<T>, request: PageRequest) -> Page<T> {
    let total = sorted.len() as u64;
    let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
    let items = sorted
        .into_iter()
        .skip(offset)
        .take(request.limit as usize)
        .collect();
    Page::new(items, total, request)
}

#[async_trait]
impl SyncRepository for InMemoryRepository {
    async fn upsert_group(&self, external_id: &str, name: &str) -> Result<Group, RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(group) = tables
            .groups
            .values_mut()
            .find(|g| g.external_id == external_id)
        {
            group.name = name.to_string();
            return Ok(group.clone());
        }

        let id = GroupId(tables.allocate_id());
        let group = Group {
            id,
            external_id: external_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tables.groups.insert(id, group.clone());
        tables.members.insert(id, BTreeSet::new());
        Ok(group)
    }

    async fn upsert_project(&self, project: &NewProject) -> Result<Project, RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .projects
            .values_mut()
            .find(|p| p.external_id == project.external_id)
        {
            existing.name = project.name.clone();
            existing.github_repo = project.github_repo.clone();
            existing.url = project.url.clone();
            return Ok(existing.clone());
        }

        let id = ProjectId(tables.allocate_id());
        let created = Project {
            id,
            external_id: project.external_id.clone(),
            name: project.name.clone(),
            github_repo: project.github_repo.clone(),
            url: project.url.clone(),
            default_branch_name: None,
            default_branch_status: None,
            open_prs: 0,
            failing_prs: 0,
            last_sync: None,
            created_at: Utc::now(),
        };
        tables.projects.insert(id, created.clone());
        Ok(created)
    }

    async fn add_group_member(
        &self,
        group: GroupId,
        project: ProjectId,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&project) {
            return Err(RepositoryError::not_found("project", project));
        }
        match tables.members.get_mut(&group) {
            Some(members) => {
                members.insert(project);
                Ok(())
            }
            None => Err(RepositoryError::not_found("group", group)),
        }
    }

    async fn list_groups(&self) -> Result<Vec<GroupMembers>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .values()
            .map(|group| GroupMembers {
                group: group.clone(),
                project_ids: tables
                    .members
                    .get(&group.id)
                    .map(|m| m.iter().copied().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.projects.values().cloned().collect())
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.projects.get(&id).cloned())
    }

    async fn find_project_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Project>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .projects
            .values()
            .find(|p| p.external_id == external_id)
            .cloned())
    }

    async fn find_group_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Group>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .values()
            .find(|g| g.external_id == external_id)
            .cloned())
    }

    async fn update_project_sync(
        &self,
        id: ProjectId,
        update: &ProjectSyncUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        let Some(project) = tables.projects.get_mut(&id) else {
            return Ok(false);
        };
        project.last_sync = Some(update.last_sync);
        project.default_branch_name = Some(update.default_branch_name.clone());
        project.default_branch_status = Some(update.default_branch_status);
        project.open_prs = update.open_prs;
        project.failing_prs = update.failing_prs;
        Ok(true)
    }

    async fn find_pull_requests(
        &self,
        project: ProjectId,
    ) -> Result<Vec<PullRequestRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .pull_requests
            .get(&project)
            .map(|prs| prs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_pull_request(
        &self,
        project: ProjectId,
        pr: &PullRequestUpsert,
    ) -> Result<PullRequestRecord, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&project) {
            return Err(RepositoryError::not_found("project", project));
        }

        let records = tables.pull_requests.entry(project).or_default();
        let created_at = records
            .get(&pr.number)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        let record = PullRequestRecord {
            project_id: project,
            number: pr.number,
            title: pr.title.clone(),
            last_updated: pr.last_updated,
            checks_passed: pr.checks_passed,
            created_at,
        };
        records.insert(pr.number, record.clone());
        Ok(record)
    }

    async fn delete_pull_requests(
        &self,
        project: ProjectId,
        numbers: &[u64],
    ) -> Result<usize, RepositoryError> {
        let mut tables = self.tables.write().await;
        let Some(records) = tables.pull_requests.get_mut(&project) else {
            return Ok(0);
        };
        Ok(numbers
            .iter()
            .filter(|n| records.remove(n).is_some())
            .count())
    }

    async fn replace_pull_requests(
        &self,
        project: ProjectId,
        removed: &[u64],
        live: &[PullRequestUpsert],
    ) -> Result<usize, RepositoryError> {
        // Nothing below can fail once the project is known, so holding the
        // write lock makes the whole replacement atomic.
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&project) {
            return Err(RepositoryError::not_found("project", project));
        }

        let records = tables.pull_requests.entry(project).or_default();
        let deleted = removed
            .iter()
            .filter(|n| records.remove(n).is_some())
            .count();
        let now = Utc::now();
        for pr in live {
            let created_at = records
                .get(&pr.number)
                .map(|existing| existing.created_at)
                .unwrap_or(now);
            records.insert(
                pr.number,
                PullRequestRecord {
                    project_id: project,
                    number: pr.number,
                    title: pr.title.clone(),
                    last_updated: pr.last_updated,
                    checks_passed: pr.checks_passed,
                    created_at,
                },
            );
        }
        Ok(deleted)
    }

    async fn create_project_snapshot(
        &self,
        snapshot: &NewProjectSnapshot,
    ) -> Result<ProjectSnapshot, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&snapshot.project_id) {
            return Err(RepositoryError::not_found("project", snapshot.project_id));
        }
        let created = ProjectSnapshot {
            id: SnapshotId(tables.allocate_id()),
            project_id: snapshot.project_id,
            created_at: snapshot.created_at,
            number_of_prs: snapshot.number_of_prs,
            number_of_failed_prs: snapshot.number_of_failed_prs(),
            failed_pr_numbers: snapshot.failed_pr_numbers.clone(),
        };
        tables.project_snapshots.push(created.clone());
        Ok(created)
    }

    async fn find_latest_project_snapshot(
        &self,
        project: ProjectId,
    ) -> Result<Option<ProjectSnapshot>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .project_snapshots
            .iter()
            .filter(|s| s.project_id == project)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn find_project_snapshots(
        &self,
        project: ProjectId,
        request: PageRequest,
    ) -> Result<Page<ProjectSnapshot>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<ProjectSnapshot> = tables
            .project_snapshots
            .iter()
            .filter(|s| s.project_id == project)
            .cloned()
            .collect();
        newest_first(&mut matching, |s| (s.created_at, s.id));
        Ok(paginate(matching, request))
    }

    async fn create_group_snapshot(
        &self,
        snapshot: &NewGroupSnapshot,
    ) -> Result<GroupSnapshot, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.groups.contains_key(&snapshot.group_id) {
            return Err(RepositoryError::not_found("group", snapshot.group_id));
        }
        let created = GroupSnapshot {
            id: SnapshotId(tables.allocate_id()),
            group_id: snapshot.group_id,
            created_at: snapshot.created_at,
            details: snapshot.details.clone(),
        };
        tables.group_snapshots.push(created.clone());
        Ok(created)
    }

    async fn find_latest_group_snapshot(
        &self,
        group: GroupId,
    ) -> Result<Option<GroupSnapshot>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .group_snapshots
            .iter()
            .filter(|s| s.group_id == group)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn find_group_snapshots(
        &self,
        group: GroupId,
        request: PageRequest,
    ) -> Result<Page<GroupSnapshot>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<GroupSnapshot> = tables
            .group_snapshots
            .iter()
            .filter(|s| s.group_id == group)
            .cloned()
            .collect();
        newest_first(&mut matching, |s| (s.created_at, s.id));
        Ok(paginate(matching, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn new_project(external_id: &str) -> NewProject {
        NewProject {
            external_id: external_id.to_string(),
            name: format!("Project {}", external_id),
            github_repo: format!("org/{}", external_id),
            url: format!("https://example.com/{}", external_id),
        }
    }

    fn upsert(number: u64, checks_passed: bool) -> PullRequestUpsert {
        PullRequestUpsert {
            number,
            title: format!("PR {}", number),
            last_updated: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            checks_passed,
        }
    }

    #[tokio::test]
    async fn test_upsert_project_refreshes_catalog_fields_only() {
        let repo = InMemoryRepository::new();
        let created = repo.upsert_project(&new_project("svc")).await.unwrap();
        repo.update_project_sync(
            created.id,
            &ProjectSyncUpdate {
                last_sync: Utc::now(),
                default_branch_name: "main".to_string(),
                default_branch_status: true,
                open_prs: 4,
                failing_prs: 1,
            },
        )
        .await
        .unwrap();

        let mut renamed = new_project("svc");
        renamed.name = "Renamed".to_string();
        let updated = repo.upsert_project(&renamed).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.open_prs, 4);
        assert_eq!(updated.default_branch_name.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_upsert_pull_request_keeps_created_at() {
        let repo = InMemoryRepository::new();
        let project = repo.upsert_project(&new_project("svc")).await.unwrap();

        let first = repo.upsert_pull_request(project.id, &upsert(1, true)).await.unwrap();
        let second = repo
            .upsert_pull_request(project.id, &upsert(1, false))
            .await
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(!second.checks_passed);
        assert_eq!(repo.find_pull_requests(project.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_pull_request_for_missing_project() {
        let repo = InMemoryRepository::new();
        let err = repo
            .upsert_pull_request(ProjectId(99), &upsert(1, true))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_pull_requests_counts_removed() {
        let repo = InMemoryRepository::new();
        let project = repo.upsert_project(&new_project("svc")).await.unwrap();
        for n in [1, 2, 3] {
            repo.upsert_pull_request(project.id, &upsert(n, true)).await.unwrap();
        }

        let removed = repo
            .delete_pull_requests(project.id, &[1, 3, 42])
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let numbers: Vec<u64> = repo
            .find_pull_requests(project.id)
            .await
            .unwrap()
            .into_iter()
            .map(|pr| pr.number)
            .collect();
        assert_eq!(numbers, vec![2]);
    }

    #[tokio::test]
    async fn test_replace_pull_requests_keeps_created_at() {
        let repo = InMemoryRepository::new();
        let project = repo.upsert_project(&new_project("svc")).await.unwrap();
        let kept = repo.upsert_pull_request(project.id, &upsert(2, true)).await.unwrap();
        repo.upsert_pull_request(project.id, &upsert(1, true)).await.unwrap();

        let deleted = repo
            .replace_pull_requests(project.id, &[1], &[upsert(2, false), upsert(5, true)])
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        let stored = repo.find_pull_requests(project.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].number, 2);
        assert_eq!(stored[0].created_at, kept.created_at);
        assert!(!stored[0].checks_passed);
        assert_eq!(stored[1].number, 5);
    }

    #[tokio::test]
    async fn test_replace_pull_requests_for_missing_project_writes_nothing() {
        let repo = InMemoryRepository::new();
        let err = repo
            .replace_pull_requests(ProjectId(7), &[], &[upsert(1, true)])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(repo.find_pull_requests(ProjectId(7)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_sync_for_missing_project_returns_false() {
        let repo = InMemoryRepository::new();
        let updated = repo
            .update_project_sync(
                ProjectId(5),
                &ProjectSyncUpdate {
                    last_sync: Utc::now(),
                    default_branch_name: "main".to_string(),
                    default_branch_status: true,
                    open_prs: 0,
                    failing_prs: 0,
                },
            )
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_snapshot_pagination_newest_first() {
        let repo = InMemoryRepository::new();
        let project = repo.upsert_project(&new_project("svc")).await.unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for i in 0..5 {
            repo.create_project_snapshot(&NewProjectSnapshot {
                project_id: project.id,
                created_at: base + Duration::hours(i),
                number_of_prs: i as u32,
                failed_pr_numbers: BTreeSet::new(),
            })
            .await
            .unwrap();
        }

        let page = repo
            .find_project_snapshots(project.id, PageRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 2);
        let totals: Vec<u32> = page.items.iter().map(|s| s.number_of_prs).collect();
        assert_eq!(totals, vec![2, 1]);

        let latest = repo
            .find_latest_project_snapshot(project.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.number_of_prs, 4);
    }

    #[tokio::test]
    async fn test_page_past_end_is_empty() {
        let repo = InMemoryRepository::new();
        let group = repo.upsert_group("team", "Team").await.unwrap();
        let page = repo
            .find_group_snapshots(group.id, PageRequest::new(3, 10))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
    }

    #[tokio::test]
    async fn test_group_membership_is_many_to_many() {
        let repo = InMemoryRepository::new();
        let a = repo.upsert_group("a", "A").await.unwrap();
        let b = repo.upsert_group("b", "B").await.unwrap();
        let shared = repo.upsert_project(&new_project("shared")).await.unwrap();

        repo.add_group_member(a.id, shared.id).await.unwrap();
        repo.add_group_member(b.id, shared.id).await.unwrap();
        repo.add_group_member(b.id, shared.id).await.unwrap();

        let groups = repo.list_groups().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.project_ids == vec![shared.id]));
    }

    #[tokio::test]
    async fn test_remove_project_cascades() {
        let repo = InMemoryRepository::new();
        let project = repo.upsert_project(&new_project("svc")).await.unwrap();
        repo.upsert_pull_request(project.id, &upsert(1, true)).await.unwrap();
        repo.create_project_snapshot(&NewProjectSnapshot {
            project_id: project.id,
            created_at: Utc::now(),
            number_of_prs: 1,
            failed_pr_numbers: BTreeSet::new(),
        })
        .await
        .unwrap();

        repo.remove_project(project.id).await;

        assert!(repo.get_project(project.id).await.unwrap().is_none());
        assert!(repo.find_pull_requests(project.id).await.unwrap().is_empty());
        assert!(repo
            .find_latest_project_snapshot(project.id)
            .await
            .unwrap()
            .is_none());
    }
}
