//! One project's sync: diff live PRs against stored records, refresh the
//! cached aggregates, and append a snapshot when the aggregate changed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use borked_core::{
    snapshot_trigger, NewProjectSnapshot, Project, ProjectId, ProjectSnapshot, ProjectSyncUpdate,
    PullRequestStatus, PullRequestUpsert, RepoRef, SnapshotCandidate, SnapshotTrigger,
};

use crate::now_millis;
use crate::repository::{RepositoryError, SyncRepository};
use crate::source::SourceClient;

/// What a successful project sync produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSyncResult {
    pub project_id: ProjectId,
    pub project_name: String,
    pub open_prs: u32,
    pub failing_prs: u32,
    pub removed_prs: usize,
    /// The project's current snapshot: new if `trigger` is set, otherwise the reused latest one.
    pub snapshot: ProjectSnapshot,
    pub trigger: Option<SnapshotTrigger>,
}

impl ProjectSyncResult {
    pub fn snapshot_created(&self) -> bool {
        self.trigger.is_some()
    }
}

/// Why a project was left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The configured repository reference isn't `owner/repo`.
    InvalidRepoRef(String),
    /// The project was deleted while its sync was running.
    ProjectRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(ProjectSyncResult),
    Skipped(SkipReason),
}

/// Reconciles stored PR state for a project with the live source.
pub struct ProjectReconciler {
    repository: Arc<dyn SyncRepository>,
    source: Arc<dyn SourceClient>,
}

/// Upsert failures for a vanished project end the sync quietly; anything else is an error.
enum WriteFailure {
    ProjectRemoved,
    Storage(RepositoryError),
}

impl From<RepositoryError> for WriteFailure {
    fn from(e: RepositoryError) -> Self {
        if e.is_not_found() {
            WriteFailure::ProjectRemoved
        } else {
            WriteFailure::Storage(e)
        }
    }
}

impl ProjectReconciler {
    pub fn new(repository: Arc<dyn SyncRepository>, source: Arc<dyn SourceClient>) -> Self {
        Self { repository, source }
    }

    /// Run one sync of `project`.
    ///
    /// Source failures return an error before anything is written, so stored
    /// state stays as of the last successful sync.
    pub async fn sync_project(&self, project: &Project) -> Result<SyncOutcome> {
        let repo = match RepoRef::parse(&project.github_repo) {
            Ok(repo) => repo,
            Err(e) => {
                warn!("Skipping project {}: {}", project.name, e);
                return Ok(SyncOutcome::Skipped(SkipReason::InvalidRepoRef(
                    project.github_repo.clone(),
                )));
            }
        };

        info!("Syncing project {} ({})", project.name, repo);

        let existing = self
            .repository
            .find_pull_requests(project.id)
            .await
            .context("Failed to load stored pull requests")?;
        let stored_checks: HashMap<u64, bool> = existing
            .iter()
            .map(|record| (record.number, record.checks_passed))
            .collect();

        let info = self
            .source
            .fetch_repository_info(&repo)
            .await
            .with_context(|| format!("Failed to fetch repository info for {}", repo))?;
        let branch = self
            .source
            .fetch_default_branch_status(&repo)
            .await
            .with_context(|| format!("Failed to fetch default branch status for {}", repo))?;
        let live_prs = self
            .source
            .fetch_open_pull_requests(&repo)
            .await
            .with_context(|| format!("Failed to fetch open pull requests for {}", repo))?;

        // Keyed by number so a PR listed twice across pages counts once.
        let live: BTreeMap<u64, &PullRequestStatus> =
            live_prs.iter().map(|pr| (pr.number, pr)).collect();
        let fresh_failing: BTreeSet<u64> = live
            .values()
            .filter(|pr| pr.is_fresh_failure())
            .map(|pr| pr.number)
            .collect();

        let removed: Vec<u64> = existing
            .iter()
            .map(|record| record.number)
            .filter(|number| !live.contains_key(number))
            .collect();

        match self.write_pull_requests(project.id, &removed, &live, &stored_checks).await {
            Ok(()) => {}
            Err(WriteFailure::ProjectRemoved) => return Ok(self.removed_mid_sync(project)),
            Err(WriteFailure::Storage(e)) => {
                return Err(e).context("Failed to write pull request records")
            }
        }

        // Live PRs without fresh check data keep their stored verdict.
        let stale_failing: BTreeSet<u64> = self
            .repository
            .find_pull_requests(project.id)
            .await
            .context("Failed to reload pull requests")?
            .into_iter()
            .filter(|record| {
                live.get(&record.number).is_some_and(|pr| !pr.updated) && !record.checks_passed
            })
            .map(|record| record.number)
            .collect();

        debug_assert!(fresh_failing.is_disjoint(&stale_failing));
        let failing: BTreeSet<u64> = fresh_failing.union(&stale_failing).copied().collect();

        let open_prs = count(live.len());
        let failing_prs = count(failing.len());
        let now = now_millis();

        let updated = self
            .repository
            .update_project_sync(
                project.id,
                &ProjectSyncUpdate {
                    last_sync: now,
                    default_branch_name: info.default_branch.clone(),
                    default_branch_status: branch.all_checks_passed,
                    open_prs,
                    failing_prs,
                },
            )
            .await
            .context("Failed to update project")?;
        if !updated {
            return Ok(self.removed_mid_sync(project));
        }

        let previous = self
            .repository
            .find_latest_project_snapshot(project.id)
            .await
            .context("Failed to load latest snapshot")?;
        let candidate = SnapshotCandidate {
            total_prs: open_prs,
            failed_numbers: failing,
        };
        let trigger = snapshot_trigger(previous.as_ref(), &candidate, now);

        let (snapshot, trigger) = match (trigger, previous) {
            (None, Some(previous)) => {
                debug!(
                    "Snapshot {} of {} is still current",
                    previous.id, project.name
                );
                (previous, None)
            }
            (trigger, _) => {
                let trigger = trigger.unwrap_or(SnapshotTrigger::NoPrevious);
                let created = self
                    .repository
                    .create_project_snapshot(&NewProjectSnapshot {
                        project_id: project.id,
                        created_at: now,
                        number_of_prs: candidate.total_prs,
                        failed_pr_numbers: candidate.failed_numbers,
                    })
                    .await;
                match created {
                    Ok(snapshot) => {
                        info!(
                            "Created snapshot {} for {}: {}",
                            snapshot.id,
                            project.name,
                            trigger.as_str()
                        );
                        (snapshot, Some(trigger))
                    }
                    Err(e) if e.is_not_found() => return Ok(self.removed_mid_sync(project)),
                    Err(e) => return Err(e).context("Failed to create snapshot"),
                }
            }
        };

        info!(
            "Synced {}: {} open, {} failing, {} removed",
            project.name,
            open_prs,
            failing_prs,
            removed.len()
        );

        Ok(SyncOutcome::Synced(ProjectSyncResult {
            project_id: project.id,
            project_name: project.name.clone(),
            open_prs,
            failing_prs,
            removed_prs: removed.len(),
            snapshot,
            trigger,
        }))
    }

    /// Delete closed PRs and upsert every live one in a single atomic write.
    async fn write_pull_requests(
        &self,
        project: ProjectId,
        removed: &[u64],
        live: &BTreeMap<u64, &PullRequestStatus>,
        stored_checks: &HashMap<u64, bool>,
    ) -> Result<(), WriteFailure> {
        let upserts: Vec<PullRequestUpsert> = live
            .values()
            .map(|pr| {
                let checks_passed = if pr.updated {
                    pr.all_checks_passed
                } else {
                    stored_checks
                        .get(&pr.number)
                        .copied()
                        .unwrap_or(pr.all_checks_passed)
                };
                PullRequestUpsert {
                    number: pr.number,
                    title: pr.title.clone(),
                    last_updated: pr.last_updated,
                    checks_passed,
                }
            })
            .collect();

        let deleted = self
            .repository
            .replace_pull_requests(project, removed, &upserts)
            .await?;
        debug!("Removed {} closed pull requests", deleted);
        Ok(())
    }

    fn removed_mid_sync(&self, project: &Project) -> SyncOutcome {
        warn!(
            "Project {} was removed during sync, discarding results",
            project.name
        );
        SyncOutcome::Skipped(SkipReason::ProjectRemoved)
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::test_support::{catalog_project, live_pr, FakeRepo, FakeSource};
    use chrono::{Duration, Utc};

    struct Harness {
        repository: Arc<InMemoryRepository>,
        source: Arc<FakeSource>,
        reconciler: ProjectReconciler,
    }

    impl Harness {
        fn new() -> Self {
            let repository = Arc::new(InMemoryRepository::new());
            let source = Arc::new(FakeSource::new());
            let reconciler = ProjectReconciler::new(repository.clone(), source.clone());
            Self {
                repository,
                source,
                reconciler,
            }
        }

        async fn project(&self, github_repo: &str) -> Project {
            self.repository
                .upsert_project(&catalog_project("p", github_repo))
                .await
                .unwrap()
        }

        async fn refreshed(&self, project: &Project) -> Project {
            self.repository
                .get_project(project.id)
                .await
                .unwrap()
                .unwrap()
        }

        async fn stored_checks(&self, project: &Project) -> Vec<(u64, bool)> {
            self.repository
                .find_pull_requests(project.id)
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.number, r.checks_passed))
                .collect()
        }

        async fn snapshot_count(&self, project: &Project) -> u64 {
            self.repository
                .find_project_snapshots(project.id, Default::default())
                .await
                .unwrap()
                .total
        }

        async fn sync(&self, project: &Project) -> ProjectSyncResult {
            match self.reconciler.sync_project(project).await.unwrap() {
                SyncOutcome::Synced(result) => result,
                other => panic!("expected a sync, got {:?}", other),
            }
        }
    }

    async fn seed_record(repo: &InMemoryRepository, project: ProjectId, number: u64, passed: bool) {
        repo.upsert_pull_request(
            project,
            &PullRequestUpsert {
                number,
                title: format!("old #{}", number),
                last_updated: Utc::now() - Duration::days(1),
                checks_passed: passed,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_first_sync_creates_records_and_snapshot() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        h.source.set_repo(
            "org/svc",
            FakeRepo::with_prs(vec![live_pr(1, true, true), live_pr(2, true, false)]),
        );

        let result = h.sync(&project).await;

        assert_eq!(result.open_prs, 2);
        assert_eq!(result.failing_prs, 1);
        assert_eq!(result.trigger, Some(SnapshotTrigger::NoPrevious));
        assert_eq!(result.snapshot.failed_pr_numbers, BTreeSet::from([2]));
        assert_eq!(h.stored_checks(&project).await, vec![(1, true), (2, false)]);

        let stored = h.refreshed(&project).await;
        assert_eq!(stored.open_prs, 2);
        assert_eq!(stored.failing_prs, 1);
        assert_eq!(stored.default_branch_name.as_deref(), Some("main"));
        assert_eq!(stored.default_branch_status, Some(true));
        assert!(stored.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_closed_pr_removed_and_failing_set_replaced() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        seed_record(&h.repository, project.id, 10, false).await;
        seed_record(&h.repository, project.id, 11, true).await;
        h.repository
            .create_project_snapshot(&NewProjectSnapshot {
                project_id: project.id,
                created_at: Utc::now() - Duration::hours(1),
                number_of_prs: 2,
                failed_pr_numbers: BTreeSet::from([10]),
            })
            .await
            .unwrap();
        h.source.set_repo(
            "org/svc",
            FakeRepo::with_prs(vec![live_pr(10, true, true), live_pr(12, true, false)]),
        );

        let result = h.sync(&project).await;

        assert_eq!(h.stored_checks(&project).await, vec![(10, true), (12, false)]);
        assert_eq!(result.removed_prs, 1);
        assert_eq!(result.open_prs, 2);
        assert_eq!(result.failing_prs, 1);
        assert_eq!(result.trigger, Some(SnapshotTrigger::FailedSetChanged));
        assert_eq!(result.snapshot.number_of_prs, 2);
        assert_eq!(result.snapshot.failed_pr_numbers, BTreeSet::from([12]));
        assert_eq!(h.snapshot_count(&project).await, 2);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_renewed_with_identical_values() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        seed_record(&h.repository, project.id, 5, false).await;
        let old = h
            .repository
            .create_project_snapshot(&NewProjectSnapshot {
                project_id: project.id,
                created_at: Utc::now() - Duration::hours(25),
                number_of_prs: 1,
                failed_pr_numbers: BTreeSet::from([5]),
            })
            .await
            .unwrap();
        h.source
            .set_repo("org/svc", FakeRepo::with_prs(vec![live_pr(5, true, false)]));

        let result = h.sync(&project).await;

        assert_eq!(result.trigger, Some(SnapshotTrigger::Stale));
        assert_ne!(result.snapshot.id, old.id);
        assert_eq!(result.snapshot.number_of_prs, old.number_of_prs);
        assert_eq!(result.snapshot.failed_pr_numbers, old.failed_pr_numbers);
    }

    #[tokio::test]
    async fn test_second_identical_sync_is_idempotent() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        h.source.set_repo(
            "org/svc",
            FakeRepo::with_prs(vec![live_pr(3, true, false), live_pr(4, true, true)]),
        );

        let first = h.sync(&project).await;
        let records_after_first = h.repository.find_pull_requests(project.id).await.unwrap();

        let second = h.sync(&project).await;
        let records_after_second = h.repository.find_pull_requests(project.id).await.unwrap();

        assert!(first.snapshot_created());
        assert!(!second.snapshot_created());
        assert_eq!(second.snapshot.id, first.snapshot.id);
        assert_eq!(records_after_first, records_after_second);
        assert_eq!(h.snapshot_count(&project).await, 1);
    }

    #[tokio::test]
    async fn test_unrefreshed_pr_keeps_stored_verdict() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        seed_record(&h.repository, project.id, 7, false).await;
        seed_record(&h.repository, project.id, 8, true).await;
        // The source has no check data for either PR this time; its flags carry no signal.
        h.source.set_repo(
            "org/svc",
            FakeRepo::with_prs(vec![
                live_pr(7, false, true),
                live_pr(8, false, false),
                live_pr(9, true, false),
            ]),
        );

        let result = h.sync(&project).await;

        assert_eq!(
            h.stored_checks(&project).await,
            vec![(7, false), (8, true), (9, false)]
        );
        assert_eq!(result.failing_prs, 2);
        assert_eq!(result.snapshot.failed_pr_numbers, BTreeSet::from([7, 9]));

        let records = h.repository.find_pull_requests(project.id).await.unwrap();
        let seven = records.iter().find(|r| r.number == 7).unwrap();
        assert_eq!(seven.title, "PR #7");
    }

    #[tokio::test]
    async fn test_duplicate_live_pr_counted_once() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        h.source.set_repo(
            "org/svc",
            FakeRepo::with_prs(vec![live_pr(1, true, false), live_pr(1, true, false)]),
        );

        let result = h.sync(&project).await;
        assert_eq!(result.open_prs, 1);
        assert_eq!(result.failing_prs, 1);
    }

    #[tokio::test]
    async fn test_invalid_repo_ref_is_skipped_without_writes() {
        let h = Harness::new();
        let project = h.project("not-a-repo").await;

        let outcome = h.reconciler.sync_project(&project).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Skipped(SkipReason::InvalidRepoRef("not-a-repo".to_string()))
        );
        assert_eq!(h.source.pull_request_calls(), 0);
        assert!(h.refreshed(&project).await.last_sync.is_none());
        assert_eq!(h.snapshot_count(&project).await, 0);
    }

    #[tokio::test]
    async fn test_repo_ref_with_extra_segments_syncs_owner_and_name() {
        let h = Harness::new();
        let project = h.project("org/svc/tree/main").await;
        h.source
            .set_repo("org/svc", FakeRepo::with_prs(vec![live_pr(4, true, false)]));

        let result = h.sync(&project).await;

        assert_eq!(result.open_prs, 1);
        assert_eq!(result.failing_prs, 1);
        assert_eq!(h.stored_checks(&project).await, vec![(4, false)]);
    }

    #[tokio::test]
    async fn test_source_failure_leaves_state_unchanged() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        seed_record(&h.repository, project.id, 1, false).await;
        h.source
            .set_repo("org/svc", FakeRepo::with_prs(vec![live_pr(2, true, true)]));
        h.source.set_unavailable("org/svc", true);

        let err = h.reconciler.sync_project(&project).await.unwrap_err();

        assert!(format!("{:#}", err).contains("503"));
        assert_eq!(h.stored_checks(&project).await, vec![(1, false)]);
        assert!(h.refreshed(&project).await.last_sync.is_none());
        assert_eq!(h.snapshot_count(&project).await, 0);
    }

    #[tokio::test]
    async fn test_project_removed_before_writes_is_skipped() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        h.source
            .set_repo("org/svc", FakeRepo::with_prs(vec![live_pr(1, true, true)]));
        h.repository.remove_project(project.id).await;

        let outcome = h.reconciler.sync_project(&project).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::ProjectRemoved));
    }

    #[tokio::test]
    async fn test_no_open_prs_clears_records() {
        let h = Harness::new();
        let project = h.project("org/svc").await;
        seed_record(&h.repository, project.id, 1, false).await;
        seed_record(&h.repository, project.id, 2, true).await;
        h.source.set_repo("org/svc", FakeRepo::with_prs(vec![]));

        let result = h.sync(&project).await;

        assert!(h.stored_checks(&project).await.is_empty());
        assert_eq!(result.removed_prs, 2);
        assert_eq!(result.open_prs, 0);
        assert_eq!(result.failing_prs, 0);
        assert_eq!(result.snapshot.number_of_prs, 0);
    }
}
