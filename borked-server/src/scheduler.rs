//! Periodic reconciliation cycles.
//!
//! A cycle syncs every distinct project that belongs to at least one group,
//! then builds each group's rollup. Cycles never overlap: a cycle that would
//! start while another is running is skipped.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use borked_core::ProjectId;

use crate::aggregator::GroupAggregator;
use crate::config::SyncConfig;
use crate::now_millis;
use crate::reconciler::{ProjectReconciler, SyncOutcome};
use crate::repository::SyncRepository;
use crate::source::SourceClient;

/// Whether a cycle is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Why a cycle did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleSkipReason {
    Disabled,
    SourceUnavailable,
    AlreadyRunning,
}

/// Counts from one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub projects_synced: usize,
    pub projects_skipped: usize,
    pub projects_failed: usize,
    pub project_snapshots_created: usize,
    pub group_snapshots_created: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(CycleSkipReason),
    Completed(CycleReport),
}

/// Scheduler state exposed on `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub source_available: bool,
    pub state: SchedulerState,
    pub interval_secs: u64,
    pub last_report: Option<CycleReport>,
}

pub struct SyncScheduler {
    config: SyncConfig,
    repository: Arc<dyn SyncRepository>,
    source: Option<Arc<dyn SourceClient>>,
    running: AtomicBool,
    last_report: RwLock<Option<CycleReport>>,
}

/// Clears the running flag when a cycle ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncScheduler {
    /// `source` is `None` when no API token is configured.
    pub fn new(
        config: SyncConfig,
        repository: Arc<dyn SyncRepository>,
        source: Option<Arc<dyn SourceClient>>,
    ) -> Self {
        Self {
            config,
            repository,
            source,
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            enabled: self.config.enabled,
            source_available: self.source.is_some(),
            state: self.state(),
            interval_secs: self.config.interval.as_secs(),
            last_report: self.last_report.read().await.clone(),
        }
    }

    fn try_start(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunningGuard(&self.running))
    }

    /// Run one cycle now, unless disabled or already running.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if !self.config.enabled {
            debug!("Sync is disabled, skipping cycle");
            return Ok(CycleOutcome::Skipped(CycleSkipReason::Disabled));
        }
        let Some(source) = self.source.clone() else {
            info!("GitHub is disabled, skipping sync");
            return Ok(CycleOutcome::Skipped(CycleSkipReason::SourceUnavailable));
        };
        let Some(_guard) = self.try_start() else {
            warn!("Previous sync cycle is still running, skipping");
            return Ok(CycleOutcome::Skipped(CycleSkipReason::AlreadyRunning));
        };

        let report = self.cycle(source).await?;
        *self.last_report.write().await = Some(report.clone());
        Ok(CycleOutcome::Completed(report))
    }

    async fn cycle(&self, source: Arc<dyn SourceClient>) -> Result<CycleReport> {
        let started_at = now_millis();
        let reconciler = ProjectReconciler::new(self.repository.clone(), source);
        let aggregator = GroupAggregator::new(self.repository.clone());

        let groups = self
            .repository
            .list_groups()
            .await
            .context("Failed to list groups")?;
        let projects: HashMap<ProjectId, _> = self
            .repository
            .list_projects()
            .await
            .context("Failed to list projects")?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        // A project in several groups is still synced once.
        let member_ids: BTreeSet<ProjectId> = groups
            .iter()
            .flat_map(|g| g.project_ids.iter().copied())
            .collect();

        info!(
            "Starting sync cycle: {} groups, {} projects",
            groups.len(),
            member_ids.len()
        );

        let mut report = CycleReport {
            started_at,
            finished_at: started_at,
            projects_synced: 0,
            projects_skipped: 0,
            projects_failed: 0,
            project_snapshots_created: 0,
            group_snapshots_created: 0,
        };
        let mut results = HashMap::new();

        for id in &member_ids {
            let Some(project) = projects.get(id) else {
                continue;
            };
            match reconciler.sync_project(project).await {
                Ok(SyncOutcome::Synced(result)) => {
                    report.projects_synced += 1;
                    if result.snapshot_created() {
                        report.project_snapshots_created += 1;
                    }
                    results.insert(*id, result);
                }
                Ok(SyncOutcome::Skipped(reason)) => {
                    debug!("Project {} skipped: {:?}", project.name, reason);
                    report.projects_skipped += 1;
                }
                Err(e) => {
                    error!("Failed to sync project {}: {:#}", project.name, e);
                    report.projects_failed += 1;
                }
            }
        }

        for group in &groups {
            match aggregator.aggregate(group, &projects, &results).await {
                Ok(Some(_)) => report.group_snapshots_created += 1,
                Ok(None) => {}
                Err(e) => error!("Failed to aggregate group {}: {:#}", group.group.name, e),
            }
        }

        report.finished_at = now_millis();
        info!(
            "Sync cycle finished: {} synced, {} skipped, {} failed, {} project snapshots, {} group snapshots",
            report.projects_synced,
            report.projects_skipped,
            report.projects_failed,
            report.project_snapshots_created,
            report.group_snapshots_created
        );
        Ok(report)
    }
}

/// Fire a cycle on every tick, forever.
///
/// Each cycle runs in its own task so a slow cycle can't delay the timer;
/// ticks that land on a running cycle are skipped by the guard.
pub async fn sync_loop(scheduler: Arc<SyncScheduler>) {
    let mut ticker = interval(scheduler.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_cycle().await {
                error!("Sync cycle failed: {:#}", e);
            }
        });
    }
}
