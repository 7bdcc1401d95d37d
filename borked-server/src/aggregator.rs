//! Group rollups built from the member projects' snapshots of one cycle.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use borked_core::{
    GroupMembers, GroupSnapshot, GroupSnapshotDetail, NewGroupSnapshot, Project, ProjectId,
    ProjectSnapshot,
};

use crate::now_millis;
use crate::reconciler::ProjectSyncResult;
use crate::repository::SyncRepository;

pub struct GroupAggregator {
    repository: Arc<dyn SyncRepository>,
}

impl GroupAggregator {
    pub fn new(repository: Arc<dyn SyncRepository>) -> Self {
        Self { repository }
    }

    /// Write a group snapshot if any member created a snapshot during this cycle.
    ///
    /// Members that synced contribute the snapshot their sync returned. Members
    /// that failed or were skipped fall back to their latest stored snapshot,
    /// and are left out if they have none. Details are ordered by project name.
    pub async fn aggregate(
        &self,
        group: &GroupMembers,
        projects: &HashMap<ProjectId, Project>,
        results: &HashMap<ProjectId, ProjectSyncResult>,
    ) -> Result<Option<GroupSnapshot>> {
        // Results only hold this cycle's syncs; the created flag marks a fresh snapshot.
        let any_fresh = group
            .project_ids
            .iter()
            .any(|id| results.get(id).is_some_and(ProjectSyncResult::snapshot_created));
        if !any_fresh {
            debug!(
                "No member of group {} has a new snapshot, skipping rollup",
                group.group.name
            );
            return Ok(None);
        }

        let mut details = Vec::with_capacity(group.project_ids.len());
        for id in &group.project_ids {
            let Some(project) = projects.get(id) else {
                continue;
            };
            let snapshot = match results.get(id) {
                Some(result) => result.snapshot.clone(),
                None => match self
                    .latest_snapshot(*id)
                    .await
                    .with_context(|| format!("Failed to load latest snapshot of {}", project.name))?
                {
                    Some(snapshot) => snapshot,
                    None => {
                        warn!(
                            "Project {} has no snapshot yet, leaving it out of group {}",
                            project.name, group.group.name
                        );
                        continue;
                    }
                },
            };
            details.push(detail(project, &snapshot));
        }
        details.sort_by(|a, b| {
            a.project_name
                .cmp(&b.project_name)
                .then(a.project_id.cmp(&b.project_id))
        });

        let snapshot = self
            .repository
            .create_group_snapshot(&NewGroupSnapshot {
                group_id: group.group.id,
                created_at: now_millis(),
                details,
            })
            .await
            .context("Failed to create group snapshot")?;

        info!(
            "Created snapshot {} for group {} with {} projects",
            snapshot.id,
            group.group.name,
            snapshot.details.len()
        );
        Ok(Some(snapshot))
    }

    async fn latest_snapshot(&self, project: ProjectId) -> Result<Option<ProjectSnapshot>> {
        Ok(self.repository.find_latest_project_snapshot(project).await?)
    }
}

fn detail(project: &Project, snapshot: &ProjectSnapshot) -> GroupSnapshotDetail {
    GroupSnapshotDetail {
        project_id: project.id,
        project_snapshot_id: snapshot.id,
        project_name: project.name.clone(),
        failed_prs: snapshot.number_of_failed_prs,
        total_prs: snapshot.number_of_prs,
    }
}
