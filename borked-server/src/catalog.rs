//! The project catalog: groups and their member repositories, loaded from a
//! JSON file and seeded into the store at startup.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use borked_core::NewProject;

use crate::repository::SyncRepository;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub groups: Vec<CatalogGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub projects: Vec<CatalogProject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProject {
    pub id: String,
    pub project_name: String,
    pub github_repo: String,
    #[serde(default)]
    pub url: String,
}

impl CatalogProject {
    fn to_new_project(&self) -> NewProject {
        NewProject {
            external_id: self.id.clone(),
            name: self.project_name.clone(),
            github_repo: self.github_repo.clone(),
            url: self.url.clone(),
        }
    }
}

/// What seeding touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedSummary {
    pub groups: usize,
    pub projects: usize,
    pub memberships: usize,
}

pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read project catalog {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse project catalog {}", path.display()))
}

/// Create or refresh every group and project in `catalog` and record membership.
///
/// Only catalog fields are written; sync state, PR records and snapshots are
/// left alone.
pub async fn seed_catalog(
    repository: &dyn SyncRepository,
    catalog: &Catalog,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for entry in &catalog.groups {
        let group = repository
            .upsert_group(&entry.id, &entry.name)
            .await
            .with_context(|| format!("Failed to seed group {}", entry.id))?;
        summary.groups += 1;

        for project in &entry.projects {
            let stored = repository
                .upsert_project(&project.to_new_project())
                .await
                .with_context(|| format!("Failed to seed project {}", project.id))?;
            summary.projects += 1;

            repository
                .add_group_member(group.id, stored.id)
                .await
                .with_context(|| {
                    format!("Failed to add project {} to group {}", project.id, entry.id)
                })?;
            summary.memberships += 1;
            debug!("Seeded project {} into group {}", project.id, entry.id);
        }
    }

    info!(
        "Seeded catalog: {} groups, {} project entries, {} memberships",
        summary.groups, summary.projects, summary.memberships
    );
    Ok(summary)
}
