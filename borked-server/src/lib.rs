pub mod aggregator;
pub mod api;
pub mod catalog;
pub mod config;
pub mod github;
pub mod http_log;
pub mod reconciler;
pub mod repository;
pub mod scheduler;
pub mod source;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

pub use github::GitHubClient;
pub use repository::{InMemoryRepository, RepositoryError, SqliteRepository, SyncRepository};
pub use scheduler::SyncScheduler;
pub use source::SourceClient;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

/// Short git revision of this build, or "unknown".
pub fn get_version() -> String {
    if let Some(git_hash) = option_env!("BORKED_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        "unknown".to_string()
    }
}

/// The current time at millisecond precision, which is what the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub struct AppState {
    pub repository: Arc<dyn SyncRepository>,
    pub scheduler: Arc<SyncScheduler>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn test_now_millis_has_no_sub_millisecond_part() {
        assert_eq!(now_millis().timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
