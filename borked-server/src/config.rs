use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default GitHub REST API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Default interval between reconciliation cycles.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Credentials and endpoint for the GitHub API.
#[derive(Clone)]
pub struct GitHubConfig {
    /// API token. `None` means the source is unavailable and cycles are skipped.
    pub api_token: Option<String>,
    pub api_base_url: String,
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub github: GitHubConfig,
    pub sync: SyncConfig,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Project catalog file seeded into the database on startup.
    pub project_config_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_token = parse_api_token(env::var("GITHUB_TOKEN").ok());

        let api_base_url = parse_api_base_url(env::var("GITHUB_API_URL").ok());

        let enabled = parse_enabled_flag(env::var("GITHUB_SYNC_ENABLED").ok().as_deref());

        let interval_secs = env::var("SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_SYNC_INTERVAL_SECS.to_string())
            .parse::<u64>()
            .context("SYNC_INTERVAL_SECS must be a valid number")?;
        if interval_secs == 0 {
            bail!("SYNC_INTERVAL_SECS must be greater than zero");
        }

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let project_config_path = env::var("PROJECT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/projectConfig.json"));

        Ok(Config {
            github: GitHubConfig {
                api_token,
                api_base_url,
            },
            sync: SyncConfig {
                enabled,
                interval: Duration::from_secs(interval_secs),
            },
            port,
            state_dir,
            project_config_path,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("borked-state.db")
    }
}

/// Parse GITHUB_TOKEN, treating empty or whitespace-only values as unset.
pub fn parse_api_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse GITHUB_API_URL, falling back to the public API and dropping trailing slashes.
pub fn parse_api_base_url(value: Option<String>) -> String {
    value
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

/// Parse GITHUB_SYNC_ENABLED. Anything other than an explicit truthy value is false.
pub fn parse_enabled_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true") | Some("1") | Some("yes") | Some("on")
    )
}
