use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

use borked_core::{PageRequest, DEFAULT_PAGE_LIMIT};
use borked_server::catalog::{load_catalog, seed_catalog};
use borked_server::config::{parse_api_base_url, parse_api_token, GitHubConfig, SyncConfig};
use borked_server::scheduler::{CycleOutcome, SyncScheduler};
use borked_server::{
    GitHubClient, InMemoryRepository, SourceClient, SqliteRepository, SyncRepository,
};

/// borked: mirror open pull requests and their CI state
#[derive(Parser, Debug)]
#[command(name = "borked")]
#[command(about = "Mirror open pull requests and their CI state", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
struct StoreArgs {
    /// Directory holding borked-state.db
    #[arg(long, global = true, env = "STATE_DIR", default_value = ".")]
    state_dir: PathBuf,

    /// Use a throwaway in-memory store instead of the state database (ignores --state-dir)
    #[arg(long, global = true)]
    in_memory: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation cycle now and print its report
    Sync(SyncArgs),
    /// Print snapshot history
    #[command(subcommand)]
    History(HistoryCommand),
}

#[derive(Parser, Debug)]
struct SyncArgs {
    /// GitHub API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL")]
    api_url: Option<String>,

    /// Project catalog to seed before syncing
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// Snapshots of one project
    Project(HistoryArgs),
    /// Rollup snapshots of one group
    Group(HistoryArgs),
}

#[derive(Parser, Debug)]
struct HistoryArgs {
    /// External id from the project catalog
    id: String,

    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Snapshots per page
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: u32,
}

fn open_store(args: &StoreArgs) -> Result<Arc<dyn SyncRepository>> {
    if args.in_memory {
        return Ok(Arc::new(InMemoryRepository::new()));
    }
    let path = args.state_dir.join("borked-state.db");
    let repo = SqliteRepository::new(&path)
        .with_context(|| format!("Failed to open state database {}", path.display()))?;
    Ok(Arc::new(repo))
}

async fn run_sync(repository: Arc<dyn SyncRepository>, args: SyncArgs) -> Result<()> {
    if let Some(path) = &args.catalog {
        let catalog = load_catalog(path)?;
        seed_catalog(repository.as_ref(), &catalog).await?;
    }

    let github = GitHubConfig {
        api_token: parse_api_token(args.token),
        api_base_url: parse_api_base_url(args.api_url),
    };
    let client = GitHubClient::from_config(&github)?
        .ok_or_else(|| anyhow!("GitHub token not provided (use --token or GITHUB_TOKEN)"))?;
    let source: Arc<dyn SourceClient> = Arc::new(client);

    let scheduler = SyncScheduler::new(
        SyncConfig {
            enabled: true,
            interval: Duration::from_secs(1),
        },
        repository,
        Some(source),
    );

    match scheduler.run_cycle().await? {
        CycleOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        CycleOutcome::Skipped(reason) => Err(anyhow!("Cycle skipped: {:?}", reason)),
    }
}

async fn run_history(repository: Arc<dyn SyncRepository>, command: HistoryCommand) -> Result<()> {
    let rendered = match command {
        HistoryCommand::Project(args) => {
            let project = repository
                .find_project_by_external_id(&args.id)
                .await?
                .ok_or_else(|| anyhow!("No project with id '{}'", args.id))?;
            let page = repository
                .find_project_snapshots(project.id, PageRequest::new(args.page, args.limit))
                .await?;
            serde_json::to_string_pretty(&page)?
        }
        HistoryCommand::Group(args) => {
            let group = repository
                .find_group_by_external_id(&args.id)
                .await?
                .ok_or_else(|| anyhow!("No group with id '{}'", args.id))?;
            let page = repository
                .find_group_snapshots(group.id, PageRequest::new(args.page, args.limit))
                .await?;
            serde_json::to_string_pretty(&page)?
        }
    };
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repository = open_store(&cli.store)?;

    match cli.command {
        Commands::Sync(args) => run_sync(repository, args).await,
        Commands::History(command) => run_history(repository, command).await,
    }
}
