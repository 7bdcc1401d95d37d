use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};

use borked_server::api::api_router;
use borked_server::catalog::{load_catalog, seed_catalog};
use borked_server::config::Config;
use borked_server::scheduler::sync_loop;
use borked_server::{
    AppState, GitHubClient, SourceClient, SqliteRepository, SyncRepository, SyncScheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting borked {}", borked_server::get_version());

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let db_path = config.database_path();
    info!("Using state database: {}", db_path.display());
    let repository: Arc<dyn SyncRepository> =
        Arc::new(SqliteRepository::new(&db_path).expect("Failed to initialize SQLite database"));

    if config.project_config_path.exists() {
        let catalog = load_catalog(&config.project_config_path)?;
        seed_catalog(repository.as_ref(), &catalog).await?;
    } else {
        warn!(
            "Project catalog {} not found, using stored catalog",
            config.project_config_path.display()
        );
    }

    let source: Option<Arc<dyn SourceClient>> = match GitHubClient::from_config(&config.github) {
        Ok(Some(client)) => Some(Arc::new(client)),
        Ok(None) => {
            warn!("GITHUB_TOKEN not set, sync cycles will be skipped");
            None
        }
        Err(e) => {
            error!("Failed to create GitHub client: {:#}", e);
            None
        }
    };

    if !config.sync.enabled {
        info!("Sync is disabled (set GITHUB_SYNC_ENABLED=true to enable)");
    }

    let scheduler = Arc::new(SyncScheduler::new(config.sync, repository.clone(), source));

    let app_state = Arc::new(AppState {
        repository,
        scheduler: scheduler.clone(),
    });

    let app = api_router()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    tokio::spawn(async move {
        sync_loop(scheduler).await;
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
