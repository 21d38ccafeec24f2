use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vidqueue::config::Config;
use vidqueue::db::{MemoryRecordStore, PgRecordStore, RecordStore};
use vidqueue::providers::filename::FilenameMetadata;
use vidqueue::providers::groq::GroqMetadata;
use vidqueue::providers::local::LocalAssetStore;
use vidqueue::providers::youtube::YoutubePublisher;
use vidqueue::providers::{AssetStore, MetadataProvider, Providers};
use vidqueue::scheduler::{Scheduler, SystemClock};
use vidqueue::state::AppState;
use vidqueue::worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = Config::from_env().expect("Failed to load configuration");

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    tracing::info!("Starting vidqueue");

    // Record store
    let store: Arc<dyn RecordStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            tracing::info!("Migrations applied");
            Arc::new(PgRecordStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, queue records live in memory only");
            Arc::new(MemoryRecordStore::new())
        }
    };

    // External collaborators
    tokio::fs::create_dir_all(&config.asset_dir).await?;
    let assets: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(config.asset_dir.clone()));

    let metadata: Arc<dyn MetadataProvider> = match config.groq.clone() {
        Some(groq) => Arc::new(GroqMetadata::new(groq)?),
        None => {
            tracing::warn!("GROQ_API_KEY not set, titles will come from filenames");
            Arc::new(FilenameMetadata)
        }
    };

    let youtube = config
        .youtube
        .clone()
        .ok_or("YOUTUBE_ACCESS_TOKEN must be set")?;
    let publisher = Arc::new(YoutubePublisher::new(youtube, assets.clone())?);

    let providers = Providers {
        metadata,
        publisher,
        assets,
    };

    let scheduler = Arc::new(Scheduler::new(
        store,
        providers,
        Arc::new(SystemClock),
        config.schedule.clone(),
    ));

    // Scheduler task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, scheduler_task) = worker::spawn(scheduler.clone(), shutdown_rx);

    let addr = SocketAddr::new(config.host, config.port);
    let state = Arc::new(AppState {
        config,
        scheduler,
        handle,
    });
    let app = vidqueue::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-flight pass finish its current record
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
