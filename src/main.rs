use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corpsync_backend::config::AppConfig;
use corpsync_backend::handlers;
use corpsync_backend::jobs::sync_scheduler_job::start_sync_scheduler_job;
use corpsync_backend::models::setup::SetupStatusUpdate;
use corpsync_backend::services::{
    data_access::DataAccessLayer,
    error_log::ErrorLog,
    esi_client::EsiClient,
    executor::SyncExecutor,
    retry_policy::RetryPolicy,
    scheduler::{default_processes, SyncScheduler},
    setup_marker::SetupMarker,
    storage::{DbStorage, MemoryStorage, SyncStorage},
    sync_state::SyncStateStore,
    token_store::{SsoTokenRefresher, TokenStore},
};
use corpsync_backend::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,corpsync_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let (storage, database_connected) = connect_storage(config.database_url.as_deref()).await;

    // Tokens
    let refresher = SsoTokenRefresher::new(
        &config.sso_token_url,
        config.client_id.as_deref().unwrap_or_default(),
        config.client_secret.as_deref().unwrap_or_default(),
    )?;
    let token_store = TokenStore::new(Arc::new(refresher));
    for token in config.tenant_tokens.iter().cloned() {
        token_store.insert(token);
    }

    // Engine
    let error_log = Arc::new(ErrorLog::new(config.error_log_capacity));
    let sync_state = SyncStateStore::new(config.run_history_limit);
    let client = EsiClient::new(&config.esi_base_url, &config.user_agent, RetryPolicy::default())?;
    let executor = Arc::new(SyncExecutor::new(
        client,
        token_store.clone(),
        storage.clone(),
        error_log.clone(),
    ));
    let scheduler = SyncScheduler::new(executor, sync_state.clone(), config.tick_interval);
    for descriptor in default_processes() {
        scheduler.register(config.apply_overrides(descriptor)).await;
    }

    // Read path. A setup status that cannot be read must not reset to the
    // unconfigured default, so this fails the boot instead.
    let marker = SetupMarker::new(&config.setup_marker_file);
    let data_access = DataAccessLayer::load(storage.clone(), Some(marker))
        .await
        .map_err(|e| {
            tracing::error!("Failed to load setup status: {}", e);
            e
        })?;
    let update = SetupStatusUpdate {
        database_connected: Some(database_connected),
        external_auth_configured: Some(config.external_auth_configured()),
    };
    if let Err(e) = data_access.update_setup_status(update).await {
        tracing::warn!("Failed to persist setup status: {}", e);
    }

    // Background scheduler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_job = start_sync_scheduler_job(scheduler.clone(), shutdown_rx);

    let state = AppState {
        scheduler,
        data_access: Arc::new(data_access),
        error_log,
        sync_state,
        token_store,
    };
    let app = handlers::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining sync runs");
    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler_job.await {
        tracing::error!("Scheduler task failed: {}", e);
    }

    Ok(())
}

/// Connect and migrate when a database is configured; otherwise, or if that
/// fails, keep everything in memory.
async fn connect_storage(database_url: Option<&str>) -> (Arc<dyn SyncStorage>, bool) {
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory storage");
        return (Arc::new(MemoryStorage::new()), false);
    };

    tracing::info!("Connecting to database...");
    let db = match Database::connect(url).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to connect to database, using in-memory storage: {}", e);
            return (Arc::new(MemoryStorage::new()), false);
        }
    };

    // Run migrations
    tracing::info!("Running migrations...");
    if let Err(e) = migration::Migrator::up(&db, None).await {
        tracing::error!("Failed to run migrations, using in-memory storage: {}", e);
        return (Arc::new(MemoryStorage::new()), false);
    }

    (Arc::new(DbStorage::new(db)), true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
