use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod models;
mod services;
mod utils;

#[cfg(test)]
mod testing;

use config::{ConfigStore, Settings};
use services::backup_service::{BackupService, BackupStore};
use services::job_lock::JobLock;
use services::restore::RestoreOrchestrator;
use services::scheduler::{Clock, Scheduler, SystemClock};
use services::server_api::ServerApi;
use services::status_poller::{StatusHandle, StatusPoller};
use services::transfer::ftp::FtpConnector;
use services::transfer::{RemoteConnector, TransferEngine};

/// Handles to every component, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigStore,
    pub server: ServerApi,
    pub status: StatusHandle,
    pub jobs: JobLock,
    pub transfers: Arc<TransferEngine>,
    pub backups: Arc<BackupStore>,
    pub backup_service: Arc<BackupService>,
    pub scheduler: Arc<Scheduler>,
    pub restorer: Arc<RestoreOrchestrator>,
}

impl AppState {
    /// The poller comes back separately; whoever owns it decides where it runs.
    pub fn assemble(
        config: ConfigStore,
        connector: Arc<dyn RemoteConnector>,
        clock: Arc<dyn Clock>,
    ) -> (Self, StatusPoller) {
        let current = config.snapshot();
        let server = ServerApi::new(&current.hosting);
        let (poller, status) = StatusPoller::new(server.clone(), current.poll_interval());

        let jobs = JobLock::new();
        let transfers = Arc::new(TransferEngine::new(connector));
        let backups = Arc::new(BackupStore::new(current.backups_dir.clone()));
        let backup_service = Arc::new(BackupService::new(
            transfers.clone(),
            backups.clone(),
            jobs.clone(),
            config.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            backup_service.clone(),
            jobs.clone(),
            clock,
        ));
        let restorer = Arc::new(RestoreOrchestrator::new(
            transfers.clone(),
            backups.clone(),
            jobs.clone(),
            server.clone(),
            status.clone(),
            config.clone(),
        ));

        let state = Self {
            config,
            server,
            status,
            jobs,
            transfers,
            backups,
            backup_service,
            scheduler,
            restorer,
        };
        (state, poller)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();

    info!("🚀 Savewarden v{}", env!("CARGO_PKG_VERSION"));

    let config = match ConfigStore::open_or_create(&settings.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Couldn't load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "⚙️  Loaded {} config properties from {}",
        config.property_count(),
        config.path().display()
    );
    let current = config.snapshot();
    for line in current.redacted_summary() {
        info!("   {}", line);
    }

    std::fs::create_dir_all(&current.backups_dir).with_context(|| {
        format!(
            "couldn't create backup directory {}",
            current.backups_dir.display()
        )
    })?;

    let connector: Arc<dyn RemoteConnector> = Arc::new(FtpConnector::new(&current.ftp));
    let (state, poller) = AppState::assemble(config, connector, Arc::new(SystemClock));

    let failures = state
        .backups
        .rescan()
        .context("couldn't read backup directory")?;
    for (id, e) in &failures {
        warn!("Skipping backup {}: {}", id, e);
    }
    info!("💾 Loaded {} backups", state.backups.list().len());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_task = poller.spawn(shutdown_rx);

    if current.auto_backup {
        state.scheduler.start();
    }

    let addr = format!("{}:{}", settings.host, settings.port);
    info!("📡 Starting control API on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("couldn't bind {}", addr))?;

    let scheduler = state.scheduler.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Couldn't listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("🛑 Shutting down");
        })
        .await
        .context("control API failed")?;

    scheduler.stop();
    let _ = shutdown_tx.send(true);
    let _ = poller_task.await;
    Ok(())
}
