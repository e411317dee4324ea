//! Prodsync collector - Main entry point

use anyhow::{Context, Result};
use prodsync_common::logging::{init_logging, LogConfig};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use prodsync_server::{
    config::Config,
    db::{self, PgStore},
    ingest::{LocalFs, Scheduler},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("prodsync")
        .filter_directives("prodsync_server=debug,sqlx=warn")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting prodsync collector");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        lines = config.monitor.lines.len(),
        base_folder = %config.monitor.base_folder,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    let store = PgStore::new(pool.clone(), config.monitor.loss_time_table.clone());
    let scheduler = Scheduler::new(config.monitor, Arc::new(store), Arc::new(LocalFs::new()));

    let token = CancellationToken::new();
    let handle = scheduler.start(token.clone());

    shutdown_signal().await;
    token.cancel();

    if let Err(e) = handle.await {
        tracing::error!("Scheduler task ended abnormally: {}", e);
    }

    pool.close().await;
    info!("Collector shut down gracefully");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
