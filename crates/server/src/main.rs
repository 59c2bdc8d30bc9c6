mod bootstrap;
mod health;
mod ingress;
mod services;
mod tokens;
mod worker;

use std::time::Duration;

use anyhow::Result;
use prsync_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use prsync_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = app.worker();
    let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let router = ingress::router(app.ingress_state()).merge(health::router(app.db_pool.clone()));
    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "prsync-server listening"
    );

    let mut http_shutdown = shutdown_tx.subscribe();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = http_shutdown.changed().await;
    });
    let server_task = tokio::spawn(async move { server.await });

    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "shutdown signal received");
    shutdown_tx.send_replace(true);

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        let _ = worker_task.await;
        let _ = server_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            grace_secs = grace.as_secs(),
            "in-flight work did not finish in time; unsettled jobs will be redelivered"
        );
    }

    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", "prsync-server stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
