//! Earmark ledger service entry point.
//!
//! Opens the SQLite ledger and the proof blob area, optionally starts the
//! delayed automatic reviewer, and serves the REST API until Ctrl+C or
//! SIGTERM.

mod api;
mod blobs;
mod config;
mod db;
mod errors;
mod export;
mod locks;
mod records;
mod reviewer;
mod service;
mod summary;

#[cfg(test)]
mod test_api;
#[cfg(test)]
mod test_service;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blobs::BlobStore;
use config::Config;
use reviewer::Reviewer;
use service::LedgerService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pools = db::init_pool(&config.database_url).await?;
    let blobs = BlobStore::open(&config.blob_dir).await?;
    let service = LedgerService::new(pools, blobs, config.admin_fee_rate);
    info!("Admin fee rate {}", service.fee_rate());

    if config.seed_demo {
        service.seed_demo_if_empty().await?;
    }

    let shutdown = CancellationToken::new();

    // ─── Automatic review ─────────────────────────────────
    let reviewer = config.review_delay.map(|delay| {
        info!("Automatic review enabled, delay {delay:?}");
        Reviewer::new(service.clone(), delay, shutdown.clone())
    });

    // ─── Release notices ──────────────────────────────────
    let mut notices = service.subscribe();
    let notice_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = notice_shutdown.cancelled() => break,
                notice = notices.recv() => match notice {
                    Ok(n) => info!(
                        "NOTICE: {} received {} (seq {})",
                        n.beneficiary_name, n.amount_released, n.seq
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Release notice listener lagged, {skipped} notices skipped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState { service, reviewer }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    info!("Ledger service stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM and cancel `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
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
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
