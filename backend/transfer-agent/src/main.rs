//! Transfer agent — entry point.
//!
//! Opens the local account store, starts one transfer session and exposes
//! the control API the scanner UI posts scans to. The process exits once the
//! transfer is finalizable or over; completing it needs the host's crypto
//! and session services.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transfer_agent::api::{self, ApiState};
use transfer_agent::config::Config;
use transfer_agent::db::SqliteAccountStore;
use transfer_agent::orchestrator::{TransferOrchestrator, TransferUpdate};
use transfer_agent::session::TransferSession;
use transfer_agent::sync::HttpPageSynchronizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let store = Arc::new(SqliteAccountStore::connect(&config.database_url).await?);

    let client = Client::builder().timeout(config.request_timeout()).build()?;
    let synchronizer = Arc::new(HttpPageSynchronizer::new(client, config.sync_max_retries));

    // ─── Transfer session ─────────────────────────────────
    let cancel = CancellationToken::new();
    let (updates_tx, mut updates) = mpsc::channel(config.update_channel_capacity);
    let orchestrator =
        TransferOrchestrator::new(synchronizer, store, cancel.clone()).with_updates(updates_tx);
    let (session, task) =
        TransferSession::spawn(orchestrator, None, config.update_channel_capacity);

    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                TransferUpdate::Progress(progress) => info!(?progress, "Transfer progress"),
                TransferUpdate::DuplicatePage(page) => info!(page, "Page already scanned"),
                TransferUpdate::Rejected(e) => warn!(error = %e, "Scan rejected"),
                TransferUpdate::Finalizable {
                    transfer_id,
                    user_id,
                    username,
                    fingerprint,
                } => info!(
                    %transfer_id,
                    %user_id,
                    %username,
                    %fingerprint,
                    "Account received, ready to complete"
                ),
                TransferUpdate::Completed(outcome) => {
                    info!(user_id = %outcome.account.user_id, "Transfer completed")
                }
                TransferUpdate::Cancelled(e) => warn!(reason = %e, "Transfer cancelled"),
                TransferUpdate::Failed(e) => warn!(error = %e, "Transfer failed"),
            }
        }
    });

    // ─── Control API ──────────────────────────────────────
    let app = api::router(Arc::new(ApiState {
        session: session.clone(),
    }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let watcher = session.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
                snapshot = watcher.settled() => {
                    info!(phase = snapshot.phase.as_str(), "Transfer settled")
                }
            }
        })
        .await?;

    // Unsettled transfers are cancelled on the server; a finalizable one
    // ends locally.
    cancel.cancel();
    drop(session);
    let orchestrator = task.await?;

    let state = orchestrator.state();
    match (state.configuration(), orchestrator.unsaved_account()) {
        (Some(config), Some(account)) => warn!(
            transfer_id = %config.transfer_id,
            user_id = %account.user_id,
            fingerprint = %account.fingerprint,
            phase = orchestrator.phase().as_str(),
            "Account received but not stored; completing a transfer needs the host's crypto and session services"
        ),
        _ => info!(phase = orchestrator.phase().as_str(), "Transfer finished"),
    }

    Ok(())
}
