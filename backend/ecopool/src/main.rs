//! Eco-action donation pool: entry point.
//!
//! Opens the SQLite ledger, wires the donation, payout, leaderboard and
//! trust-score services together and serves them over an Axum REST API
//! until Ctrl-C.

mod allocation;
mod api;
mod config;
mod db;
mod donation;
mod errors;
mod gateway;
mod leaderboard;
mod ledger;
mod models;
mod signature;
mod trust;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use allocation::AllocationService;
use config::Config;
use donation::DonationService;
use gateway::PaymentGateway;
use leaderboard::LeaderboardRanker;
use ledger::LedgerStore;
use signature::SignatureVerifier;
use trust::TrustScoreCalculator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // ─── Services ─────────────────────────────────────────
    let ledger = LedgerStore::new(pool.clone());
    let verifier = SignatureVerifier::new(config.gateway_key_secret.clone());
    let gateway = PaymentGateway::new(
        client,
        config.gateway_url.clone(),
        config.gateway_key_id.clone(),
        config.gateway_key_secret.clone(),
        config.currency.clone(),
    );

    let state = Arc::new(api::ApiState {
        donations: DonationService::new(ledger.clone(), verifier.clone(), config.fee_bps),
        allocations: AllocationService::new(ledger.clone(), verifier),
        leaderboard: LeaderboardRanker::new(pool.clone()),
        trust: TrustScoreCalculator::new(pool),
        gateway,
        currency: config.currency.clone(),
        transactions_page_limit: config.transactions_page_limit,
        ledger,
    });

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => warn!("Cannot listen for Ctrl-C, graceful shutdown disabled: {e}"),
            }
        }
    });

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!(fee_bps = config.fee_bps, "API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}
