//! # lifeline-server
//!
//! Polling relay server for the Lifeline realtime core.
//!
//! This binary provides:
//! - **Call signaling relay**: offer/answer stored write-once on the call
//!   row, ICE candidates as a cursor-readable append-only log
//! - **Call session management**: the ringing/connected/terminal state
//!   machine with compare-and-set transitions
//! - **Message channel**: the append-only per-pair message log
//! - **Presence**: heartbeat recording on every authenticated request,
//!   online state computed at read time
//! - **Per-IP rate limiting** sized for short-interval polling clients

mod api;
mod config;
mod error;
mod notify;
mod presence_mw;
mod rate_limit;

use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use lifeline_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lifeline_server=debug")),
        )
        .init();

    info!("Starting Lifeline realtime server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.db_path)?;

    let notifier = notify::from_webhook_url(config.notify_webhook_url.clone());

    let rate_limiter = RateLimiter::new(config.rate_limit_rate, config.rate_limit_burst);

    let app_state = AppState {
        db: Arc::new(Mutex::new(database)),
        config: Arc::new(config.clone()),
        notifier,
        rate_limiter: rate_limiter.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    let http_addr = app_state.config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
