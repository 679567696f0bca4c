//! # cohort-server
//!
//! Real-time backend for collaborative study rooms.
//!
//! This binary provides:
//! - **REST API** (axum) for rooms, membership, sessions, shared content,
//!   quizzes and progress
//! - **WebSocket fan-out** that routes chat, study-tool sync and presence
//!   between the members of a room
//! - **Mastery client** that refreshes per-skill estimates from the external
//!   knowledge-tracing service

mod api;
mod auth;
mod config;
mod error;
mod fanout;
mod hub;
mod mastery;
mod store;
mod ws;

use std::sync::Arc;

use cohort_shared::constants::APP_NAME;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::fanout::Fanout;
use crate::hub::Hub;
use crate::mastery::MasteryClient;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,cohort_server=debug,cohort_store=info")
            }),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Store::open(
        &config.database_path,
        config.db_pool_size,
        config.store_timeout,
    )?;

    let hub = Hub::new(config.connection_buffer);
    let fanout = Arc::new(Fanout::new(store.clone(), hub.clone(), config.presence_window));
    let mastery = MasteryClient::new(&config.mastery_base_url, config.mastery_timeout)?;

    let app_state = AppState {
        store,
        fanout,
        mastery,
    };

    // Report frames dropped for slow consumers (every minute, only on change)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        let mut reported = 0;
        loop {
            interval.tick().await;
            let dropped = hub.dropped_frames();
            if dropped != reported {
                tracing::warn!(dropped, "frames dropped for slow connections");
                reported = dropped;
            }
        }
    });

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
