//! ==============================================================================
//! main.rs - chorecast hub entry point
//! ==============================================================================
//!
//! purpose:
//!     receives the daily summary that chorecast pushes over a webhook and
//!     keeps a set of sensors (totals, next/last chore, per-user stats)
//!     current for dashboards and automations to read.
//!
//! responsibilities:
//!     - load configuration (config/chorecast.toml or defaults)
//!     - set up every configured entry (sensor table + webhook binding)
//!     - serve the webhook and the state/config api
//!     - unload entries on shutdown
//!
//! relationships:
//!     - uses: config.rs (startup settings), hub.rs (entry lifecycle)
//!     - uses: server.rs (routes), states.rs (display layer)
//!
//! architecture:
//!
//!     ┌───────────────────────────────────────────────────────────────┐
//!     │                      rust host (this file)                     │
//!     │   ┌─────────────────┐        ┌──────────────────────────────┐  │
//!     │   │ web server      │        │ hub                          │  │
//!     │   │ POST /api/      │ ─────> │  entry -> Instance           │  │
//!     │   │   webhook/:id   │        │    latest payload            │  │
//!     │   └─────────────────┘        │    SensorTable ── projector  │  │
//!     │                              └──────────────┬───────────────┘  │
//!     │                                             │ register / write │
//!     │                                     ┌───────┴───────┐          │
//!     │                                     │ MemoryStates  │          │
//!     │                                     └───────────────┘          │
//!     └───────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod config;
mod domain;
mod flow;
mod hub;
mod projector;
mod sensor;
mod server;
mod states;
mod webhook;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{HostConfig, LoggingConfig};
use crate::hub::Hub;
use crate::states::{MemoryStates, StateSink};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl+c: {}", e);
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let config = HostConfig::load_or_default();
    init_tracing(&config.logging);
    tracing::info!("Chorecast hub v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    // step 2: display layer + hub
    let states: Arc<dyn StateSink> = Arc::new(MemoryStates::new());
    let hub = Hub::new(states, config.logging.show_payloads);

    // step 3: set up configured entries
    for entry in config.config_entries() {
        let entry_id = entry.entry_id.clone();
        hub.add_entry(entry)
            .await
            .with_context(|| format!("failed to set up entry '{}'", entry_id))?;
    }

    // step 4: serve until ctrl+c
    let result = server::run_server(&config.server.bind, hub.clone(), shutdown_signal()).await;

    // step 5: unload entries
    hub.shutdown().await;
    tracing::info!("graceful shutdown complete");
    result
}
