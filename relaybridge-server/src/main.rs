//! `relaybridge-server` -- minimal channel relay.
//!
//! An axum WebSocket server that groups clients into password-protected
//! channels and forwards each client's messages to the rest of its channel.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:11999
//! cargo run --bin relaybridge-server
//!
//! # Run on custom address
//! cargo run --bin relaybridge-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! RELAY_ADDR=127.0.0.1:8080 cargo run --bin relaybridge-server
//! ```

use std::sync::Arc;

use clap::Parser;
use relaybridge_server::config::{RelayCliArgs, RelayConfig};
use relaybridge_server::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting relaybridge relay server");

    let state = Arc::new(RelayState::with_heartbeat(config.heartbeat));

    let handle = match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            handle
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            state.close_all_connections();
            // Give writer tasks a moment to flush the close frames.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
}
