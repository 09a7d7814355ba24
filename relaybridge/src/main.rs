//! `relaybridge`: bridge stdin/stdout to a channel on a websocket relay.
//!
//! Opens one channel, prints every inbound message to stdout and transmits
//! every stdin line. Configuration via CLI flags, environment variables, or
//! config file (`~/.config/relaybridge/config.toml`).
//!
//! ```bash
//! cargo run --bin relaybridge -- --relay-url ws://127.0.0.1:11999 --channel lobby
//!
//! # Password-protected channel, events as JSON lines
//! BRIDGE_PASSWORD=hunter2 cargo run --bin relaybridge -- --channel vault --json
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;

use relaybridge::config::{BridgeConfig, CliArgs};
use relaybridge::transport::websocket::WsConnector;
use relaybridge::{BridgeEvent, ChannelManager};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match BridgeConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file; stdout carries channel traffic.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let Some(channel) = config.channel.clone() else {
        eprintln!("error: no channel given (use --channel or BRIDGE_CHANNEL)");
        return ExitCode::FAILURE;
    };
    let manager_config = match config.to_manager_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(relay = %manager_config.relay_url, channel = %channel, "relaybridge starting");

    let connector =
        WsConnector::new(config.connect_timeout).with_inbound_buffer(config.inbound_buffer);
    let manager = ChannelManager::new(connector, manager_config);

    let bus = match manager.start_event_relay() {
        Ok(bus) => bus,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let printer = tokio::spawn(print_events(bus.subscribe(), cli.json));

    if let Err(e) = manager.open(&channel, config.password.as_deref()).await {
        eprintln!("error: {e}");
        manager.shutdown().await;
        printer.abort();
        return ExitCode::FAILURE;
    }

    let status = forward_stdin(&manager, &channel).await;

    manager.shutdown().await;
    printer.abort();
    tracing::info!("relaybridge exiting");
    status
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("relaybridge.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Transmit stdin lines until EOF or Ctrl-C.
async fn forward_stdin<C>(manager: &ChannelManager<C>, channel: &str) -> ExitCode
where
    C: relaybridge::transport::Connector,
{
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return ExitCode::SUCCESS;
            }
        };

        match line {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = manager.transmit(channel, &line).await {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            }
            Ok(None) => return ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(err = %e, "failed to read stdin");
                return ExitCode::FAILURE;
            }
        }
    }
}

/// Print bus events to stdout until the bus closes.
async fn print_events(mut events: broadcast::Receiver<BridgeEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event, json),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "stdout printer fell behind, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &BridgeEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!(err = %e, "failed to encode event"),
        }
        return;
    }
    let BridgeEvent::BridgeMessage { channel, contents } = event;
    println!("[{channel}] {contents}");
}
