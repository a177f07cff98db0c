//! `DataChat` relay server -- connectionless UDP chat relay.
//!
//! Receives frames from chat clients over UDP and forwards text, images,
//! audio clips, and files to one named participant or to everyone.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin datachat-relay
//!
//! # Run on custom address
//! cargo run --bin datachat-relay -- --bind 127.0.0.1:6000
//!
//! # Or via environment variable
//! DATACHAT_ADDR=127.0.0.1:6000 cargo run --bin datachat-relay
//! ```

use std::path::Path;

use clap::Parser;
use datachat_relay::config::{RelayCliArgs, RelayConfig};
use datachat_relay::server;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(
        addr = %config.bind_addr,
        workers = config.workers,
        max_payload = config.max_payload_size,
        "starting datachat relay"
    );

    let (_addr, handle) = match server::start_server(&config).await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    };

    let shutdown = handle.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            shutdown.shutdown();
        }
    });

    match handle.join().await {
        Ok(()) => tracing::info!("relay stopped"),
        Err(e) => {
            tracing::error!(error = %e, "relay stopped with error");
            std::process::exit(1);
        }
    }
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for file logging that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((path, file_name)) = file_path.and_then(|p| Some((p, p.file_name()?))) else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };
    let log_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
