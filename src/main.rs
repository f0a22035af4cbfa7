//! Doc Relay Server
//!
//! Realtime change relay for collaborative document editing over WebSocket.

use std::path::Path;

use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use doc_relay::{api::start_server, core::create_app_state, core::logging, Config};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let matches = cli().get_matches();

    // Load configuration
    let config_path = matches.get_one::<String>("config").map(Path::new);
    let mut config = Config::load_from(config_path).context("Failed to load configuration")?;

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;

    // Initialize logging
    logging::init(&config.logging).context("Failed to initialize logging")?;

    info!("Starting {} v{}", doc_relay::NAME, doc_relay::VERSION);
    info!(
        debounce_ms = config.relay.debounce_window_ms,
        frontend_origin = %config.server.frontend_origin,
        "relay configured"
    );

    let state = create_app_state(config).context("Failed to initialize relay")?;

    start_server(state, shutdown_signal())
        .await
        .context("Relay server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Command line definition
fn cli() -> Command {
    Command::new("doc-relay")
        .version(doc_relay::VERSION)
        .about("Realtime change relay for collaborative documents.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("Listen port (overrides PORT)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> anyhow::Result<()> {
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    config.validate().context("Invalid command line override")?;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    warn!("Received shutdown signal, initiating graceful shutdown...");
}
