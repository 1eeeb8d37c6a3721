//! Toolgate Entry Point
//!
//! Initializes logging, loads configuration, registers the built-in tools
//! and serves them over the configured transport.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use toolgate::core::{Config, McpServer, TransportService};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize logging
    init_logging(&config.logging.level, config.logging.with_timestamps);

    info!("Starting {} v{}", config.server.name, config.server.version);

    let transport = TransportService::new(config.transport.clone());
    let server = McpServer::new(config)?;

    info!(
        "Server initialized with tools: {}",
        server.dispatcher().registry().tool_names().join(", ")
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = server.spawn_cache_sweeper(shutdown_rx);

    let outcome = transport.run(server).await;

    info!("Server shutting down");
    if shutdown_tx.send(true).is_err() {
        warn!("Cache sweeper already stopped");
    }
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }

    outcome?;
    Ok(())
}

/// Initialize the logging subsystem.
///
/// Logs go to stderr; stdout carries the STDIO transport.
fn init_logging(level: &str, with_timestamps: bool) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if with_timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
