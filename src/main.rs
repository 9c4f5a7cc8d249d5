//! unilog - demo of the unified logging dispatcher
//!
//! Loads the layered configuration, brings up the enabled sinks, sends one
//! record per level plus a structured result, and shuts everything down.

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use unilog::{cli::Cli, config::SinkConfig, manager::SinkManager};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match SinkConfig::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().with_env_filter("error").init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    // Diagnostics of the logger itself go through tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("-------------------- Configuration --------------------");
    info!("Enabled Sinks: {:?}", config.enabled_sinks);
    info!("Log Level: {}", config.log_level);
    info!(
        "Terminal Output: {}",
        if config.enable_terminal_output {
            config.terminal_level.as_str()
        } else {
            "Disabled"
        }
    );
    info!("Log File: {}", config.log_file_path().display());
    info!(
        "Webhook: {}",
        if config.webhook_url.is_some() {
            "Configured"
        } else {
            "Not configured"
        }
    );
    info!(
        "Webhook Batching: {} records / {}ms",
        config.batch_size, config.batch_interval_ms
    );
    info!("-------------------------------------------------------");

    let manager = SinkManager::initialize(config).await?;
    let logger = manager.dispatcher();

    logger.debug("Debug message from the unilog demo");
    logger.info("Info message from the unilog demo");
    logger.warning("Warning message from the unilog demo");
    logger.error("Error message from the unilog demo");
    logger.critical("Critical message from the unilog demo");
    logger.result_data(&json!({
        "demo": "unilog",
        "sinks": logger.sink_names(),
    }));

    manager.cleanup().await;
    info!("unilog demo finished.");
    Ok(())
}
