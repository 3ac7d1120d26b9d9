//! DAP Debug MCP Server - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use dap_debug::{Args, Config, DapDebugToolHandler, SessionController};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Handle special flags first
    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let mut config = Config::load(args.config.as_ref())?;
    config.merge_args(&args);

    if args.validate_config {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config)?;

    info!("Starting DAP Debug MCP Server v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;

    let controller = Arc::new(SessionController::from_config(&config).map_err(|e| {
        error!("Failed to set up the debug adapter launcher: {}", e);
        e
    })?);

    let service = DapDebugToolHandler::new(controller.clone())
        .serve(stdio())
        .await
        .inspect_err(|e| {
            error!("Serving error: {:?}", e);
        })?;

    info!("DAP Debug MCP Server started");
    service.waiting().await?;

    // Never leave a debug adapter behind
    info!("Cleaning up resources...");
    let outcome = controller.stop().await;
    debug!("{}", outcome);

    info!("DAP Debug MCP Server stopped");
    Ok(())
}

/// Initialize logging. Stdout belongs to the MCP transport.
fn init_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);

    if let Some(log_file) = &config.logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", config.logging.level);
    Ok(())
}
