//! Prometheus exporter for JSON endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use jsonsight_exporter::{ExporterConfig, ExporterMetrics, HttpServer};

/// Prometheus exporter for JSON endpoints.
#[derive(Parser, Debug)]
#[command(name = "jsonsight-exporter")]
#[command(about = "Scrape JSON endpoints and expose them as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "config.json5")]
    config: String,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Path for the exporter's own metrics (overrides config).
    #[arg(long)]
    metrics_path: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    config_check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ExporterConfig::load_from_file(&args.config)?;

    if args.config_check {
        println!("Configuration file {} is valid", args.config);
        return Ok(());
    }

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(metrics_path) = args.metrics_path {
        config.metrics_path = metrics_path;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    jsonsight_common::init_tracing(&config.logging)?;

    info!(
        config = %args.config,
        modules = config.modules.len(),
        "Starting JSON exporter"
    );

    let listen_addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(
        Arc::new(config),
        Arc::new(ExporterMetrics::new()),
        listen_addr,
    );

    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    shutdown_signal().await?;

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}
