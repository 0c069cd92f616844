use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tiergate::config::{LoggingConfig, TiergateConfig};
use tiergate::http::{BypassList, HttpServer};
use tiergate::ratelimit::AdmissionEngine;

/// Tiered sliding-window admission control service.
#[derive(Parser, Debug)]
#[command(name = "tiergate", version, about)]
struct Args {
    /// Configuration file (YAML). Environment variables prefixed with
    /// TIERGATE_ override it.
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Limit table file (YAML)
    #[arg(short, long)]
    rules: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TiergateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(rules) = args.rules {
        config.rate_limiting.rules_path = Some(rules);
    }
    if args.json_logs {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Tiergate admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Initialize the admission engine
    let engine = Arc::new(AdmissionEngine::from_config(&config.rate_limiting)?);
    let sweeper = engine.spawn_sweeper();
    info!("Admission engine initialized");

    let bypass = BypassList::new(config.rate_limiting.bypass_paths.iter().cloned());
    let server = HttpServer::new(config.server.listen_addr, engine, bypass);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.shutdown().await;
    info!("Tiergate admission service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
