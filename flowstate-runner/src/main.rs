// FlowState Runner - Headless closed-loop host
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FlowState Runner
//!
//! Runs the closed loop against a simulated metrics source with a logging
//! actuator, and exports its state for Prometheus.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: source ws://localhost:8765, metrics on :9100
//! flowstate-runner
//!
//! # Configuration file plus a different simulator
//! flowstate-runner --config flowstate.json --url ws://10.0.0.5:8765
//! ```

mod app;
mod metrics;

use app::{router, FlowLoop, RunnerError};
use clap::Parser;
use flowstate::FlowConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// FlowState headless runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Metrics source URL (overrides the configuration file)
    #[arg(short, long)]
    url: Option<String>,

    /// Port for the metrics endpoint
    #[arg(short, long, default_value = "9100")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("FlowState Runner v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<FlowConfig, RunnerError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            FlowConfig::from_file(path)?
        }
        None => FlowConfig::default(),
    };
    if let Some(url) = &args.url {
        config.source.url = url.clone();
    }
    Ok(config)
}

async fn run(args: Args) -> Result<(), RunnerError> {
    let config = load_config(&args)?;
    info!("Metrics source: {}", config.source.url);

    let flow = Arc::new(FlowLoop::build(config)?);
    flow.start().await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let served = axum::serve(listener, router(Arc::clone(&flow)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    flow.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
