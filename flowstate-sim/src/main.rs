// FlowState Sim - Simulated EEG metrics server
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FlowState Sim
//!
//! Streams simulated band-power metrics over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Default: ws://0.0.0.0:8765 at 10 Hz
//! flowstate-sim
//!
//! # Reproducible stream on a custom port
//! flowstate-sim --port 9000 --rate 20 --seed 42
//!
//! # Band power computed from synthetic raw EEG
//! flowstate-sim --model raw
//! ```

use clap::{Parser, ValueEnum};
use flowstate_sim::{GeneratorConfig, RawEegConfig, ServerConfig, SimulatorServer};
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// How samples are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Model {
    /// Band power drifting around a baseline
    Drift,
    /// Synthetic raw EEG through the band-power pipeline
    Raw,
}

/// FlowState EEG simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address (0.0.0.0 for LAN access)
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8765")]
    port: u16,

    /// Samples per second
    #[arg(short, long, default_value = "10")]
    rate: u32,

    /// Random seed for a reproducible stream
    #[arg(long)]
    seed: Option<u64>,

    /// Sample model
    #[arg(long, value_enum, default_value = "drift")]
    model: Model,

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

    info!("FlowState Sim v{}", env!("CARGO_PKG_VERSION"));

    let generator = match args.seed {
        Some(seed) => GeneratorConfig::new().with_seed(seed),
        None => GeneratorConfig::new(),
    };
    let raw = match (args.model, args.seed) {
        (Model::Drift, _) => None,
        (Model::Raw, Some(seed)) => Some(RawEegConfig::new().with_seed(seed)),
        (Model::Raw, None) => Some(RawEegConfig::new()),
    };
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        rate_hz: args.rate,
        generator,
        raw,
    };

    let server = match SimulatorServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start simulator: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Ok(addr) = server.local_addr() {
        info!("Listening on ws://{}", addr);
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Simulator stopped: {}", e);
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }
    ExitCode::SUCCESS
}
