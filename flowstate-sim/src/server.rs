// FlowState Sim - WebSocket server
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! WebSocket server streaming simulated metrics.
//!
//! Every connected client receives the same sample once per tick. No sample
//! is generated while nobody is connected, and a tick whose generator has
//! nothing to report is skipped. Clients steer the generator with
//! `set_state` / `clear_state` control messages.

use crate::generator::{EegSimulator, GeneratorConfig, SampleGenerator};
use crate::raw::{RawEegConfig, RawPipeline};
use flowstate::{BandState, ControlCommand, FlowError};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Server errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sample rate must be positive.
    #[error("Invalid sample rate: {0} Hz")]
    InvalidRate(u32),

    /// Raw pipeline could not be configured or calibrated.
    #[error("Generator setup failed: {0}")]
    Generator(#[from] FlowError),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; 0 picks a free port.
    pub port: u16,
    /// Samples per second.
    pub rate_hz: u32,
    /// Drift generator parameters.
    pub generator: GeneratorConfig,
    /// When set, samples come from synthetic raw EEG run through the
    /// band-power pipeline instead of the drift generator.
    pub raw: Option<RawEegConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            rate_hz: 10,
            generator: GeneratorConfig::default(),
            raw: None,
        }
    }
}

impl ServerConfig {
    /// Interval between two samples.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz.max(1) as f64)
    }
}

/// Result of applying one control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Generator pinned to a state.
    Forced(BandState),
    /// Generator back to natural drift.
    Cleared,
    /// `set_state` without a usable state.
    InvalidState(String),
    /// Command name not recognized.
    UnknownCommand(String),
    /// Text is not JSON.
    InvalidJson,
}

/// Apply one control message to the generator.
pub fn apply_control(simulator: &mut dyn SampleGenerator, text: &str) -> ControlOutcome {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return ControlOutcome::InvalidJson,
    };

    match ControlCommand::from_wire(text) {
        Ok(ControlCommand::SetState { state }) => {
            simulator.set_state(state);
            ControlOutcome::Forced(state)
        }
        Ok(ControlCommand::ClearState) => {
            simulator.clear_forced_state();
            ControlOutcome::Cleared
        }
        Err(_) => {
            let command = value
                .get("command")
                .and_then(|c| c.as_str())
                .unwrap_or_default();
            if command == "set_state" {
                let state = value.get("state").map(|s| s.to_string()).unwrap_or_default();
                ControlOutcome::InvalidState(state)
            } else {
                ControlOutcome::UnknownCommand(command.to_string())
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Shared {
    simulator: Mutex<Box<dyn SampleGenerator>>,
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_client: AtomicU64,
    samples_sent: AtomicU64,
}

impl Shared {
    fn handle_control(&self, peer: SocketAddr, text: &str) {
        let outcome = {
            let mut simulator = lock(&self.simulator);
            apply_control(simulator.as_mut(), text)
        };
        match outcome {
            ControlOutcome::Forced(state) => info!(%peer, %state, "Forced state"),
            ControlOutcome::Cleared => info!(%peer, "Cleared forced state"),
            ControlOutcome::InvalidState(state) => warn!(%peer, state = %state, "Invalid state"),
            ControlOutcome::UnknownCommand(command) => {
                warn!(%peer, command = %command, "Unknown command")
            }
            ControlOutcome::InvalidJson => warn!(%peer, message = text, "Invalid JSON"),
        }
    }

    /// Generate one sample and queue it for every client.
    fn broadcast_tick(&self) {
        let mut clients = lock(&self.clients);
        if clients.is_empty() {
            return;
        }

        let Some(sample) = lock(&self.simulator).next_sample() else {
            return;
        };
        let text = match sample.to_wire() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Failed to encode sample");
                return;
            }
        };

        clients.retain(|_, tx| tx.send(text.clone()).is_ok());
        self.samples_sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bound simulator server.
pub struct SimulatorServer {
    listener: TcpListener,
    interval: Duration,
    shared: Arc<Shared>,
}

impl SimulatorServer {
    /// Bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, SimError> {
        if config.rate_hz == 0 {
            return Err(SimError::InvalidRate(config.rate_hz));
        }
        let interval = config.interval();
        let simulator: Box<dyn SampleGenerator> = match config.raw {
            Some(raw) => Box::new(RawPipeline::new(raw, config.rate_hz)?),
            None => Box::new(EegSimulator::new(config.generator)),
        };

        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| SimError::Bind { addr, source })?;

        Ok(Self {
            listener,
            interval,
            shared: Arc::new(Shared {
                simulator: Mutex::new(simulator),
                clients: Mutex::new(HashMap::new()),
                next_client: AtomicU64::new(0),
                samples_sent: AtomicU64::new(0),
            }),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, SimError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for inspecting the running server.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Accept clients and stream samples until the task is dropped.
    pub async fn run(self) -> Result<(), SimError> {
        info!(
            addr = %self.local_addr()?,
            interval_ms = self.interval.as_millis() as u64,
            "Simulator streaming"
        );

        let mut ticks = tokio::time::interval(self.interval);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticks.tick() => self.shared.broadcast_tick(),
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    tokio::spawn(handle_client(Arc::clone(&self.shared), stream, peer));
                }
            }
        }
    }
}

/// Read-only view of server counters.
#[derive(Clone)]
pub struct ServerStats {
    shared: Arc<Shared>,
}

impl ServerStats {
    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        lock(&self.shared.clients).len()
    }

    /// Number of ticks that produced a sample.
    pub fn samples_sent(&self) -> u64 {
        self.shared.samples_sent.load(Ordering::Relaxed)
    }

    /// Currently forced state.
    pub fn forced_state(&self) -> Option<BandState> {
        lock(&self.shared.simulator).forced_state()
    }
}

async fn handle_client(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let id = shared.next_client.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let total = {
        let mut clients = lock(&shared.clients);
        clients.insert(id, tx);
        clients.len()
    };
    info!(%peer, clients = total, "Client connected");

    let (mut sink, mut source) = ws.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.handle_control(peer, &text),
            Ok(Message::Close(frame)) => {
                debug!(%peer, ?frame, "Close frame received");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, error = %e, "Read failed");
                break;
            }
        }
    }

    let remaining = {
        let mut clients = lock(&shared.clients);
        clients.remove(&id);
        clients.len()
    };
    writer.abort();
    info!(%peer, clients = remaining, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator() -> EegSimulator {
        EegSimulator::new(GeneratorConfig::new().with_seed(3))
    }

    #[test]
    fn test_apply_set_and_clear() {
        let mut sim = simulator();
        assert_eq!(
            apply_control(&mut sim, r#"{"command":"set_state","state":"high"}"#),
            ControlOutcome::Forced(BandState::High)
        );
        assert_eq!(sim.forced_state(), Some(BandState::High));

        assert_eq!(
            apply_control(&mut sim, r#"{"command":"clear_state"}"#),
            ControlOutcome::Cleared
        );
        assert_eq!(sim.forced_state(), None);
    }

    #[test]
    fn test_apply_rejects_bad_messages() {
        let mut sim = simulator();
        assert_eq!(apply_control(&mut sim, "{nope"), ControlOutcome::InvalidJson);
        assert_eq!(
            apply_control(&mut sim, r#"{"command":"reboot"}"#),
            ControlOutcome::UnknownCommand("reboot".to_string())
        );
        assert_eq!(
            apply_control(&mut sim, r#"{"command":"set_state","state":"medium"}"#),
            ControlOutcome::InvalidState("\"medium\"".to_string())
        );
        assert_eq!(
            apply_control(&mut sim, r#"{"command":"set_state"}"#),
            ControlOutcome::InvalidState(String::new())
        );
        assert_eq!(sim.forced_state(), None);
    }

    #[test]
    fn test_interval_from_rate() {
        let config = ServerConfig {
            rate_hz: 20,
            ..Default::default()
        };
        assert_eq!(config.interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_zero_rate_rejected() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            rate_hz: 0,
            ..Default::default()
        };
        assert!(matches!(
            SimulatorServer::bind(config).await,
            Err(SimError::InvalidRate(0))
        ));
    }

    #[tokio::test]
    async fn test_raw_model_calibration_failure_rejected() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            raw: Some(RawEegConfig {
                calibration_secs: 0.5,
                ..RawEegConfig::new().with_seed(1)
            }),
            ..Default::default()
        };
        assert!(matches!(
            SimulatorServer::bind(config).await,
            Err(SimError::Generator(FlowError::Calibration(_)))
        ));
    }
}
