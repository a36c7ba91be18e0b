// FlowState Runner - Loop wiring and HTTP endpoints
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Assembles the closed loop from a [`FlowConfig`] and exposes it over HTTP.

use crate::metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use flowstate::source::ConnectionCallback;
use flowstate::stimulus::StimulusCallback;
use flowstate::{
    AudioOutput, ClosedLoopController, ConfigError, ConnectionState, FlowConfig, FlowError,
    IdFactory, LoggingPlayer, MetricsSample, MetricsSource, SimulatedSource, StateCallback,
    StateChange, StimulusOutput, StimulusState,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Runner errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The loop failed to start.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Latest sample as reported by `/status`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LastSample {
    pub timestamp: u64,
    pub z_score: f64,
    pub signal_quality: f64,
}

/// The assembled loop.
pub struct FlowLoop {
    pub config: FlowConfig,
    pub source: Arc<SimulatedSource>,
    pub player: Arc<LoggingPlayer>,
    pub output: Arc<AudioOutput<LoggingPlayer>>,
    pub controller: Arc<ClosedLoopController>,
    last_sample: Arc<Mutex<Option<LastSample>>>,
    started_at: Instant,
}

impl FlowLoop {
    /// Build the loop and attach the metrics observers. Nothing is started.
    pub fn build(config: FlowConfig) -> Result<Self, RunnerError> {
        config.validate()?;

        let ids = IdFactory::new();
        let source = Arc::new(SimulatedSource::websocket(ids.next_id(), config.source.clone()));
        let player = Arc::new(LoggingPlayer::new(ids.next_id()));
        let output = Arc::new(AudioOutput::new(
            ids.next_id(),
            config.audio.clone(),
            Arc::clone(&player),
        ));
        let controller = Arc::new(ClosedLoopController::new(
            ids.next_id(),
            source.clone(),
            output.clone(),
            config.controller.clone(),
        )?);

        let last_sample = Arc::new(Mutex::new(None));
        let flow = Self {
            config,
            source,
            player,
            output,
            controller,
            last_sample,
            started_at: Instant::now(),
        };
        flow.attach_observers();
        Ok(flow)
    }

    fn attach_observers(&self) {
        let last = Arc::clone(&self.last_sample);
        self.controller
            .register_metrics_observer(Arc::new(move |sample: &MetricsSample| {
                metrics::record_sample(sample);
                if let Ok(mut slot) = last.lock() {
                    *slot = Some(LastSample {
                        timestamp: sample.timestamp,
                        z_score: sample.z_score,
                        signal_quality: sample.signal_quality,
                    });
                }
            }));

        let on_change: StateCallback = Arc::new(|change: &StateChange| {
            metrics::record_transition(change);
        });
        self.controller.register_state_observer(on_change);

        let on_connection: ConnectionCallback = Arc::new(|state: &ConnectionState| {
            metrics::record_connection(*state);
        });
        self.source.register_connection_state(on_connection);

        let on_stimulus: StimulusCallback = Arc::new(|state: &StimulusState| {
            info!(%state, "Stimulus state");
        });
        self.output.register_state_observer(on_stimulus);
    }

    /// Start monitoring.
    pub async fn start(&self) -> Result<(), RunnerError> {
        self.controller.start().await?;
        Ok(())
    }

    /// Stop the controller, then release the actuator.
    pub async fn shutdown(&self) {
        self.controller.stop().await;
        self.output.dispose().await;
        info!("Loop shut down");
    }

    /// Most recent sample seen by the controller.
    pub fn last_sample(&self) -> Option<LastSample> {
        self.last_sample.lock().ok().and_then(|slot| *slot)
    }

    /// Snapshot for `/status`.
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            controller_state: self.controller.state().as_str(),
            connection_state: self.source.connection_state().as_str(),
            stimulus_state: self.output.state().as_str(),
            entrainment_sessions: self.controller.entrainment_count(),
            reconnect_attempts: self.source.reconnect_attempts(),
            frequency_hz: self.output.frequency(),
            volume: self.output.volume(),
            kill_switch_triggers: self.output.kill_switch_triggers(),
            source_url: self.config.source.url.clone(),
            last_sample: self.last_sample(),
        }
    }
}

/// Status information response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub controller_state: &'static str,
    pub connection_state: &'static str,
    pub stimulus_state: &'static str,
    pub entrainment_sessions: u64,
    pub reconnect_attempts: u32,
    pub frequency_hz: f64,
    pub volume: f64,
    pub kill_switch_triggers: u64,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<LastSample>,
}

/// HTTP routes.
pub fn router(flow: Arc<FlowLoop>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(flow)
}

/// Root handler - lists the endpoints.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>FlowState Runner</title></head>
<body>
    <h1>FlowState Runner</h1>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus metrics</li>
        <li><a href="/health">/health</a> - Health check</li>
        <li><a href="/ready">/ready</a> - Ready once the source is connected</li>
        <li><a href="/status">/status</a> - Loop status (JSON)</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(flow): State<Arc<FlowLoop>>) -> impl IntoResponse {
    metrics::update_kill_switch(flow.output.kill_switch_triggers());
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("Content-Type", "text/plain; charset=utf-8")],
            e.to_string(),
        ),
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
async fn ready_handler(State(flow): State<Arc<FlowLoop>>) -> impl IntoResponse {
    if flow.source.is_connected() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Source not connected")
    }
}

/// Status handler - returns JSON status information.
async fn status_handler(State(flow): State<Arc<FlowLoop>>) -> Json<StatusResponse> {
    Json(flow.status())
}
