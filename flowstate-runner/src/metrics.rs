// FlowState Runner - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the closed loop.
//!
//! Gauges mirror the latest controller, connection and sample values;
//! counters accumulate samples, sessions and transitions.

use flowstate::{ConnectionState, ControllerState, MetricsSample, StateChange};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder,
    Gauge, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ============================================================
    // Loop state
    // ============================================================

    /// Controller state.
    /// Values: 0 = Idle, 1 = Monitoring, 2 = Entraining, 3 = Cooldown
    pub static ref CONTROLLER_STATE: IntGauge = register_int_gauge!(
        "flowstate_controller_state",
        "Controller state (0=idle, 1=monitoring, 2=entraining, 3=cooldown)"
    ).unwrap();

    /// Metrics source connection state.
    /// Values: 0 = Disconnected, 1 = Connecting, 2 = Connected, 3 = Error
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        "flowstate_connection_state",
        "Source connection state (0=disconnected, 1=connecting, 2=connected, 3=error)"
    ).unwrap();

    // ============================================================
    // Latest sample
    // ============================================================

    /// Z-score of the most recent sample.
    pub static ref LAST_Z_SCORE: Gauge = register_gauge!(
        "flowstate_last_z_score",
        "Z-score of the most recent metrics sample"
    ).unwrap();

    /// Signal quality of the most recent sample.
    pub static ref LAST_SIGNAL_QUALITY: Gauge = register_gauge!(
        "flowstate_last_signal_quality",
        "Signal quality (0-100) of the most recent metrics sample"
    ).unwrap();

    // ============================================================
    // Counters
    // ============================================================

    /// Samples seen by the controller.
    pub static ref SAMPLES_TOTAL: IntCounter = register_int_counter!(
        "flowstate_samples_total",
        "Metrics samples processed by the controller"
    ).unwrap();

    /// Entrainment sessions started.
    pub static ref ENTRAINMENT_SESSIONS_TOTAL: IntCounter = register_int_counter!(
        "flowstate_entrainment_sessions_total",
        "Entrainment sessions started"
    ).unwrap();

    /// State transitions (labeled by origin and target state).
    pub static ref STATE_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "flowstate_state_transitions_total",
        "Controller state transitions",
        &["from", "to"]
    ).unwrap();

    /// Kill-switch activations reported by the audio adapter.
    pub static ref KILL_SWITCH_TRIGGERS: IntGauge = register_int_gauge!(
        "flowstate_kill_switch_triggers",
        "Times the kill-switch paused a runaway actuator"
    ).unwrap();
}

/// Numeric code of a connection state.
pub fn connection_code(state: ConnectionState) -> i64 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Error => 3,
    }
}

/// Record one processed sample.
pub fn record_sample(sample: &MetricsSample) {
    LAST_Z_SCORE.set(sample.z_score);
    LAST_SIGNAL_QUALITY.set(sample.signal_quality);
    SAMPLES_TOTAL.inc();
}

/// Record a controller transition.
pub fn record_transition(change: &StateChange) {
    CONTROLLER_STATE.set(change.state.code());
    STATE_TRANSITIONS_TOTAL
        .with_label_values(&[change.previous.as_str(), change.state.as_str()])
        .inc();
    if change.state == ControllerState::Entraining {
        ENTRAINMENT_SESSIONS_TOTAL.inc();
    }
}

/// Record a connection state change.
pub fn record_connection(state: ConnectionState) {
    CONNECTION_STATE.set(connection_code(state));
}

/// Update the kill-switch gauge.
pub fn update_kill_switch(triggers: u64) {
    KILL_SWITCH_TRIGGERS.set(triggers as i64);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
