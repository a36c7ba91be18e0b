// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Error types for FlowState
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for FlowState operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for FlowState operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// Metrics source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Stimulus output error
    #[error("Stimulus error: {0}")]
    Stimulus(#[from] StimulusError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Signal quality evaluation error
    #[error("Quality error: {0}")]
    Quality(#[from] QualityError),

    /// Baseline calibration error
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),
}

/// Errors raised by a metrics source
///
/// Only configuration problems are ever returned from `start()`; transient
/// transport failures are absorbed by the reconnect policy and surface as
/// connection-state changes instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Address is not a WebSocket URL
    #[error("Invalid address '{url}': {reason}")]
    InvalidAddress { url: String, reason: String },

    /// The transport cannot open connections on this platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Adapter exists but has no implementation yet
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Transport-level failure (connect, read, write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection attempt timed out
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors raised by a stimulus output
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StimulusError {
    /// Output was disposed and cannot be used again
    #[error("Stimulus output has been disposed")]
    Disposed,

    /// Frequency is not a positive finite number
    #[error("Invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// Volume outside [0, 1]
    #[error("Invalid volume: {0} (expected 0.0-1.0)")]
    InvalidVolume(f64),

    /// Underlying actuator failed
    #[error("Actuator error: {0}")]
    Actuator(String),
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Stop threshold below start threshold (no hysteresis band)
    #[error("Invalid thresholds: stop {stop} must be >= start {start}")]
    InvalidThresholds { start: f64, stop: f64 },

    /// A field holds a value outside its domain
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Configuration file could not be read
    #[error("Failed to read configuration '{path}': {reason}")]
    Io { path: String, reason: String },

    /// Configuration text could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors in inbound/outbound wire messages
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Text is not valid JSON or does not match the schema
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A field is present with the right type but an invalid value
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Message could not be serialized
    #[error("Serialization failed: {0}")]
    Serialize(String),
}

/// Errors from the signal quality evaluator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityError {
    /// Artifact percentage is NaN
    #[error("Invalid artifact percentage: value is NaN")]
    NotANumber,

    /// Artifact percentage is +Infinity
    #[error("Invalid artifact percentage: value is positive infinity")]
    PositiveInfinity,

    /// Artifact percentage is -Infinity
    #[error("Invalid artifact percentage: value is negative infinity")]
    NegativeInfinity,

    /// Artifact percentage outside [0, 100]
    #[error("Invalid artifact percentage: {0} is outside the range 0-100")]
    OutOfRange(f64),
}

/// Errors while establishing a personal baseline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Too few usable band-power values
    #[error("Not enough calibration data: {accepted} usable epochs, {required} required")]
    InsufficientData { accepted: usize, required: usize },

    /// Spread of the baseline is zero or not finite
    #[error("Degenerate baseline: mean {mean}, std {std}")]
    Degenerate { mean: f64, std: f64 },
}
