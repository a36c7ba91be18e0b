//! # FlowState - Closed-loop entrainment control
//!
//! Drives a rhythmic stimulus from a live stream of brain-signal metrics.
//!
//! ## Key Features
//!
//! - **Hysteresis control**: separate start/stop thresholds plus a minimum
//!   dwell time, so input hovering near a cut point cannot toggle the output
//! - **Pluggable ports**: metrics sources and stimulus outputs are traits,
//!   adapters are chosen at construction time
//! - **Safe actuation**: serialized play/stop, fade-out, and a kill-switch
//!   that pauses an actuator running when it should not
//! - **Signal quality**: amplitude/gradient artifact scoring
//! - **Band-power processing**: FFT band power and z-scores against a
//!   quality-gated personal baseline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowstate::{
//!     AudioConfig, AudioOutput, ClosedLoopController, ControllerConfig, IdFactory,
//!     LoggingPlayer, SimulatedSource, SimulatedSourceConfig,
//! };
//!
//! # async fn run() -> flowstate::Result<()> {
//! let ids = IdFactory::new();
//! let source = Arc::new(SimulatedSource::websocket(
//!     ids.next_id(),
//!     SimulatedSourceConfig::default(),
//! ));
//! let player = Arc::new(LoggingPlayer::new(ids.next_id()));
//! let output = Arc::new(AudioOutput::new(ids.next_id(), AudioConfig::default(), player));
//!
//! let controller =
//!     ClosedLoopController::new(ids.next_id(), source, output, ControllerConfig::default())?;
//! controller.start().await?;
//! // ... samples flow, the stimulus follows ...
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`controller`]: Hysteresis state machine
//! - [`source`]: Metrics source port and adapters
//! - [`stimulus`]: Stimulus output port, audio adapter, tone synthesis
//! - [`quality`]: Signal quality evaluation
//! - [`processing`]: Raw windows to band power, baseline and z-score
//! - [`protocol`]: Metrics samples and wire messages
//! - [`config`]: Configuration and validation
//! - [`registry`]: Observer registry

// Modules
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod ids;
pub mod processing;
pub mod protocol;
pub mod quality;
pub mod recovery;
pub mod registry;
pub mod source;
pub mod stimulus;

// Re-exports for convenient access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AudioConfig, ControllerConfig, ControllerConfigUpdate, FlowConfig, ProcessingConfig,
    SimulatedSourceConfig,
};
pub use controller::{ClosedLoopController, ControllerState, StateCallback, StateChange};
pub use error::{
    CalibrationError, ConfigError, FlowError, ProtocolError, QualityError, Result, SourceError,
    StimulusError,
};
pub use ids::{IdFactory, InstanceId};
pub use processing::{BandProcessor, Baseline, Calibration, Epoch};
pub use protocol::{BandState, ControlCommand, MetricsSample};
pub use quality::{
    artifact_percentage, evaluate, quality_category, quality_score, QualityCategory,
    QualityReport,
};
pub use recovery::{Backoff, ReconnectPolicy};
pub use registry::{Callback, ObserverRegistry};
pub use source::{
    ConnectionState, HardwareSource, MetricsSource, SimulatedSource, WsConnector,
};
pub use stimulus::{
    AudioOutput, LoggingPlayer, PlaybackStatus, Player, StimulusOutput, StimulusState,
    ToneBuffer, ToneSpec,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_defaults_are_consistent() {
        let config = FlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.controller.frequency_hz, config.audio.frequency_hz);
        assert_eq!(config.controller.volume, config.audio.volume);
    }
}
