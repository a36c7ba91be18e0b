// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Wire protocol module
//!
//! Defines the metrics sample exchanged between a metrics source and the
//! controller, the JSON telemetry format the simulated peer emits, and the
//! control messages sent back to it.
//!
//! ## Inbound telemetry
//!
//! ```text
//! {
//!     "timestamp": 1234567890123,
//!     "theta_power": 12.5,
//!     "z_score": -0.8,
//!     "theta_state": "low",
//!     "signal_quality": 85,
//!     "simulated_theta_state": "low"      (optional)
//! }
//! ```
//!
//! The `band_power` / `band_state` / `forced_state` spellings are accepted as
//! well. Messages missing a field, or carrying a field of the wrong type, are
//! rejected with a [`ProtocolError`].

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Z-score below which the simulated peer labels a sample `low`
pub const LOW_BAND_Z: f64 = -0.5;

/// Z-score above which the simulated peer labels a sample `high`
pub const HIGH_BAND_Z: f64 = 0.5;

/// Coarse classification of band power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandState {
    /// Below baseline
    Low,
    /// Around baseline
    Normal,
    /// Above baseline
    High,
}

impl BandState {
    /// Classify a z-score using the peer's cut points
    pub fn classify(z_score: f64) -> Self {
        if z_score < LOW_BAND_Z {
            Self::Low
        } else if z_score > HIGH_BAND_Z {
            Self::High
        } else {
            Self::Normal
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for BandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation emitted by a metrics source
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSample {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Power of the monitored band (non-negative)
    pub band_power: f64,
    /// Band power normalized against the personal baseline
    pub z_score: f64,
    /// Informational classification
    pub band_state: BandState,
    /// Trustworthiness score in [0, 100]
    pub signal_quality: f64,
    /// Present only when a test peer forces the band state
    pub forced_state: Option<BandState>,
}

impl MetricsSample {
    /// Create a sample, deriving the band state from the z-score
    pub fn new(timestamp: u64, band_power: f64, z_score: f64, signal_quality: f64) -> Self {
        Self {
            timestamp,
            band_power,
            z_score,
            band_state: BandState::classify(z_score),
            signal_quality,
            forced_state: None,
        }
    }

    /// Minimal sample carrying only a timestamp and z-score
    pub fn with_z_score(timestamp: u64, z_score: f64) -> Self {
        Self::new(timestamp, 0.0, z_score, 100.0)
    }

    /// Mark the sample as produced under a forced band state
    pub fn with_forced_state(mut self, state: BandState) -> Self {
        self.forced_state = Some(state);
        self
    }

    /// Parse and validate one inbound telemetry message
    pub fn from_wire(text: &str) -> Result<Self, ProtocolError> {
        let wire: WireSample =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        if !wire.timestamp.is_finite() || wire.timestamp < 0.0 || wire.timestamp.fract() != 0.0 {
            return Err(ProtocolError::InvalidField {
                field: "timestamp",
                reason: format!("expected a non-negative integer, got {}", wire.timestamp),
            });
        }

        Ok(Self {
            timestamp: wire.timestamp as u64,
            band_power: wire.band_power,
            z_score: wire.z_score,
            band_state: wire.band_state,
            signal_quality: wire.signal_quality,
            forced_state: wire.forced_state,
        })
    }

    /// Serialize using the peer's native `theta_*` field names
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        let out = OutboundSample {
            timestamp: self.timestamp,
            theta_power: self.band_power,
            z_score: self.z_score,
            theta_state: self.band_state,
            signal_quality: self.signal_quality,
            simulated_theta_state: self.forced_state,
        };
        serde_json::to_string(&out).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }
}

#[derive(Deserialize)]
struct WireSample {
    timestamp: f64,
    #[serde(alias = "theta_power")]
    band_power: f64,
    z_score: f64,
    #[serde(alias = "theta_state")]
    band_state: BandState,
    signal_quality: f64,
    #[serde(default, alias = "simulated_theta_state")]
    forced_state: Option<BandState>,
}

#[derive(Serialize)]
struct OutboundSample {
    timestamp: u64,
    theta_power: f64,
    z_score: f64,
    theta_state: BandState,
    signal_quality: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulated_theta_state: Option<BandState>,
}

/// Out-of-band control message sent to a simulated peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Force the synthetic band state
    SetState {
        /// Target state
        state: BandState,
    },
    /// Return to natural simulation
    ClearState,
}

impl ControlCommand {
    /// Encode as JSON text
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Decode from JSON text
    pub fn from_wire(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"timestamp":1700000000000,"theta_power":12.5,"z_score":-0.8,"theta_state":"low","signal_quality":85}"#;

    #[test]
    fn test_parse_theta_spelling() {
        let sample = MetricsSample::from_wire(VALID).unwrap();
        assert_eq!(sample.timestamp, 1_700_000_000_000);
        assert_eq!(sample.band_power, 12.5);
        assert_eq!(sample.z_score, -0.8);
        assert_eq!(sample.band_state, BandState::Low);
        assert_eq!(sample.signal_quality, 85.0);
        assert_eq!(sample.forced_state, None);
    }

    #[test]
    fn test_parse_band_spelling_with_forced_state() {
        let text = r#"{"timestamp":5,"band_power":1.0,"z_score":0.9,"band_state":"high","signal_quality":70.5,"forced_state":"high"}"#;
        let sample = MetricsSample::from_wire(text).unwrap();
        assert_eq!(sample.band_state, BandState::High);
        assert_eq!(sample.forced_state, Some(BandState::High));
    }

    #[test]
    fn test_parse_simulated_state_alias() {
        let text = r#"{"timestamp":5,"theta_power":1.0,"z_score":0.0,"theta_state":"normal","signal_quality":90,"simulated_theta_state":"low"}"#;
        let sample = MetricsSample::from_wire(text).unwrap();
        assert_eq!(sample.forced_state, Some(BandState::Low));
    }

    #[test]
    fn test_reject_missing_field() {
        let text = r#"{"timestamp":5,"theta_power":1.0,"theta_state":"normal","signal_quality":90}"#;
        assert!(matches!(
            MetricsSample::from_wire(text),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_reject_wrong_type() {
        let text = r#"{"timestamp":"now","theta_power":1.0,"z_score":0.0,"theta_state":"normal","signal_quality":90}"#;
        assert!(MetricsSample::from_wire(text).is_err());

        let text = r#"{"timestamp":5,"theta_power":1.0,"z_score":"-1","theta_state":"normal","signal_quality":90}"#;
        assert!(MetricsSample::from_wire(text).is_err());
    }

    #[test]
    fn test_reject_unknown_band_state() {
        let text = r#"{"timestamp":5,"theta_power":1.0,"z_score":0.0,"theta_state":"medium","signal_quality":90}"#;
        assert!(MetricsSample::from_wire(text).is_err());
    }

    #[test]
    fn test_reject_fractional_timestamp() {
        let text = r#"{"timestamp":5.5,"theta_power":1.0,"z_score":0.0,"theta_state":"normal","signal_quality":90}"#;
        assert!(matches!(
            MetricsSample::from_wire(text),
            Err(ProtocolError::InvalidField { field: "timestamp", .. })
        ));
    }

    #[test]
    fn test_reject_non_json() {
        assert!(MetricsSample::from_wire("not json").is_err());
        assert!(MetricsSample::from_wire("[]").is_err());
    }

    #[test]
    fn test_to_wire_uses_theta_names() {
        let sample = MetricsSample::new(42, 10.0, -1.0, 80.0).with_forced_state(BandState::Low);
        let text = sample.to_wire().unwrap();
        assert!(text.contains("\"theta_power\""));
        assert!(text.contains("\"simulated_theta_state\":\"low\""));
        assert_eq!(MetricsSample::from_wire(&text).unwrap(), sample);
    }

    #[test]
    fn test_band_classification() {
        assert_eq!(BandState::classify(-0.6), BandState::Low);
        assert_eq!(BandState::classify(-0.5), BandState::Normal);
        assert_eq!(BandState::classify(0.5), BandState::Normal);
        assert_eq!(BandState::classify(0.51), BandState::High);
    }

    #[test]
    fn test_control_command_format() {
        let set = ControlCommand::SetState {
            state: BandState::High,
        };
        assert_eq!(
            set.to_wire().unwrap(),
            r#"{"command":"set_state","state":"high"}"#
        );
        assert_eq!(
            ControlCommand::ClearState.to_wire().unwrap(),
            r#"{"command":"clear_state"}"#
        );
        assert_eq!(
            ControlCommand::from_wire(r#"{"command":"clear_state"}"#).unwrap(),
            ControlCommand::ClearState
        );
        assert!(ControlCommand::from_wire(r#"{"command":"reboot"}"#).is_err());
    }
}
