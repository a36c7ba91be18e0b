// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Configuration types for FlowState
//!
//! Every section has defaults, so a configuration file only needs to list
//! the values it changes:
//!
//! ```json
//! {
//!     "controller": { "start_threshold": -0.8, "cooldown_ms": 10000 },
//!     "source": { "url": "ws://192.168.1.20:8765" }
//! }
//! ```

use crate::error::ConfigError;
use crate::recovery::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Closed-loop controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Start entrainment when z-score drops strictly below this
    pub start_threshold: f64,
    /// Stop entrainment once z-score reaches this (>= start_threshold)
    pub stop_threshold: f64,
    /// Refractory period after a stop (ms)
    pub cooldown_ms: u64,
    /// Minimum entrainment duration before a stop is allowed (ms)
    pub min_dwell_ms: u64,
    /// Stimulus pulse frequency (Hz)
    pub frequency_hz: f64,
    /// Stimulus volume (0.0-1.0)
    pub volume: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            start_threshold: -0.5,
            stop_threshold: 0.5,
            cooldown_ms: 5000,
            min_dwell_ms: 3000,
            frequency_hz: 6.0,
            volume: 0.7,
        }
    }
}

impl ControllerConfig {
    /// Check field domains and the hysteresis invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.start_threshold.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "start_threshold",
                reason: "must be finite".to_string(),
            });
        }
        if !self.stop_threshold.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "stop_threshold",
                reason: "must be finite".to_string(),
            });
        }
        if self.stop_threshold < self.start_threshold {
            return Err(ConfigError::InvalidThresholds {
                start: self.start_threshold,
                stop: self.stop_threshold,
            });
        }
        validate_frequency(self.frequency_hz)?;
        validate_volume(self.volume)?;
        Ok(())
    }

    /// Apply a partial update, returning the merged configuration
    pub fn merged(&self, update: &ControllerConfigUpdate) -> Result<Self, ConfigError> {
        let merged = Self {
            start_threshold: update.start_threshold.unwrap_or(self.start_threshold),
            stop_threshold: update.stop_threshold.unwrap_or(self.stop_threshold),
            cooldown_ms: update.cooldown_ms.unwrap_or(self.cooldown_ms),
            min_dwell_ms: update.min_dwell_ms.unwrap_or(self.min_dwell_ms),
            frequency_hz: update.frequency_hz.unwrap_or(self.frequency_hz),
            volume: update.volume.unwrap_or(self.volume),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial controller configuration update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfigUpdate {
    pub start_threshold: Option<f64>,
    pub stop_threshold: Option<f64>,
    pub cooldown_ms: Option<u64>,
    pub min_dwell_ms: Option<u64>,
    pub frequency_hz: Option<f64>,
    pub volume: Option<f64>,
}

impl ControllerConfigUpdate {
    /// Update touching only the thresholds
    pub fn thresholds(start: f64, stop: f64) -> Self {
        Self {
            start_threshold: Some(start),
            stop_threshold: Some(stop),
            ..Default::default()
        }
    }

    /// Update touching only the stimulus parameters
    pub fn stimulus(frequency_hz: Option<f64>, volume: Option<f64>) -> Self {
        Self {
            frequency_hz,
            volume,
            ..Default::default()
        }
    }

    /// Whether the update changes stimulus frequency or volume
    pub fn touches_stimulus(&self) -> bool {
        self.frequency_hz.is_some() || self.volume.is_some()
    }
}

/// Simulated (WebSocket) metrics source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedSourceConfig {
    /// Peer address, ws:// or wss://
    pub url: String,
    /// Reconnect after a close or error
    pub auto_reconnect: bool,
    /// Reconnect budget
    pub max_reconnect_attempts: u32,
    /// Backoff unit (ms); attempt n waits n times this
    pub reconnect_base_delay_ms: u64,
    /// Connection attempt timeout (ms)
    pub connect_timeout_ms: u64,
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            connect_timeout_ms: 5000,
        }
    }
}

impl SimulatedSourceConfig {
    /// Configuration pointing at `url`
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Reconnect policy derived from the settings
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.auto_reconnect,
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
        }
    }

    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Audio stimulus output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Initial pulse frequency (Hz)
    pub frequency_hz: f64,
    /// Initial volume (0.0-1.0)
    pub volume: f64,
    /// Carrier tone frequency (Hz)
    pub carrier_hz: f64,
    /// Synthesis sample rate
    pub sample_rate: u32,
    /// Fade-out length on stop (ms)
    pub fade_out_ms: u64,
    /// Number of volume steps in the fade
    pub fade_steps: u32,
    /// Kill-switch debounce after it fires (ms)
    pub kill_switch_cooldown_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 6.0,
            volume: 0.7,
            carrier_hz: 440.0,
            sample_rate: 44_100,
            fade_out_ms: 250,
            fade_steps: 5,
            kill_switch_cooldown_ms: 500,
        }
    }
}

impl AudioConfig {
    /// Check field domains
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frequency(self.frequency_hz)?;
        validate_volume(self.volume)?;
        if !(self.carrier_hz.is_finite() && self.carrier_hz > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "carrier_hz",
                reason: format!("must be positive, got {}", self.carrier_hz),
            });
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sample_rate",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Band-power processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Raw sample rate of every channel (Hz)
    pub sample_rate: u32,
    /// Analysis window length (s)
    pub window_secs: f64,
    /// Lower edge of the band (Hz)
    pub band_low_hz: f64,
    /// Upper edge of the band (Hz)
    pub band_high_hz: f64,
    /// Band-power values kept for baseline estimation
    pub history_len: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 200,
            window_secs: 2.0,
            band_low_hz: 4.0,
            band_high_hz: 8.0,
            history_len: 300,
        }
    }
}

impl ProcessingConfig {
    /// Samples per channel window
    pub fn window_len(&self) -> usize {
        (self.window_secs * self.sample_rate as f64).round() as usize
    }

    /// Check field domains and that the band fits below Nyquist
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sample_rate",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.window_secs.is_finite() && self.window_len() >= crate::quality::MIN_CLEAN_WINDOW)
        {
            return Err(ConfigError::InvalidValue {
                field: "window_secs",
                reason: format!(
                    "window of {}s holds fewer than {} samples",
                    self.window_secs,
                    crate::quality::MIN_CLEAN_WINDOW
                ),
            });
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !(self.band_low_hz >= 0.0
            && self.band_low_hz < self.band_high_hz
            && self.band_high_hz <= nyquist)
        {
            return Err(ConfigError::InvalidValue {
                field: "band_high_hz",
                reason: format!(
                    "band {}-{} Hz must be ascending and within 0-{} Hz",
                    self.band_low_hz, self.band_high_hz, nyquist
                ),
            });
        }
        if self.history_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history_len",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub controller: ControllerConfig,
    pub source: SimulatedSourceConfig,
    pub audio: AudioConfig,
}

impl FlowConfig {
    /// Parse JSON text and validate
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file and validate
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        self.audio.validate()
    }
}

fn validate_frequency(frequency_hz: f64) -> Result<(), ConfigError> {
    if frequency_hz.is_finite() && frequency_hz > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: "frequency_hz",
            reason: format!("must be positive, got {}", frequency_hz),
        })
    }
}

fn validate_volume(volume: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: "volume",
            reason: format!("must be within 0.0-1.0, got {}", volume),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_controller_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.start_threshold, -0.5);
        assert_eq!(config.stop_threshold, 0.5);
        assert_eq!(config.cooldown_ms, 5000);
        assert_eq!(config.min_dwell_ms, 3000);
        assert_eq!(config.frequency_hz, 6.0);
        assert_eq!(config.volume, 0.7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = ControllerConfig {
            start_threshold: 1.0,
            stop_threshold: 0.0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidThresholds {
                start: 1.0,
                stop: 0.0
            })
        );
    }

    #[test]
    fn test_equal_thresholds_allowed() {
        let config = ControllerConfig {
            start_threshold: 0.0,
            stop_threshold: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_stimulus_values() {
        let bad_volume = ControllerConfig {
            volume: 1.5,
            ..Default::default()
        };
        assert!(bad_volume.validate().is_err());

        let bad_freq = ControllerConfig {
            frequency_hz: 0.0,
            ..Default::default()
        };
        assert!(bad_freq.validate().is_err());
    }

    #[test]
    fn test_merged_update() {
        let config = ControllerConfig::default();
        let merged = config
            .merged(&ControllerConfigUpdate::stimulus(Some(7.5), None))
            .unwrap();
        assert_eq!(merged.frequency_hz, 7.5);
        assert_eq!(merged.volume, 0.7);

        let bad = config.merged(&ControllerConfigUpdate::thresholds(0.6, 0.5));
        assert!(bad.is_err());
    }

    #[test]
    fn test_source_reconnect_policy() {
        let config = SimulatedSourceConfig {
            max_reconnect_attempts: 3,
            reconnect_base_delay_ms: 200,
            ..Default::default()
        };
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json() {
        let config = FlowConfig::from_json_str(
            r#"{"controller": {"start_threshold": -0.8}, "source": {"url": "ws://10.0.0.2:8765"}}"#,
        )
        .unwrap();
        assert_eq!(config.controller.start_threshold, -0.8);
        assert_eq!(config.controller.stop_threshold, 0.5);
        assert_eq!(config.source.url, "ws://10.0.0.2:8765");
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_json_validation_applies() {
        let result = FlowConfig::from_json_str(r#"{"controller": {"volume": 2.0}}"#);
        assert!(matches!(result, Err(ConfigError::InvalidValue { field: "volume", .. })));

        let result = FlowConfig::from_json_str("{ nope");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"audio": {{"fade_out_ms": 100}}}}"#).unwrap();
        file.flush().unwrap();

        let config = FlowConfig::from_file(file.path()).unwrap();
        assert_eq!(config.audio.fade_out_ms, 100);

        let missing = FlowConfig::from_file(Path::new("/nonexistent/flowstate.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_processing_defaults() {
        let config = ProcessingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_len(), 400);
    }

    #[test]
    fn test_processing_rejects_band_above_nyquist() {
        let config = ProcessingConfig {
            sample_rate: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "band_high_hz", .. })
        ));

        let short = ProcessingConfig {
            window_secs: 0.01,
            ..Default::default()
        };
        assert!(matches!(
            short.validate(),
            Err(ConfigError::InvalidValue { field: "window_secs", .. })
        ));
    }
}
