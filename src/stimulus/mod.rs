// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Stimulus output port
//!
//! The controller drives stimulus through [`StimulusOutput`]. The reference
//! adapter is [`AudioOutput`], which plays an isochronic tone through a
//! [`Player`] actuator.

pub mod audio;
pub mod player;
pub mod tone;

use crate::error::StimulusError;
use crate::registry::Callback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use audio::AudioOutput;
pub use player::{LoggingPlayer, PlaybackStatus, Player, PlayerCall};
pub use tone::{ToneBuffer, ToneSpec};

/// Stimulus adapter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimulusState {
    /// No output
    #[default]
    Idle,
    /// Output running
    Playing,
    /// Fading out
    Stopping,
}

impl StimulusState {
    /// Name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for StimulusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving stimulus state changes
pub type StimulusCallback = Callback<StimulusState>;

/// Port for stimulus actuators
#[async_trait]
pub trait StimulusOutput: Send + Sync {
    /// Start output, optionally changing frequency and volume first
    async fn play(&self, frequency_hz: Option<f64>, volume: Option<f64>)
        -> Result<(), StimulusError>;

    /// Stop output; safe to call in any state
    async fn stop(&self) -> Result<(), StimulusError>;

    /// Change the pulse frequency, applied at once if a tone is loaded
    async fn set_frequency(&self, frequency_hz: f64) -> Result<(), StimulusError>;

    /// Change the volume; best effort while playing
    async fn set_volume(&self, volume: f64) -> Result<(), StimulusError>;

    /// Current state
    fn state(&self) -> StimulusState;

    /// Whether output is running
    fn is_playing(&self) -> bool {
        self.state() == StimulusState::Playing
    }

    /// Add a state observer; returns false if already registered
    fn register_state_observer(&self, callback: StimulusCallback) -> bool;

    /// Remove a state observer
    fn unregister_state_observer(&self, callback: &StimulusCallback) -> bool;

    /// Release all resources; the output cannot be used afterwards
    async fn dispose(&self);
}
