// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Low-level playback actuator
//!
//! A [`Player`] owns one looping sound resource. The audio adapter drives it
//! and watches its [`PlaybackStatus`] stream to enforce the kill-switch.

use super::tone::ToneBuffer;
use crate::error::StimulusError;
use crate::ids::InstanceId;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::info;

/// Status reported by the actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackStatus {
    /// A sound is loaded
    pub is_loaded: bool,
    /// The actuator is producing output
    pub is_playing: bool,
}

/// Looping playback actuator
#[async_trait]
pub trait Player: Send + Sync + 'static {
    /// Prepare the audio session; called once per adapter
    async fn initialize(&self) -> Result<(), StimulusError>;

    /// Load a loop, replacing any loaded one
    async fn load(&self, tone: &ToneBuffer) -> Result<(), StimulusError>;

    /// Start or resume looping playback
    async fn play(&self) -> Result<(), StimulusError>;

    /// Pause playback
    async fn pause(&self) -> Result<(), StimulusError>;

    /// Set output gain in [0, 1]
    async fn set_volume(&self, volume: f64) -> Result<(), StimulusError>;

    /// Rewind to the start of the loop
    async fn seek_to_start(&self) -> Result<(), StimulusError>;

    /// Release the loaded sound
    async fn unload(&self) -> Result<(), StimulusError>;

    /// Subscribe to playback status updates
    fn status(&self) -> watch::Receiver<PlaybackStatus>;
}

/// Operation recorded by [`LoggingPlayer`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    Initialize,
    Load { pulse_hz: f64, samples: usize },
    Play,
    Pause,
    SetVolume(f64),
    SeekToStart,
    Unload,
}

/// Player that logs and records every call instead of producing sound
///
/// Used by the headless runner and by tests. [`LoggingPlayer::publish`]
/// injects an arbitrary status, e.g. an actuator that resumed on its own.
#[derive(Debug)]
pub struct LoggingPlayer {
    id: InstanceId,
    calls: Mutex<Vec<PlayerCall>>,
    status_tx: watch::Sender<PlaybackStatus>,
}

impl LoggingPlayer {
    /// Create a player
    pub fn new(id: InstanceId) -> Self {
        let (status_tx, _) = watch::channel(PlaybackStatus::default());
        Self {
            id,
            calls: Mutex::new(Vec::new()),
            status_tx,
        }
    }

    fn calls_lock(&self) -> MutexGuard<'_, Vec<PlayerCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: PlayerCall) {
        info!(id = %self.id, ?call, "Player");
        self.calls_lock().push(call);
    }

    fn update(&self, f: impl FnOnce(&mut PlaybackStatus)) {
        self.status_tx.send_modify(f);
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<PlayerCall> {
        self.calls_lock().clone()
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&PlayerCall) -> bool) -> usize {
        self.calls_lock().iter().filter(|c| pred(c)).count()
    }

    /// Last volume set, if any
    pub fn last_volume(&self) -> Option<f64> {
        self.calls_lock().iter().rev().find_map(|c| match c {
            PlayerCall::SetVolume(v) => Some(*v),
            _ => None,
        })
    }

    /// Current status
    pub fn current(&self) -> PlaybackStatus {
        *self.status_tx.borrow()
    }

    /// Overwrite the published status
    pub fn publish(&self, status: PlaybackStatus) {
        self.status_tx.send_replace(status);
    }
}

#[async_trait]
impl Player for LoggingPlayer {
    async fn initialize(&self) -> Result<(), StimulusError> {
        self.record(PlayerCall::Initialize);
        Ok(())
    }

    async fn load(&self, tone: &ToneBuffer) -> Result<(), StimulusError> {
        self.record(PlayerCall::Load {
            pulse_hz: tone.spec().pulse_hz,
            samples: tone.len(),
        });
        self.update(|s| {
            s.is_loaded = true;
            s.is_playing = false;
        });
        Ok(())
    }

    async fn play(&self) -> Result<(), StimulusError> {
        self.record(PlayerCall::Play);
        self.update(|s| s.is_playing = s.is_loaded);
        Ok(())
    }

    async fn pause(&self) -> Result<(), StimulusError> {
        self.record(PlayerCall::Pause);
        self.update(|s| s.is_playing = false);
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> Result<(), StimulusError> {
        self.record(PlayerCall::SetVolume(volume));
        Ok(())
    }

    async fn seek_to_start(&self) -> Result<(), StimulusError> {
        self.record(PlayerCall::SeekToStart);
        Ok(())
    }

    async fn unload(&self) -> Result<(), StimulusError> {
        self.record(PlayerCall::Unload);
        self.update(|s| {
            s.is_loaded = false;
            s.is_playing = false;
        });
        Ok(())
    }

    fn status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status_tx.subscribe()
    }
}
