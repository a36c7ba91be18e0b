// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Audio stimulus output
//!
//! Plays an isochronic tone loop through a [`Player`].
//!
//! ## Serialization
//!
//! `play`, `stop`, `set_frequency` and `dispose` run one at a time, in call
//! order, behind a fair async mutex. A `play` issued right after a `stop`
//! therefore starts only once the fade-out and rewind are complete. Player
//! initialization happens once; concurrent first calls wait for it.
//!
//! ## Kill-switch
//!
//! A watchdog task follows the player's status stream. Whenever the player
//! reports output while this adapter is not in [`StimulusState::Playing`]
//! (or has been disposed) the player is paused. A fade-out in progress counts
//! as intended output. After firing, the watchdog holds further reports
//! for a short cooldown so its own pause cannot retrigger it. A report held
//! this way is checked again when the cooldown ends, so a player that keeps
//! playing is still paused.

use super::player::{PlaybackStatus, Player};
use super::tone::ToneSpec;
use super::{StimulusCallback, StimulusOutput, StimulusState};
use crate::config::AudioConfig;
use crate::error::StimulusError;
use crate::ids::InstanceId;
use crate::registry::ObserverRegistry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn check_frequency(frequency_hz: f64) -> Result<(), StimulusError> {
    if frequency_hz.is_finite() && frequency_hz > 0.0 {
        Ok(())
    } else {
        Err(StimulusError::InvalidFrequency(frequency_hz))
    }
}

fn check_volume(volume: f64) -> Result<(), StimulusError> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(StimulusError::InvalidVolume(volume))
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    frequency_hz: f64,
    volume: f64,
}

struct Inner<P: Player> {
    id: InstanceId,
    player: Arc<P>,
    config: AudioConfig,
    settings: Mutex<Settings>,
    state: Mutex<StimulusState>,
    /// Pulse frequency of the loaded tone
    loaded: Mutex<Option<f64>>,
    disposed: AtomicBool,
    fading: AtomicBool,
    ops: tokio::sync::Mutex<()>,
    init: OnceCell<()>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    observers: ObserverRegistry<StimulusState>,
    kill_switch_triggers: AtomicU64,
}

impl<P: Player> Inner<P> {
    fn state(&self) -> StimulusState {
        *lock(&self.state)
    }

    fn set_state(&self, next: StimulusState) {
        {
            let mut state = lock(&self.state);
            if *state == next {
                return;
            }
            debug!(id = %self.id, from = %*state, to = %next, "Stimulus state change");
            *state = next;
        }
        self.observers.notify(&next);
    }

    fn settings(&self) -> Settings {
        *lock(&self.settings)
    }

    fn loaded(&self) -> Option<f64> {
        *lock(&self.loaded)
    }

    fn ensure_usable(&self) -> Result<(), StimulusError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(StimulusError::Disposed)
        } else {
            Ok(())
        }
    }

    async fn ensure_initialized(self: &Arc<Self>) -> Result<(), StimulusError> {
        self.init
            .get_or_try_init(|| async {
                self.player.initialize().await?;
                let status = self.player.status();
                let cooldown = Duration::from_millis(self.config.kill_switch_cooldown_ms);
                let handle =
                    tokio::spawn(Self::run_watchdog(Arc::downgrade(self), status, cooldown));
                *lock(&self.watchdog) = Some(handle);
                info!(id = %self.id, "Audio output initialized");
                Ok::<(), StimulusError>(())
            })
            .await?;
        Ok(())
    }

    async fn load_tone(&self, frequency_hz: f64) -> Result<(), StimulusError> {
        let tone = ToneSpec::new(frequency_hz, self.config.carrier_hz, self.config.sample_rate)
            .render();
        self.player.load(&tone).await?;
        *lock(&self.loaded) = Some(frequency_hz);
        debug!(id = %self.id, frequency_hz, samples = tone.len(), "Tone loaded");
        Ok(())
    }

    /// Step the volume down to silence over the configured fade time
    async fn fade_out(&self, from: f64) {
        let steps = self.config.fade_steps.max(1);
        let step_delay = Duration::from_millis(self.config.fade_out_ms) / steps;

        self.fading.store(true, Ordering::SeqCst);
        for step in 1..=steps {
            let level = from * (1.0 - step as f64 / steps as f64);
            if let Err(e) = self.player.set_volume(level).await {
                warn!(id = %self.id, error = %e, "Fade step failed, halting immediately");
                break;
            }
            tokio::time::sleep(step_delay).await;
        }
        self.fading.store(false, Ordering::SeqCst);
    }

    /// Whether the player is expected to be producing output
    fn output_expected(&self) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        match self.state() {
            StimulusState::Playing => true,
            StimulusState::Stopping => self.fading.load(Ordering::SeqCst),
            StimulusState::Idle => false,
        }
    }

    /// Pause, rewind and restore the configured volume
    async fn halt(&self) -> Result<(), StimulusError> {
        let paused = self.player.pause().await;
        if let Err(e) = self.player.seek_to_start().await {
            warn!(id = %self.id, error = %e, "Rewind failed");
        }
        let volume = self.settings().volume;
        if let Err(e) = self.player.set_volume(volume).await {
            warn!(id = %self.id, error = %e, "Volume restore failed");
        }
        paused
    }

    async fn run_watchdog(
        inner: Weak<Self>,
        mut status: watch::Receiver<PlaybackStatus>,
        cooldown: Duration,
    ) {
        let mut last_trigger: Option<Instant> = None;
        // Set while a report is waiting for the debounce window to close.
        let mut recheck: Option<Instant> = None;

        loop {
            match recheck {
                Some(at) => {
                    tokio::select! {
                        changed = status.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => {
                    if status.changed().await.is_err() {
                        break;
                    }
                }
            }
            recheck = None;

            let current = *status.borrow_and_update();
            if !current.is_playing {
                continue;
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };

            if inner.output_expected() {
                continue;
            }
            let disposed = inner.disposed.load(Ordering::SeqCst);
            let state = inner.state();

            if let Some(at) = last_trigger.filter(|at| at.elapsed() < cooldown) {
                debug!(id = %inner.id, "Kill-switch debounced, rechecking after cooldown");
                recheck = Some(at + cooldown);
                continue;
            }
            let now = Instant::now();
            last_trigger = Some(now);
            // A player that ignores the pause is caught on the next pass.
            recheck = Some(now + cooldown);
            inner.kill_switch_triggers.fetch_add(1, Ordering::SeqCst);

            warn!(
                id = %inner.id,
                %state,
                disposed,
                "Kill-switch: player output while stimulus should be off, forcing pause"
            );
            if let Err(e) = inner.player.pause().await {
                error!(id = %inner.id, error = %e, "Kill-switch pause failed");
            }
        }
    }
}

/// Isochronic audio stimulus adapter
pub struct AudioOutput<P: Player> {
    inner: Arc<Inner<P>>,
}

impl<P: Player> AudioOutput<P> {
    /// Create an adapter over `player`
    ///
    /// The player is initialized lazily on the first operation that needs it.
    pub fn new(id: InstanceId, config: AudioConfig, player: Arc<P>) -> Self {
        let settings = Settings {
            frequency_hz: config.frequency_hz,
            volume: config.volume,
        };
        Self {
            inner: Arc::new(Inner {
                id,
                player,
                config,
                settings: Mutex::new(settings),
                state: Mutex::new(StimulusState::Idle),
                loaded: Mutex::new(None),
                disposed: AtomicBool::new(false),
                fading: AtomicBool::new(false),
                ops: tokio::sync::Mutex::new(()),
                init: OnceCell::new(),
                watchdog: Mutex::new(None),
                observers: ObserverRegistry::new("stimulus.state"),
                kill_switch_triggers: AtomicU64::new(0),
            }),
        }
    }

    /// Instance identifier
    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    /// Current pulse frequency setting
    pub fn frequency(&self) -> f64 {
        self.inner.settings().frequency_hz
    }

    /// Current volume setting
    pub fn volume(&self) -> f64 {
        self.inner.settings().volume
    }

    /// Whether `dispose()` has run
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of times the kill-switch forced the player to pause
    pub fn kill_switch_triggers(&self) -> u64 {
        self.inner.kill_switch_triggers.load(Ordering::SeqCst)
    }

    /// Initialize the player ahead of the first `play`
    pub async fn prepare(&self) -> Result<(), StimulusError> {
        let _op = self.inner.ops.lock().await;
        self.inner.ensure_usable()?;
        self.inner.ensure_initialized().await
    }
}

#[async_trait]
impl<P: Player> StimulusOutput for AudioOutput<P> {
    async fn play(
        &self,
        frequency_hz: Option<f64>,
        volume: Option<f64>,
    ) -> Result<(), StimulusError> {
        if let Some(hz) = frequency_hz {
            check_frequency(hz)?;
        }
        if let Some(v) = volume {
            check_volume(v)?;
        }

        let _op = self.inner.ops.lock().await;
        self.inner.ensure_usable()?;

        {
            let mut settings = lock(&self.inner.settings);
            if let Some(hz) = frequency_hz {
                settings.frequency_hz = hz;
            }
            if let Some(v) = volume {
                settings.volume = v;
            }
        }
        let settings = self.inner.settings();

        self.inner.ensure_initialized().await?;
        if self.inner.loaded() != Some(settings.frequency_hz) {
            self.inner.load_tone(settings.frequency_hz).await?;
        }
        self.inner.player.set_volume(settings.volume).await?;

        // Playing must be visible before the player starts, or the
        // watchdog would treat our own output as a runaway.
        let previous = self.inner.state();
        self.inner.set_state(StimulusState::Playing);
        if let Err(e) = self.inner.player.play().await {
            error!(id = %self.inner.id, error = %e, "Player failed to start");
            self.inner.set_state(previous);
            return Err(e);
        }

        info!(
            id = %self.inner.id,
            frequency_hz = settings.frequency_hz,
            volume = settings.volume,
            "Stimulus playing"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), StimulusError> {
        let _op = self.inner.ops.lock().await;
        if self.is_disposed() {
            return Ok(());
        }
        if self.inner.loaded().is_none() {
            self.inner.set_state(StimulusState::Idle);
            return Ok(());
        }

        let was_playing = self.inner.state() == StimulusState::Playing;
        self.inner.set_state(StimulusState::Stopping);
        if was_playing {
            self.inner.fade_out(self.inner.settings().volume).await;
        }
        let result = self.inner.halt().await;
        self.inner.set_state(StimulusState::Idle);

        match &result {
            Ok(()) => info!(id = %self.inner.id, "Stimulus stopped"),
            Err(e) => error!(id = %self.inner.id, error = %e, "Stimulus stop failed"),
        }
        result
    }

    async fn set_frequency(&self, frequency_hz: f64) -> Result<(), StimulusError> {
        check_frequency(frequency_hz)?;

        let _op = self.inner.ops.lock().await;
        self.inner.ensure_usable()?;
        lock(&self.inner.settings).frequency_hz = frequency_hz;

        match self.inner.loaded() {
            Some(loaded) if loaded != frequency_hz => {
                let was_playing = self.inner.state() == StimulusState::Playing;
                self.inner.load_tone(frequency_hz).await?;
                if was_playing {
                    self.inner.player.play().await?;
                }
                debug!(id = %self.inner.id, frequency_hz, "Frequency applied");
            }
            _ => {}
        }
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> Result<(), StimulusError> {
        check_volume(volume)?;
        self.inner.ensure_usable()?;
        lock(&self.inner.settings).volume = volume;

        // A fade owns the player volume until `halt` restores the setting.
        if self.inner.state() == StimulusState::Stopping {
            debug!(id = %self.inner.id, volume, "Volume stored, applied after stop");
            return Ok(());
        }
        if self.inner.loaded().is_some() {
            if let Err(e) = self.inner.player.set_volume(volume).await {
                warn!(id = %self.inner.id, error = %e, "Volume change not applied");
            }
        }
        Ok(())
    }

    fn state(&self) -> StimulusState {
        self.inner.state()
    }

    fn register_state_observer(&self, callback: StimulusCallback) -> bool {
        self.inner.observers.add(callback)
    }

    fn unregister_state_observer(&self, callback: &StimulusCallback) -> bool {
        self.inner.observers.remove(callback)
    }

    async fn dispose(&self) {
        let _op = self.inner.ops.lock().await;
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.inner.loaded().is_some() {
            if let Err(e) = self.inner.player.pause().await {
                warn!(id = %self.inner.id, error = %e, "Pause during dispose failed");
            }
            if let Err(e) = self.inner.player.unload().await {
                warn!(id = %self.inner.id, error = %e, "Unload during dispose failed");
            }
            *lock(&self.inner.loaded) = None;
        }

        self.inner.set_state(StimulusState::Idle);
        self.inner.observers.clear();
        info!(id = %self.inner.id, "Audio output disposed");
    }
}

impl<P: Player> Drop for AudioOutput<P> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.inner.watchdog).take() {
            handle.abort();
        }
    }
}
