// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Closed-loop controller
//!
//! Hysteresis state machine between a [`MetricsSource`] and a
//! [`StimulusOutput`].
//!
//! ```text
//!            start()              z < start             z >= stop and dwell >= min
//!   Idle ------------> Monitoring -----------> Entraining --------------------------> Cooldown
//!    ^                     ^                       ^                                     |
//!    |                     |                       +---- cooldown over and z < start ----+
//!    |                     +------------------ cooldown over, z >= start ----------------+
//!    +---- stop() from any state
//! ```
//!
//! Source callbacks push events into an ordered queue drained by a single
//! task, so samples are processed one at a time and to completion. A lost
//! connection stops the stimulus and falls back to monitoring.

use crate::clock::{Clock, SystemClock};
use crate::config::{ControllerConfig, ControllerConfigUpdate};
use crate::error::{ConfigError, FlowError};
use crate::ids::InstanceId;
use crate::protocol::MetricsSample;
use crate::registry::{Callback, ObserverRegistry};
use crate::source::{ConnectionCallback, ConnectionState, MetricsCallback, MetricsSource};
use crate::stimulus::StimulusOutput;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    /// Not subscribed to anything
    #[default]
    Idle,
    /// Subscribed, stimulus off
    Monitoring,
    /// Subscribed, stimulus on
    Entraining,
    /// Subscribed, stimulus off, refractory period running
    Cooldown,
}

impl ControllerState {
    /// Name used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Entraining => "entraining",
            Self::Cooldown => "cooldown",
        }
    }

    /// Numeric code for gauges
    pub fn code(&self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::Monitoring => 1,
            Self::Entraining => 2,
            Self::Cooldown => 3,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivered to state observers on every transition
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// State before the transition
    pub previous: ControllerState,
    /// State after the transition
    pub state: ControllerState,
    /// Sample that caused the transition, if any
    pub metrics: Option<MetricsSample>,
}

/// State observer callback
pub type StateCallback = Callback<StateChange>;

/// Controller metrics observer callback
pub type ControllerMetricsCallback = Callback<MetricsSample>;

#[derive(Debug)]
enum ControllerEvent {
    Metrics(MetricsSample),
    Connection(ConnectionState),
}

#[derive(Debug, Default)]
struct Timing {
    state: ControllerState,
    entrainment_start: Option<u64>,
    cooldown_end: Option<u64>,
}

impl Timing {
    fn clear(&mut self) {
        self.entrainment_start = None;
        self.cooldown_end = None;
    }
}

struct Session {
    metrics_cb: MetricsCallback,
    connection_cb: ConnectionCallback,
    pump: JoinHandle<()>,
}

struct Core {
    id: InstanceId,
    source: Arc<dyn MetricsSource>,
    output: Arc<dyn StimulusOutput>,
    clock: Arc<dyn Clock>,
    config: Mutex<ControllerConfig>,
    timing: tokio::sync::Mutex<Timing>,
    /// Readable without waiting on in-flight processing
    state: Mutex<ControllerState>,
    state_observers: ObserverRegistry<StateChange>,
    metrics_observers: ObserverRegistry<MetricsSample>,
    entrainment_count: AtomicU64,
}

impl Core {
    fn config(&self) -> ControllerConfig {
        lock(&self.config).clone()
    }

    fn transition(
        &self,
        timing: &mut Timing,
        next: ControllerState,
        metrics: Option<&MetricsSample>,
    ) {
        let previous = timing.state;
        if previous == next {
            return;
        }
        timing.state = next;
        *lock(&self.state) = next;

        info!(id = %self.id, from = %previous, to = %next, "Controller state change");
        self.state_observers.notify(&StateChange {
            previous,
            state: next,
            metrics: metrics.cloned(),
        });
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ControllerEvent::Metrics(sample) => self.process_metrics(&sample).await,
                ControllerEvent::Connection(state) => self.handle_connection_state(state).await,
            }
        }
    }

    async fn process_metrics(&self, sample: &MetricsSample) {
        let mut timing = self.timing.lock().await;
        if timing.state == ControllerState::Idle {
            trace!(id = %self.id, "Ignoring sample while idle");
            return;
        }

        self.metrics_observers.notify(sample);

        let config = self.config();
        let now = self.clock.now_ms();
        let z = sample.z_score;

        match timing.state {
            ControllerState::Idle => {}
            ControllerState::Monitoring => {
                if z < config.start_threshold {
                    self.begin_entrainment(&mut timing, &config, now, sample)
                        .await;
                }
            }
            ControllerState::Entraining => {
                if z >= config.stop_threshold {
                    let started = timing.entrainment_start.unwrap_or(now);
                    let dwell = now.saturating_sub(started);
                    if dwell >= config.min_dwell_ms {
                        self.end_entrainment(&mut timing, &config, now, sample).await;
                    } else {
                        debug!(
                            id = %self.id,
                            dwell_ms = dwell,
                            min_dwell_ms = config.min_dwell_ms,
                            "Stop threshold reached, holding for minimum dwell"
                        );
                    }
                }
            }
            ControllerState::Cooldown => {
                let end = timing.cooldown_end.unwrap_or(now);
                if now >= end {
                    timing.cooldown_end = None;
                    if z < config.start_threshold {
                        self.begin_entrainment(&mut timing, &config, now, sample)
                            .await;
                    } else {
                        self.transition(&mut timing, ControllerState::Monitoring, Some(sample));
                    }
                }
            }
        }
    }

    async fn begin_entrainment(
        &self,
        timing: &mut Timing,
        config: &ControllerConfig,
        now: u64,
        sample: &MetricsSample,
    ) {
        timing.entrainment_start = Some(now);

        match self
            .output
            .play(Some(config.frequency_hz), Some(config.volume))
            .await
        {
            Ok(()) => {
                self.entrainment_count.fetch_add(1, Ordering::SeqCst);
                info!(
                    id = %self.id,
                    z_score = sample.z_score,
                    frequency_hz = config.frequency_hz,
                    "Entrainment started"
                );
                self.transition(timing, ControllerState::Entraining, Some(sample));
            }
            Err(e) => {
                error!(id = %self.id, error = %e, "Stimulus failed to start, staying in monitoring");
                timing.entrainment_start = None;
                self.transition(timing, ControllerState::Monitoring, Some(sample));
            }
        }
    }

    async fn end_entrainment(
        &self,
        timing: &mut Timing,
        config: &ControllerConfig,
        now: u64,
        sample: &MetricsSample,
    ) {
        if let Err(e) = self.output.stop().await {
            warn!(id = %self.id, error = %e, "Stimulus stop failed");
        }

        timing.entrainment_start = None;
        timing.cooldown_end = Some(now.saturating_add(config.cooldown_ms));
        info!(
            id = %self.id,
            z_score = sample.z_score,
            cooldown_ms = config.cooldown_ms,
            "Entrainment ended"
        );
        self.transition(timing, ControllerState::Cooldown, Some(sample));
    }

    async fn handle_connection_state(&self, connection: ConnectionState) {
        let mut timing = self.timing.lock().await;
        if timing.state == ControllerState::Idle {
            return;
        }
        if !connection.is_lost() {
            debug!(id = %self.id, %connection, "Source connection update");
            return;
        }

        warn!(id = %self.id, %connection, state = %timing.state, "Source connection lost, stopping stimulus");
        if let Err(e) = self.output.stop().await {
            warn!(id = %self.id, error = %e, "Stimulus stop failed");
        }
        timing.clear();
        self.transition(&mut timing, ControllerState::Monitoring, None);
    }
}

/// Closed-loop entrainment controller
pub struct ClosedLoopController {
    core: Arc<Core>,
    lifecycle: tokio::sync::Mutex<()>,
    session: Mutex<Option<Session>>,
}

impl ClosedLoopController {
    /// Create a controller using the system clock
    pub fn new(
        id: InstanceId,
        source: Arc<dyn MetricsSource>,
        output: Arc<dyn StimulusOutput>,
        config: ControllerConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(id, source, output, config, Arc::new(SystemClock))
    }

    /// Create a controller with an explicit clock
    pub fn with_clock(
        id: InstanceId,
        source: Arc<dyn MetricsSource>,
        output: Arc<dyn StimulusOutput>,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(Core {
                id,
                source,
                output,
                clock,
                config: Mutex::new(config),
                timing: tokio::sync::Mutex::new(Timing::default()),
                state: Mutex::new(ControllerState::Idle),
                state_observers: ObserverRegistry::new("controller.state"),
                metrics_observers: ObserverRegistry::new("controller.metrics"),
                entrainment_count: AtomicU64::new(0),
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
        })
    }

    /// Instance identifier
    pub fn id(&self) -> InstanceId {
        self.core.id
    }

    /// Current state
    pub fn state(&self) -> ControllerState {
        *lock(&self.core.state)
    }

    /// Current configuration
    pub fn config(&self) -> ControllerConfig {
        self.core.config()
    }

    /// Number of entrainment sessions started
    pub fn entrainment_count(&self) -> u64 {
        self.core.entrainment_count.load(Ordering::SeqCst)
    }

    /// Subscribe to the source and begin monitoring
    ///
    /// A no-op (with a warning) when already running or when another
    /// `start()` is in progress. Fails only if the source rejects its
    /// configuration; the controller then stays idle.
    pub async fn start(&self) -> Result<(), FlowError> {
        let Ok(_guard) = self.lifecycle.try_lock() else {
            warn!(id = %self.core.id, "Start ignored, lifecycle change in progress");
            return Ok(());
        };
        if self.state() != ControllerState::Idle {
            warn!(id = %self.core.id, state = %self.state(), "Start ignored, controller already running");
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let metrics_tx = tx.clone();
        let metrics_cb: MetricsCallback = Arc::new(move |sample: &MetricsSample| {
            let _ = metrics_tx.send(ControllerEvent::Metrics(sample.clone()));
        });
        let connection_cb: ConnectionCallback = Arc::new(move |state: &ConnectionState| {
            let _ = tx.send(ControllerEvent::Connection(*state));
        });
        let pump = tokio::spawn(Arc::clone(&self.core).pump(rx));

        self.core.source.register_metrics(Arc::clone(&metrics_cb));
        self.core
            .source
            .register_connection_state(Arc::clone(&connection_cb));

        if let Err(e) = self.core.source.start().await {
            error!(id = %self.core.id, error = %e, "Metrics source failed to start");
            self.core.source.unregister_metrics(&metrics_cb);
            self.core.source.unregister_connection_state(&connection_cb);
            pump.abort();
            return Err(e.into());
        }

        *lock(&self.session) = Some(Session {
            metrics_cb,
            connection_cb,
            pump,
        });

        let mut timing = self.core.timing.lock().await;
        timing.clear();
        self.core
            .transition(&mut timing, ControllerState::Monitoring, None);
        Ok(())
    }

    /// Stop the stimulus, unsubscribe, stop the source and return to idle
    ///
    /// Failures along the way are logged and never abort the shutdown.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        // Waits for in-flight sample processing; nothing new runs after this.
        let mut timing = self.core.timing.lock().await;

        let session = lock(&self.session).take();
        if session.is_none() && timing.state == ControllerState::Idle {
            debug!(id = %self.core.id, "Stop ignored, controller idle");
            return;
        }

        if let Err(e) = self.core.output.stop().await {
            warn!(id = %self.core.id, error = %e, "Stimulus stop failed during shutdown");
        }

        if let Some(session) = &session {
            self.core.source.unregister_metrics(&session.metrics_cb);
            self.core
                .source
                .unregister_connection_state(&session.connection_cb);
        }
        if let Err(e) = self.core.source.stop().await {
            warn!(id = %self.core.id, error = %e, "Metrics source stop failed during shutdown");
        }
        if let Some(session) = session {
            session.pump.abort();
        }

        timing.clear();
        self.core
            .transition(&mut timing, ControllerState::Idle, None);
    }

    /// Run one sample through the state machine
    pub async fn process_metrics(&self, sample: &MetricsSample) {
        self.core.process_metrics(sample).await;
    }

    /// React to a source connection state change
    pub async fn handle_connection_state(&self, state: ConnectionState) {
        self.core.handle_connection_state(state).await;
    }

    /// Apply a partial configuration update
    ///
    /// Invalid updates are rejected as a whole. Stimulus changes are pushed
    /// to the output at once while entraining; thresholds and timings apply
    /// from the next sample.
    pub async fn update_config(&self, update: ControllerConfigUpdate) -> Result<(), ConfigError> {
        let timing = self.core.timing.lock().await;
        let merged = self.core.config().merged(&update)?;
        *lock(&self.core.config) = merged.clone();
        info!(id = %self.core.id, ?update, "Controller configuration updated");

        if timing.state == ControllerState::Entraining {
            if update.frequency_hz.is_some() {
                if let Err(e) = self.core.output.set_frequency(merged.frequency_hz).await {
                    warn!(id = %self.core.id, error = %e, "Frequency not applied to live stimulus");
                }
            }
            if update.volume.is_some() {
                if let Err(e) = self.core.output.set_volume(merged.volume).await {
                    warn!(id = %self.core.id, error = %e, "Volume not applied to live stimulus");
                }
            }
        }
        Ok(())
    }

    /// Add a state observer; returns false if already registered
    pub fn register_state_observer(&self, callback: StateCallback) -> bool {
        self.core.state_observers.add(callback)
    }

    /// Remove a state observer
    pub fn unregister_state_observer(&self, callback: &StateCallback) -> bool {
        self.core.state_observers.remove(callback)
    }

    /// Add an observer receiving every sample the controller processes
    pub fn register_metrics_observer(&self, callback: ControllerMetricsCallback) -> bool {
        self.core.metrics_observers.add(callback)
    }

    /// Remove a metrics observer
    pub fn unregister_metrics_observer(&self, callback: &ControllerMetricsCallback) -> bool {
        self.core.metrics_observers.remove(callback)
    }
}

impl Drop for ClosedLoopController {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            self.core.source.unregister_metrics(&session.metrics_cb);
            self.core
                .source
                .unregister_connection_state(&session.connection_cb);
            session.pump.abort();
        }
    }
}

impl fmt::Debug for ClosedLoopController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosedLoopController")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .finish()
    }
}
