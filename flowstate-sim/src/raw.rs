// FlowState Sim - Raw EEG pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Multi-channel raw EEG synthesis.
//!
//! [`SyntheticEeg`] mixes theta, alpha and beta rhythms with smoothed noise
//! and the occasional eye blink. [`RawPipeline`] runs that signal through
//! [`BandProcessor`]: it calibrates a baseline at construction, then emits
//! one metrics sample per tick.

use crate::generator::{rounded_sample, SampleGenerator};
use flowstate::{
    BandProcessor, BandState, Baseline, Calibration, FlowError, MetricsSample, ProcessingConfig,
};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::{debug, info};

/// Samples in one blink artifact.
pub const BLINK_LEN: usize = 50;

/// Peak blink deflection (µV).
pub const BLINK_PEAK: f64 = 80.0;

/// One-pole smoothing applied to white noise.
const NOISE_SMOOTHING: f64 = 0.1;

/// Raw EEG synthesis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEegConfig {
    /// Number of channels.
    pub channels: usize,
    /// Theta amplitude in the low state (µV).
    pub theta_low: f64,
    /// Theta amplitude in the normal state (µV).
    pub theta_normal: f64,
    /// Theta amplitude in the high state (µV).
    pub theta_high: f64,
    /// Alpha amplitude (µV).
    pub alpha_amplitude: f64,
    /// Beta amplitude (µV).
    pub beta_amplitude: f64,
    /// Background noise amplitude (µV).
    pub noise_amplitude: f64,
    /// Chance of a blink in each generated chunk.
    pub blink_probability: f64,
    /// Simulated seconds of normal signal used for calibration.
    pub calibration_secs: f64,
    /// Window, band and history settings.
    pub processing: ProcessingConfig,
    /// Random seed for reproducibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RawEegConfig {
    fn default() -> Self {
        Self {
            channels: 4,
            theta_low: 5.0,
            theta_normal: 15.0,
            theta_high: 25.0,
            alpha_amplitude: 10.0,
            beta_amplitude: 5.0,
            noise_amplitude: 8.0,
            blink_probability: 0.02,
            calibration_secs: 30.0,
            processing: ProcessingConfig::default(),
            seed: None,
        }
    }
}

impl RawEegConfig {
    /// Create a default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Theta amplitude for a band state.
    pub fn theta_amplitude(&self, state: BandState) -> f64 {
        match state {
            BandState::Low => self.theta_low,
            BandState::Normal => self.theta_normal,
            BandState::High => self.theta_high,
        }
    }
}

/// Multi-channel raw EEG generator.
pub struct SyntheticEeg {
    config: RawEegConfig,
    rng: StdRng,
    /// Signal time of the next sample (s)
    time: f64,
    state: BandState,
    noise: Vec<f64>,
}

impl SyntheticEeg {
    /// Create a generator in the normal state.
    pub fn new(config: RawEegConfig) -> Self {
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            noise: vec![0.0; config.channels],
            config,
            rng,
            time: 0.0,
            state: BandState::Normal,
        }
    }

    /// Current band state.
    pub fn band_state(&self) -> BandState {
        self.state
    }

    /// Change the theta amplitude.
    pub fn set_band_state(&mut self, state: BandState) {
        self.state = state;
    }

    /// Signal time of the next sample (s).
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Generate `len` samples for every channel.
    pub fn generate(&mut self, len: usize) -> Vec<Vec<f64>> {
        let rate = self.config.processing.sample_rate as f64;
        let theta = self.config.theta_amplitude(self.state);
        let noise_gain = self.config.noise_amplitude * 3.0;

        let mut chunk = Vec::with_capacity(self.config.channels);
        for ch in 0..self.config.channels {
            let offset = ch as f64;
            let theta_hz = 6.0 + 0.5 * offset.sin();
            let alpha_hz = 10.0 + 0.3 * offset;
            let beta_hz = 20.0 + offset;

            let mut samples = Vec::with_capacity(len);
            for i in 0..len {
                let t = self.time + i as f64 / rate;
                let white: f64 = self.rng.sample(StandardNormal);
                self.noise[ch] += NOISE_SMOOTHING * (white - self.noise[ch]);

                samples.push(
                    theta * (TAU * theta_hz * t + offset).sin()
                        + self.config.alpha_amplitude * (TAU * alpha_hz * t + offset * 0.5).sin()
                        + self.config.beta_amplitude * (TAU * beta_hz * t).sin()
                        + self.noise[ch] * noise_gain,
                );
            }
            chunk.push(samples);
        }
        self.time += len as f64 / rate;

        let chance = self.config.blink_probability.clamp(0.0, 1.0);
        if len >= BLINK_LEN && !chunk.is_empty() && self.rng.gen_bool(chance) {
            let start = self.rng.gen_range(0..=len - BLINK_LEN);
            let ch = self.rng.gen_range(0..chunk.len());
            let center = BLINK_LEN as f64 / 2.0;
            for j in 0..BLINK_LEN {
                let d = j as f64 - center;
                chunk[ch][start + j] += BLINK_PEAK * (-(d * d) / 100.0).exp();
            }
            debug!(channel = ch, start, "Blink injected");
        }
        chunk
    }
}

/// Synthetic raw EEG processed into metrics samples.
pub struct RawPipeline {
    eeg: SyntheticEeg,
    processor: BandProcessor,
    chunk_len: usize,
    forced: Option<BandState>,
    next_change_at: f64,
}

impl RawPipeline {
    /// Build the pipeline and calibrate its baseline on normal signal.
    ///
    /// One chunk of `sample_rate / rate_hz` samples is generated per tick.
    pub fn new(config: RawEegConfig, rate_hz: u32) -> Result<Self, FlowError> {
        let mut processor = BandProcessor::new(config.processing.clone())?;
        let chunk_len = (config.processing.sample_rate / rate_hz.max(1)).max(1) as usize;
        let ticks = (config.calibration_secs.max(0.0) * rate_hz as f64).ceil() as usize;
        let mut eeg = SyntheticEeg::new(config);

        let mut calibration = Calibration::new();
        for _ in 0..ticks {
            processor.push_chunk(&eeg.generate(chunk_len));
            if let Some(epoch) = processor.epoch() {
                calibration.offer(&epoch);
            }
        }
        let baseline = processor.calibrate(&calibration)?;
        info!(
            accepted = calibration.accepted(),
            rejected = calibration.rejected(),
            mean = baseline.mean,
            std = baseline.std,
            "Raw pipeline calibrated"
        );

        let next_change_at = eeg.time() + 10.0;
        Ok(Self {
            eeg,
            processor,
            chunk_len,
            forced: None,
            next_change_at,
        })
    }

    /// Calibrated baseline.
    pub fn baseline(&self) -> Option<Baseline> {
        self.processor.baseline()
    }

    /// Samples generated per tick and channel.
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Wander between states every 10-20 s of signal.
    fn drift_state(&mut self) {
        if self.eeg.time() < self.next_change_at {
            return;
        }
        let roll: f64 = self.eeg.rng.gen();
        let state = if roll < 0.2 {
            BandState::High
        } else if roll < 0.7 {
            BandState::Normal
        } else {
            BandState::Low
        };
        self.eeg.set_band_state(state);
        self.next_change_at = self.eeg.time() + self.eeg.rng.gen_range(10.0..20.0);
        debug!(%state, "Natural state change");
    }

    /// Generate one tick of signal and process it.
    ///
    /// `None` while the window is filling or every channel was rejected.
    pub fn sample_at(&mut self, timestamp_ms: u64) -> Option<MetricsSample> {
        match self.forced {
            Some(state) => self.eeg.set_band_state(state),
            None => self.drift_state(),
        }
        let chunk = self.eeg.generate(self.chunk_len);
        self.processor.push_chunk(&chunk);

        let epoch = self.processor.epoch()?;
        if epoch.needs_recalibration() {
            debug!(quality = epoch.signal_quality, "Signal quality calls for recalibration");
        }
        let sample = self.processor.to_sample(&epoch, timestamp_ms)?;
        let sample = rounded_sample(
            timestamp_ms,
            sample.band_power,
            sample.z_score,
            sample.signal_quality,
        );
        Some(match self.forced {
            Some(state) => sample.with_forced_state(state),
            None => sample,
        })
    }
}

impl SampleGenerator for RawPipeline {
    fn next_sample(&mut self) -> Option<MetricsSample> {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.sample_at(now)
    }

    fn forced_state(&self) -> Option<BandState> {
        self.forced
    }

    fn set_state(&mut self, state: BandState) {
        self.forced = Some(state);
    }

    fn clear_forced_state(&mut self) {
        self.forced = None;
    }
}
