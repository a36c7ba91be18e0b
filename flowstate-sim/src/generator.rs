// FlowState Sim - Metrics generator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Synthetic band-power generator.
//!
//! Produces metrics samples that drift slowly around a baseline, or sit
//! firmly in one band when a state is forced through the control channel.

use flowstate::{BandState, MetricsSample};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Generator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Baseline band power (µV²).
    pub baseline_mean: f64,
    /// Baseline standard deviation used for z-scores.
    pub baseline_std: f64,
    /// Amplitude of the slow natural drift.
    pub drift_amplitude: f64,
    /// Drift phase increment per sample (radians).
    pub drift_step: f64,
    /// Natural noise as a fraction of the baseline std.
    pub noise_fraction: f64,
    /// Noise while a state is forced, as a fraction of the baseline std.
    pub forced_noise_fraction: f64,
    /// Mean signal quality.
    pub quality_mean: f64,
    /// Signal quality standard deviation.
    pub quality_std: f64,
    /// Random seed for reproducibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            baseline_mean: 10.0,
            baseline_std: 2.0,
            drift_amplitude: 3.0,
            drift_step: 0.02,
            noise_fraction: 0.3,
            forced_noise_fraction: 0.1,
            quality_mean: 85.0,
            quality_std: 5.0,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    /// Create a default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Minimum band power ever emitted.
pub const MIN_POWER: f64 = 0.1;

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Round values for the wire, keeping the band state of the exact z-score.
pub(crate) fn rounded_sample(timestamp_ms: u64, power: f64, z_score: f64, quality: f64) -> MetricsSample {
    let mut sample = MetricsSample::new(
        timestamp_ms,
        round_to(power, 2),
        round_to(z_score, 2),
        round_to(quality, 1),
    );
    sample.band_state = BandState::classify(z_score);
    sample
}

/// Sample source the server streams from and steers.
pub trait SampleGenerator: Send {
    /// Next sample, or `None` when this tick produced nothing.
    fn next_sample(&mut self) -> Option<MetricsSample>;

    /// Currently forced state, if any.
    fn forced_state(&self) -> Option<BandState>;

    /// Pin the output to one band.
    fn set_state(&mut self, state: BandState);

    /// Return to natural behaviour.
    fn clear_forced_state(&mut self);
}

/// Band-power simulator.
pub struct EegSimulator {
    config: GeneratorConfig,
    rng: StdRng,
    drift_phase: f64,
    forced: Option<BandState>,
}

impl EegSimulator {
    /// Create a simulator; unseeded configs draw from entropy.
    pub fn new(config: GeneratorConfig) -> Self {
        let mut rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let drift_phase = rng.gen_range(0.0..TAU);
        Self {
            config,
            rng,
            drift_phase,
            forced: None,
        }
    }

    /// Generator parameters.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Currently forced state, if any.
    pub fn forced_state(&self) -> Option<BandState> {
        self.forced
    }

    /// Pin the output to one band.
    pub fn set_state(&mut self, state: BandState) {
        self.forced = Some(state);
    }

    /// Return to natural drift.
    pub fn clear_forced_state(&mut self) {
        self.forced = None;
    }

    /// Draw from N(0, std); a non-positive std yields zero.
    fn gaussian(&mut self, std: f64) -> f64 {
        match Normal::new(0.0, std) {
            Ok(dist) if std > 0.0 => dist.sample(&mut self.rng),
            _ => 0.0,
        }
    }

    fn natural_power(&mut self) -> f64 {
        self.drift_phase += self.config.drift_step;
        let drift = self.config.drift_amplitude * self.drift_phase.sin();
        let noise = self.gaussian(self.config.baseline_std * self.config.noise_fraction);
        (self.config.baseline_mean + drift + noise).max(MIN_POWER)
    }

    fn forced_power(&mut self, state: BandState) -> f64 {
        let noise = self.gaussian(self.config.baseline_std * self.config.forced_noise_fraction);
        let offset = match state {
            BandState::Low => -2.0 * self.config.baseline_std,
            BandState::Normal => 0.0,
            BandState::High => 2.0 * self.config.baseline_std,
        };
        (self.config.baseline_mean + offset + noise).max(MIN_POWER)
    }

    /// Generate the sample for `timestamp_ms`.
    pub fn sample_at(&mut self, timestamp_ms: u64) -> MetricsSample {
        let power = match self.forced {
            Some(state) => self.forced_power(state),
            None => self.natural_power(),
        };
        let z_score = (power - self.config.baseline_mean) / self.config.baseline_std;

        let quality_noise = self.gaussian(self.config.quality_std);
        let quality = (self.config.quality_mean + quality_noise).clamp(0.0, 100.0);

        let sample = rounded_sample(timestamp_ms, power, z_score, quality);
        match self.forced {
            Some(state) => sample.with_forced_state(state),
            None => sample,
        }
    }

    /// Generate a sample stamped with the current wall-clock time.
    pub fn next_sample(&mut self) -> MetricsSample {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.sample_at(now)
    }
}

impl SampleGenerator for EegSimulator {
    fn next_sample(&mut self) -> Option<MetricsSample> {
        Some(EegSimulator::next_sample(self))
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
