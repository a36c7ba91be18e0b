// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Band-power processing
//!
//! Turns raw multi-channel signal into [`MetricsSample`]s:
//!
//! 1. Each channel keeps a rolling window of its latest samples.
//! 2. A full window is mean-removed, scored with [`quality::evaluate`] and
//!    checked with [`quality::is_clean`]. Dirty channels are left out of
//!    the band power but still count towards the epoch's quality.
//! 3. Band power is the mean FFT power of the bins inside the band,
//!    averaged over the clean channels.
//! 4. The z-score is measured against a [`Baseline`]. A [`Calibration`]
//!    only accepts epochs whose quality is sufficient for calibration.

use crate::config::ProcessingConfig;
use crate::error::{CalibrationError, ConfigError};
use crate::protocol::MetricsSample;
use crate::quality;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Fewest band-power values a baseline is computed from
pub const MIN_BASELINE_EPOCHS: usize = 10;

/// FFT band-power estimator for fixed-length windows
pub struct BandPowerAnalyzer {
    len: usize,
    sample_rate: f64,
    low_hz: f64,
    high_hz: f64,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl BandPowerAnalyzer {
    /// Plan an FFT of `window_len` points for the `low_hz..=high_hz` band
    pub fn new(window_len: usize, sample_rate: f64, low_hz: f64, high_hz: f64) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_len);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            len: window_len,
            sample_rate,
            low_hz,
            high_hz,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); window_len],
            scratch,
        }
    }

    /// Hz per FFT bin
    pub fn frequency_resolution(&self) -> f64 {
        self.sample_rate / self.len as f64
    }

    /// Mean power of the in-band bins of a mean-removed window
    ///
    /// Power is normalized by the squared window length, so a sine of
    /// amplitude `a` on an exact bin contributes `a² / 4`. Only the first
    /// `window_len` samples are used; a shorter window yields `None`.
    pub fn band_power(&mut self, window: &[f64]) -> Option<f64> {
        if self.len == 0 || window.len() < self.len {
            return None;
        }
        let window = &window[..self.len];
        let mean = window.iter().sum::<f64>() / self.len as f64;
        for (slot, &x) in self.buffer.iter_mut().zip(window) {
            *slot = Complex::new(x - mean, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let resolution = self.frequency_resolution();
        let (low, high) = (self.low_hz, self.high_hz);
        let norm = 1.0 / (self.len as f64).powi(2);

        let (sum, bins) = self.buffer[..=self.len / 2]
            .iter()
            .enumerate()
            .filter(|(k, _)| {
                let freq = *k as f64 * resolution;
                freq >= low && freq <= high
            })
            .fold((0.0, 0usize), |(sum, bins), (_, c)| {
                (sum + c.norm_sqr() * norm, bins + 1)
            });

        (bins > 0).then(|| sum / bins as f64)
    }
}

/// Personal baseline of band power
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std: f64,
}

impl Baseline {
    /// Baseline from explicit statistics; the spread must be positive
    pub fn new(mean: f64, std: f64) -> Result<Self, CalibrationError> {
        if mean.is_finite() && std.is_finite() && std > 0.0 {
            Ok(Self { mean, std })
        } else {
            Err(CalibrationError::Degenerate { mean, std })
        }
    }

    /// Mean and population standard deviation of `powers`
    pub fn from_powers(powers: &[f64]) -> Result<Self, CalibrationError> {
        if powers.len() < MIN_BASELINE_EPOCHS {
            return Err(CalibrationError::InsufficientData {
                accepted: powers.len(),
                required: MIN_BASELINE_EPOCHS,
            });
        }
        let n = powers.len() as f64;
        let mean = powers.iter().sum::<f64>() / n;
        let variance = powers.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        Self::new(mean, variance.sqrt())
    }

    /// Band power in standard deviations from the mean
    pub fn z_score(&self, power: f64) -> f64 {
        (power - self.mean) / self.std
    }
}

/// Result of analysing the current channel windows
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch {
    /// Band power over the clean channels, `None` if every channel was rejected
    pub band_power: Option<f64>,
    /// Mean quality score of the analysed channels
    pub signal_quality: f64,
    /// Channels with a full window
    pub channels: usize,
    /// Channels that passed artifact rejection
    pub clean_channels: usize,
}

impl Epoch {
    /// Has a band power and a quality score good enough to calibrate from
    pub fn usable_for_calibration(&self) -> bool {
        self.band_power.is_some() && quality::sufficient_for_calibration(self.signal_quality)
    }

    /// Quality low enough that the baseline should be re-established
    pub fn needs_recalibration(&self) -> bool {
        quality::should_prompt_recalibration(self.signal_quality)
    }
}

/// Quality-gated collection of band-power values for a baseline
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    powers: Vec<f64>,
    rejected: usize,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the epoch's band power if it is usable; returns whether it was kept
    pub fn offer(&mut self, epoch: &Epoch) -> bool {
        match epoch.band_power {
            Some(power) if epoch.usable_for_calibration() => {
                self.powers.push(power);
                true
            }
            _ => {
                self.rejected += 1;
                false
            }
        }
    }

    pub fn accepted(&self) -> usize {
        self.powers.len()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Baseline from the accepted epochs
    pub fn finish(&self) -> Result<Baseline, CalibrationError> {
        Baseline::from_powers(&self.powers)
    }
}

/// Rolling multi-channel band-power processor
pub struct BandProcessor {
    config: ProcessingConfig,
    analyzer: BandPowerAnalyzer,
    windows: BTreeMap<String, VecDeque<f64>>,
    history: VecDeque<f64>,
    baseline: Option<Baseline>,
}

impl BandProcessor {
    /// Create a processor with empty windows and no baseline
    pub fn new(config: ProcessingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let analyzer = BandPowerAnalyzer::new(
            config.window_len(),
            config.sample_rate as f64,
            config.band_low_hz,
            config.band_high_hz,
        );
        Ok(Self {
            history: VecDeque::with_capacity(config.history_len),
            config,
            analyzer,
            windows: BTreeMap::new(),
            baseline: None,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Append raw samples to one channel's window
    pub fn push(&mut self, channel: &str, samples: &[f64]) {
        let len = self.config.window_len();
        let window = self
            .windows
            .entry(channel.to_string())
            .or_insert_with(|| VecDeque::with_capacity(len));
        for &sample in samples {
            if window.len() == len {
                window.pop_front();
            }
            window.push_back(sample);
        }
    }

    /// Append one chunk per channel, naming channels `ch0`, `ch1`, ...
    pub fn push_chunk(&mut self, chunk: &[Vec<f64>]) {
        for (index, samples) in chunk.iter().enumerate() {
            self.push(&format!("ch{}", index), samples);
        }
    }

    /// Analyse the full channel windows
    ///
    /// Returns `None` until at least one channel window is full. A band
    /// power is appended to the history.
    pub fn epoch(&mut self) -> Option<Epoch> {
        let len = self.config.window_len();
        let mut channels = 0usize;
        let mut score_sum = 0.0;
        let mut powers = Vec::new();

        for (name, window) in &self.windows {
            if window.len() < len {
                continue;
            }
            channels += 1;

            let mean = window.iter().sum::<f64>() / len as f64;
            let centered: Vec<f64> = window.iter().map(|s| s - mean).collect();
            score_sum += quality::evaluate(&centered).score;

            if !quality::is_clean(&centered) {
                debug!(channel = %name, "Channel window rejected");
                continue;
            }
            if let Some(power) = self.analyzer.band_power(&centered) {
                powers.push(power);
            }
        }

        if channels == 0 {
            return None;
        }

        let band_power =
            (!powers.is_empty()).then(|| powers.iter().sum::<f64>() / powers.len() as f64);
        if let Some(power) = band_power {
            if self.history.len() == self.config.history_len {
                self.history.pop_front();
            }
            self.history.push_back(power);
        }

        Some(Epoch {
            band_power,
            signal_quality: score_sum / channels as f64,
            channels,
            clean_channels: powers.len(),
        })
    }

    /// Number of band-power values in the history
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    pub fn set_baseline(&mut self, baseline: Baseline) {
        info!(mean = baseline.mean, std = baseline.std, "Baseline established");
        self.baseline = Some(baseline);
    }

    /// Establish the baseline from the accepted epochs of a calibration
    pub fn calibrate(&mut self, calibration: &Calibration) -> Result<Baseline, CalibrationError> {
        let baseline = calibration.finish()?;
        self.set_baseline(baseline);
        Ok(baseline)
    }

    /// Establish the baseline from the band-power history
    pub fn calibrate_from_history(&mut self) -> Result<Baseline, CalibrationError> {
        let powers: Vec<f64> = self.history.iter().copied().collect();
        let baseline = Baseline::from_powers(&powers)?;
        self.set_baseline(baseline);
        Ok(baseline)
    }

    /// Metrics sample for an epoch, if it has a band power and a baseline exists
    pub fn to_sample(&self, epoch: &Epoch, timestamp: u64) -> Option<MetricsSample> {
        let baseline = self.baseline?;
        let power = epoch.band_power?;
        Some(MetricsSample::new(
            timestamp,
            power,
            baseline.z_score(power),
            epoch.signal_quality,
        ))
    }

    /// Analyse the current windows into a metrics sample
    pub fn sample(&mut self, timestamp: u64) -> Option<MetricsSample> {
        let epoch = self.epoch()?;
        self.to_sample(&epoch, timestamp)
    }
}
