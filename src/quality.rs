// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Signal quality evaluation
//!
//! Stateless scoring of a window of raw samples. A sample is an artifact when
//! its magnitude exceeds [`AMPLITUDE_LIMIT`] or when it jumps by more than
//! [`GRADIENT_LIMIT`] from the previous sample. Both limits are inclusive:
//! a value exactly at the limit is clean.

use crate::error::QualityError;
use std::fmt;

/// Maximum clean absolute amplitude (signal units)
pub const AMPLITUDE_LIMIT: f64 = 100.0;

/// Maximum clean sample-to-sample step (signal units)
pub const GRADIENT_LIMIT: f64 = 50.0;

/// Reserved for spectral checks, not used by the score
pub const FREQUENCY_RATIO_LIMIT: f64 = 2.0;

/// Shortest window that can be judged clean
pub const MIN_CLEAN_WINDOW: usize = 10;

/// Minimum score usable for calibration
pub const CALIBRATION_MIN_SCORE: f64 = 20.0;

/// Scores below this should prompt a recalibration
pub const RECALIBRATION_SCORE: f64 = 50.0;

/// True if any sample's magnitude exceeds the amplitude limit
pub fn amplitude_artifact(samples: &[f64]) -> bool {
    samples.iter().any(|s| s.abs() > AMPLITUDE_LIMIT)
}

/// True if any consecutive step exceeds the gradient limit
///
/// Sequences shorter than two samples have no steps and are clean.
pub fn gradient_artifact(samples: &[f64]) -> bool {
    samples
        .windows(2)
        .any(|pair| (pair[1] - pair[0]).abs() > GRADIENT_LIMIT)
}

/// Percentage of samples flagged as artifacts
///
/// A sample flagged by amplitude is not checked again by gradient. The
/// gradient of the next sample is still measured against this sample's raw
/// value, so one spike can flag both itself and its successor.
pub fn artifact_percentage(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut artifacts = 0usize;
    for (i, &sample) in samples.iter().enumerate() {
        if sample.abs() > AMPLITUDE_LIMIT {
            artifacts += 1;
        } else if i > 0 && (sample - samples[i - 1]).abs() > GRADIENT_LIMIT {
            artifacts += 1;
        }
    }

    100.0 * artifacts as f64 / samples.len() as f64
}

/// Quality score from an artifact percentage, rounded to two decimals
pub fn quality_score(artifact_percentage: f64) -> Result<f64, QualityError> {
    if artifact_percentage.is_nan() {
        return Err(QualityError::NotANumber);
    }
    if artifact_percentage == f64::INFINITY {
        return Err(QualityError::PositiveInfinity);
    }
    if artifact_percentage == f64::NEG_INFINITY {
        return Err(QualityError::NegativeInfinity);
    }
    if !(0.0..=100.0).contains(&artifact_percentage) {
        return Err(QualityError::OutOfRange(artifact_percentage));
    }

    Ok(round2(100.0 - artifact_percentage))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Coarse quality band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityCategory {
    /// Below 20
    Unusable,
    /// 20 to 50
    Poor,
    /// 50 to 70
    Fair,
    /// 70 to 90
    Good,
    /// 90 and above
    Excellent,
}

impl QualityCategory {
    /// Human readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unusable => "unusable",
        }
    }
}

impl fmt::Display for QualityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Category of a quality score
pub fn quality_category(score: f64) -> QualityCategory {
    if score >= 90.0 {
        QualityCategory::Excellent
    } else if score >= 70.0 {
        QualityCategory::Good
    } else if score >= 50.0 {
        QualityCategory::Fair
    } else if score >= 20.0 {
        QualityCategory::Poor
    } else {
        QualityCategory::Unusable
    }
}

/// Whether a score is good enough to calibrate a baseline from
pub fn sufficient_for_calibration(score: f64) -> bool {
    score >= CALIBRATION_MIN_SCORE
}

/// Whether a score should prompt the user to recalibrate
pub fn should_prompt_recalibration(score: f64) -> bool {
    score < RECALIBRATION_SCORE
}

/// Dominant artifact in a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// No artifact
    Clean,
    /// At least one sample over the amplitude limit
    Amplitude,
    /// At least one step over the gradient limit
    Gradient,
}

/// Classify a window, amplitude first
pub fn classify_artifact(samples: &[f64]) -> ArtifactKind {
    if amplitude_artifact(samples) {
        ArtifactKind::Amplitude
    } else if gradient_artifact(samples) {
        ArtifactKind::Gradient
    } else {
        ArtifactKind::Clean
    }
}

/// Whether a window is long enough and free of artifacts
pub fn is_clean(samples: &[f64]) -> bool {
    samples.len() >= MIN_CLEAN_WINDOW && classify_artifact(samples) == ArtifactKind::Clean
}

/// Full evaluation of one window
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    /// Percentage of artifact samples
    pub artifact_percentage: f64,
    /// Score in [0, 100]
    pub score: f64,
    /// Category of the score
    pub category: QualityCategory,
    /// Dominant artifact
    pub artifact: ArtifactKind,
    /// Score allows calibration
    pub calibration_ok: bool,
    /// Score calls for recalibration
    pub recalibrate: bool,
}

/// Evaluate a window of raw samples
pub fn evaluate(samples: &[f64]) -> QualityReport {
    let percentage = artifact_percentage(samples);
    // Always within [0, 100] for a finite count ratio.
    let score = round2(100.0 - percentage);

    QualityReport {
        artifact_percentage: percentage,
        score,
        category: quality_category(score),
        artifact: classify_artifact(samples),
        calibration_ok: sufficient_for_calibration(score),
        recalibrate: should_prompt_recalibration(score),
    }
}
