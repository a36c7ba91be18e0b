// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Isochronic tone synthesis
//!
//! A carrier sine gated on and off at the pulse frequency. Each pulse lasts
//! half a period and is shaped by a half-sine envelope, so it starts and ends
//! at zero amplitude. Buffers always hold a whole number of pulses and can be
//! looped without a click.
//!
//! Buffers are generated at unit amplitude; volume is applied by the player.

/// Lowest accepted pulse frequency (Hz)
pub const MIN_PULSE_HZ: f64 = 1.0;
/// Highest accepted pulse frequency (Hz)
pub const MAX_PULSE_HZ: f64 = 40.0;
/// Lowest accepted carrier frequency (Hz)
pub const MIN_CARRIER_HZ: f64 = 100.0;
/// Highest accepted carrier frequency (Hz)
pub const MAX_CARRIER_HZ: f64 = 1000.0;

/// Default loop length before rounding to whole pulses (seconds)
pub const DEFAULT_LOOP_SECONDS: f64 = 1.0;

/// Parameters of an isochronic tone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    /// Pulse (entrainment) frequency, clamped to 1-40 Hz
    pub pulse_hz: f64,
    /// Carrier frequency, clamped to 100-1000 Hz
    pub carrier_hz: f64,
    /// Samples per second
    pub sample_rate: u32,
    /// Approximate loop length in seconds
    pub loop_seconds: f64,
}

impl ToneSpec {
    /// Build a spec, clamping frequencies into their accepted ranges
    pub fn new(pulse_hz: f64, carrier_hz: f64, sample_rate: u32) -> Self {
        Self {
            pulse_hz: pulse_hz.clamp(MIN_PULSE_HZ, MAX_PULSE_HZ),
            carrier_hz: carrier_hz.clamp(MIN_CARRIER_HZ, MAX_CARRIER_HZ),
            sample_rate: sample_rate.max(1),
            loop_seconds: DEFAULT_LOOP_SECONDS,
        }
    }

    /// Change the approximate loop length
    pub fn with_loop_seconds(mut self, seconds: f64) -> Self {
        self.loop_seconds = seconds.max(0.0);
        self
    }

    /// Number of whole pulses in one loop (at least one)
    pub fn pulse_count(&self) -> u32 {
        ((self.pulse_hz * self.loop_seconds).round() as u32).max(1)
    }

    /// Number of samples in one loop
    pub fn sample_count(&self) -> usize {
        let seconds = self.pulse_count() as f64 / self.pulse_hz;
        (seconds * self.sample_rate as f64).round() as usize
    }

    /// Pulse envelope at time `t` seconds, in [0, 1]
    pub fn envelope(&self, t: f64) -> f64 {
        let phase = (t * self.pulse_hz).fract();
        if phase < 0.5 {
            (phase * 2.0 * std::f64::consts::PI).sin()
        } else {
            0.0
        }
    }

    /// Render one loop
    pub fn render(&self) -> ToneBuffer {
        let rate = self.sample_rate as f64;
        let carrier_step = 2.0 * std::f64::consts::PI * self.carrier_hz;

        let samples = (0..self.sample_count())
            .map(|i| {
                let t = i as f64 / rate;
                ((carrier_step * t).sin() * self.envelope(t)) as f32
            })
            .collect();

        ToneBuffer {
            spec: *self,
            samples,
        }
    }
}

/// Rendered tone loop
#[derive(Debug, Clone, PartialEq)]
pub struct ToneBuffer {
    spec: ToneSpec,
    samples: Vec<f32>,
}

impl ToneBuffer {
    /// Parameters the buffer was rendered from
    pub fn spec(&self) -> &ToneSpec {
        &self.spec
    }

    /// Float samples in [-1, 1]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Loop duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.spec.sample_rate as f64
    }

    /// Signed 16-bit PCM, clamped and truncated toward zero
    pub fn to_pcm16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect()
    }

    /// Mono 16-bit RIFF/WAVE file
    pub fn to_wav(&self) -> Vec<u8> {
        let pcm = self.to_pcm16();
        let data_len = (pcm.len() * 2) as u32;
        let rate = self.spec.sample_rate;
        let mut out = Vec::with_capacity(44 + data_len as usize);

        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");

        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * 2).to_le_bytes()); // byte rate
        out.extend_from_slice(&2u16.to_le_bytes()); // block align
        out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for sample in pcm {
            out.extend_from_slice(&sample.to_le_bytes());
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_clamping() {
        let spec = ToneSpec::new(0.2, 5000.0, 44_100);
        assert_eq!(spec.pulse_hz, MIN_PULSE_HZ);
        assert_eq!(spec.carrier_hz, MAX_CARRIER_HZ);

        let spec = ToneSpec::new(100.0, 10.0, 44_100);
        assert_eq!(spec.pulse_hz, MAX_PULSE_HZ);
        assert_eq!(spec.carrier_hz, MIN_CARRIER_HZ);
    }

    #[test]
    fn test_whole_pulses() {
        let spec = ToneSpec::new(6.0, 440.0, 44_100);
        assert_eq!(spec.pulse_count(), 6);
        assert_eq!(spec.sample_count(), 44_100);

        // 7.5 Hz over 1s rounds to 8 pulses.
        let spec = ToneSpec::new(7.5, 440.0, 48_000);
        assert_eq!(spec.pulse_count(), 8);
        assert_eq!(spec.sample_count(), 51_200);
    }

    #[test]
    fn test_envelope_duty_cycle() {
        let spec = ToneSpec::new(5.0, 440.0, 1000);
        assert_abs_diff_eq!(spec.envelope(0.0), 0.0);
        assert_abs_diff_eq!(spec.envelope(0.05), 1.0, epsilon = 1e-9);
        assert_eq!(spec.envelope(0.15), 0.0);
        assert_eq!(spec.envelope(0.19), 0.0);
    }

    #[test]
    fn test_render_is_silent_in_off_phase() {
        let tone = ToneSpec::new(10.0, 440.0, 8000).render();
        assert_eq!(tone.len(), 8000);
        assert_abs_diff_eq!(tone.duration_secs(), 1.0);

        // Off phase of the first period.
        assert!(tone.samples()[401..800].iter().all(|&s| s == 0.0));
        assert!(tone.samples().iter().all(|s| s.abs() <= 1.0));
        assert!(tone.samples()[..400].iter().any(|s| s.abs() > 0.5));
    }

    #[test]
    fn test_wav_header() {
        let tone = ToneSpec::new(6.0, 440.0, 8000).with_loop_seconds(0.5).render();
        let wav = tone.to_wav();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]) as usize;
        assert_eq!(data_len, tone.len() * 2);
        assert_eq!(wav.len(), 44 + data_len);
    }

    #[test]
    fn test_pcm16_scaling() {
        let tone = ToneSpec::new(6.0, 440.0, 8000).render();
        let pcm = tone.to_pcm16();
        assert_eq!(pcm.len(), tone.len());
        assert!(pcm.iter().all(|&s| s > i16::MIN));
    }
}
