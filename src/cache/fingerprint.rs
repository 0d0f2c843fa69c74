//! Lightweight audio fingerprints for approximate-match caching
//!
//! A fingerprint summarizes a buffer with a handful of cheap statistics.
//! Two fingerprints are compared feature by feature and combined with
//! configurable weights; the defaults are empirical, not derived.

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;

/// Compact numeric summary of an audio buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFingerprint {
    /// Buffer length in samples
    pub len_samples: usize,

    /// Buffer duration in seconds
    pub duration_secs: f32,

    /// Mean absolute amplitude (the signed mean of PCM audio is ~0, which
    /// would make this feature meaningless)
    pub mean_abs: f32,

    /// Standard deviation of the samples
    pub std_dev: f32,

    /// RMS energy
    pub energy: f32,

    /// Dominant frequency estimated from zero-crossing rate, when the
    /// buffer is long enough to estimate one
    pub dominant_hz: Option<f32>,
}

impl AudioFingerprint {
    /// Minimum samples before a zero-crossing frequency estimate is usable
    const MIN_SAMPLES_FOR_FREQUENCY: usize = 256;

    /// Compute the fingerprint of a buffer
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(samples: &[f32], sample_rate: u32) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self {
                len_samples: 0,
                duration_secs: 0.0,
                mean_abs: 0.0,
                std_dev: 0.0,
                energy: 0.0,
                dominant_hz: None,
            };
        }

        let count = n as f32;
        let mean: f32 = samples.iter().sum::<f32>() / count;
        let mean_abs: f32 = samples.iter().map(|s| s.abs()).sum::<f32>() / count;
        let variance: f32 = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / count;
        let energy: f32 = (samples.iter().map(|s| s * s).sum::<f32>() / count).sqrt();

        let dominant_hz = (n >= Self::MIN_SAMPLES_FOR_FREQUENCY)
            .then(|| dominant_frequency(samples, sample_rate))
            .flatten();

        Self {
            len_samples: n,
            duration_secs: count / sample_rate as f32,
            mean_abs,
            std_dev: variance.sqrt(),
            energy,
            dominant_hz,
        }
    }

    /// Ratio of the shorter duration to the longer
    #[must_use]
    pub fn duration_ratio(&self, other: &Self) -> f32 {
        let (a, b) = (self.duration_secs, other.duration_secs);
        if a <= 0.0 || b <= 0.0 {
            return 0.0;
        }
        a.min(b) / a.max(b)
    }

    /// Weighted similarity score in `[0.0, 1.0]`
    ///
    /// Returns `None` when the buffers' durations differ too much to be the
    /// same phrase at all (the length weight alone is too small to rule
    /// that out).
    #[must_use]
    pub fn similarity(&self, other: &Self, config: &CacheConfig) -> Option<f32> {
        if self.duration_ratio(other) < config.min_duration_ratio {
            return None;
        }

        let weight_sum = config.weight_length
            + config.weight_mean
            + config.weight_std
            + config.weight_energy;
        if weight_sum <= 0.0 {
            return None;
        }

        let weighted = (config.weight_length * self.duration_ratio(other)
            + config.weight_mean * feature_similarity(self.mean_abs, other.mean_abs)
            + config.weight_std * feature_similarity(self.std_dev, other.std_dev)
            + config.weight_energy * feature_similarity(self.energy, other.energy))
            / weight_sum;

        // Blend in the dominant-frequency term when both sides carry one
        let score = match (self.dominant_hz, other.dominant_hz) {
            (Some(a), Some(b)) => {
                let blend = config.frequency_blend.clamp(0.0, 1.0);
                (1.0 - blend) * weighted + blend * feature_similarity(a, b)
            }
            _ => weighted,
        };

        Some(score.clamp(0.0, 1.0))
    }
}

/// Similarity of two non-negative scalar features as min/max
fn feature_similarity(a: f32, b: f32) -> f32 {
    let (a, b) = (a.abs(), b.abs());
    let max = a.max(b);
    if max <= f32::EPSILON {
        // Both effectively zero
        return 1.0;
    }
    (a.min(b) / max).clamp(0.0, 1.0)
}

/// Estimate the dominant frequency from the zero-crossing rate
#[allow(clippy::cast_precision_loss)]
fn dominant_frequency(samples: &[f32], sample_rate: u32) -> Option<f32> {
    if samples.len() < 2 {
        return None;
    }

    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();

    if crossings == 0 {
        return None;
    }

    let duration_secs = samples.len() as f32 / sample_rate as f32;
    // Each full cycle crosses zero twice
    Some(crossings as f32 / (2.0 * duration_secs))
}
