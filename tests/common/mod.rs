//! Shared helpers for integration tests

#![allow(dead_code)]

use std::time::{Duration, Instant};

use sotto::AudioFrame;

pub const SAMPLE_RATE: u32 = 16000;
pub const FRAME_MS: u64 = 20;
pub const FRAME_SAMPLES: usize = 320;

/// Generate sine wave audio samples
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
pub fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Build one 20 ms frame with the given constant amplitude, timestamped
/// `index` frames after `base`
pub fn frame_at(base: Instant, index: u64, amplitude: f32) -> AudioFrame {
    AudioFrame::new(
        vec![amplitude; FRAME_SAMPLES],
        SAMPLE_RATE,
        base + Duration::from_millis(index * FRAME_MS),
        1.0,
    )
}

/// Build a run of frames: `count` frames starting at `start_index`
pub fn frame_run(base: Instant, start_index: u64, count: u64, amplitude: f32) -> Vec<AudioFrame> {
    (0..count)
        .map(|i| frame_at(base, start_index + i, amplitude))
        .collect()
}
