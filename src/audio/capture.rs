//! Audio capture from microphone

use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::config::AudioConfig;
use crate::{Error, Result};

use super::frame::AudioFrame;
use super::queue::FrameQueue;

/// Captures audio from the default input device and delivers fixed-duration
/// frames through a bounded [`FrameQueue`]
pub struct AudioCapture {
    #[allow(dead_code)]
    device: Device,
    stream_config: StreamConfig,
    config: AudioConfig,
    queue: Arc<FrameQueue>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports the configured sample rate
    pub fn new(config: AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let sample_rate = config.sample_rate;
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let stream_config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            frame_ms = config.frame_ms,
            gain = config.gain,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            stream_config,
            queue: Arc::new(FrameQueue::new(config.queue_capacity)),
            config,
            stream: None,
        })
    }

    /// The queue frames are delivered through
    #[must_use]
    pub fn queue(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.queue)
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let queue = Arc::clone(&self.queue);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream_config = self.stream_config.clone();
        let sample_rate = self.config.sample_rate;
        let gain = self.config.gain;
        let frame_samples = self.config.frame_samples();
        let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Gain boost with a limiter so low-output mics stay usable
                    // without clipping artifacts downstream
                    if (gain - 1.0).abs() < f32::EPSILON {
                        pending.extend_from_slice(data);
                    } else {
                        pending.extend(data.iter().map(|s| (s * gain).clamp(-1.0, 1.0)));
                    }

                    while pending.len() >= frame_samples {
                        let samples: Vec<f32> = pending.drain(..frame_samples).collect();
                        queue.push(AudioFrame::new(samples, sample_rate, Instant::now(), gain));
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

/// List input devices on the default host
///
/// # Errors
///
/// Returns error if devices cannot be enumerated
pub fn input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok(devices
        .filter_map(|d| d.name().ok())
        .collect())
}
