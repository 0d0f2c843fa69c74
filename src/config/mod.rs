//! Configuration management for the dictation pipeline

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// How listening is activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationMode {
    /// Listening starts and stops only on explicit commands
    #[default]
    Manual,

    /// Content capture is gated behind a wake phrase
    WakeWord,

    /// Continuous listening, no gate
    AlwaysOn,
}

impl ActivationMode {
    /// Parse a mode name, falling back to `Manual` for unknown values
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "wake-word" | "wake_word" | "wakeword" => Self::WakeWord,
            "always-on" | "always_on" | "alwayson" => Self::AlwaysOn,
            _ => Self::Manual,
        }
    }
}

impl std::fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::WakeWord => write!(f, "wake-word"),
            Self::AlwaysOn => write!(f, "always-on"),
        }
    }
}

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Frame duration in milliseconds
    pub frame_ms: u64,

    /// Gain multiplier applied in the capture callback (1.0 = no boost)
    pub gain: f32,

    /// Bounded frame queue capacity (overflow drops the oldest frame)
    pub queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_ms: 20,
            gain: 1.0,
            queue_capacity: 512,
        }
    }
}

impl AudioConfig {
    /// Samples per frame at the configured rate
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_ms / 1000) as usize
    }
}

/// Segmentation configuration
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Contiguous silence that closes an active utterance
    pub silence_threshold: Duration,

    /// Utterances shorter than this are discarded, not dispatched
    pub min_utterance: Duration,

    /// Consumer loop poll interval
    pub poll_interval: Duration,

    /// Re-filter finished utterances down to detected speech spans
    pub refilter: bool,

    /// Energy threshold for the built-in RMS detector
    pub energy_threshold: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_millis(1000),
            min_utterance: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            refilter: true,
            energy_threshold: 0.03,
        }
    }
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Activation mode
    pub mode: ActivationMode,

    /// Wake phrase handed to the detector
    pub phrase: String,

    /// Disarm after this long armed with no speech
    pub timeout: Duration,

    /// Rolling window of recent audio offered to the detector
    pub window: Duration,

    /// Return to idle after each dispatched utterance
    pub reset_after_utterance: bool,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            mode: ActivationMode::Manual,
            phrase: "hey sotto".to_string(),
            timeout: Duration::from_millis(5000),
            window: Duration::from_millis(3000),
            reset_after_utterance: true,
        }
    }
}

/// Transcription cache configuration
///
/// The similarity weights and thresholds are empirically chosen defaults,
/// not derived constants — tune per deployment.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum exact-tier entries (common tier is capped at half this)
    pub max_entries: usize,

    /// Fingerprint similarity acceptance threshold
    pub similarity_threshold: f32,

    /// Weight of buffer-length similarity
    pub weight_length: f32,

    /// Weight of mean-amplitude similarity
    pub weight_mean: f32,

    /// Weight of standard-deviation similarity
    pub weight_std: f32,

    /// Weight of RMS-energy similarity
    pub weight_energy: f32,

    /// Blend factor for the dominant-frequency term when both sides have one
    pub frequency_blend: f32,

    /// Candidates below this duration ratio are never similarity matches
    pub min_duration_ratio: f32,

    /// Occurrences before a phrase is promoted to the common tier
    pub promote_threshold: u32,

    /// Persist the cache to this path (None = in-memory only)
    pub persist_path: Option<PathBuf>,

    /// Persist every N lookups
    pub persist_every: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            similarity_threshold: 0.85,
            weight_length: 0.1,
            weight_mean: 0.3,
            weight_std: 0.3,
            weight_energy: 0.3,
            frequency_blend: 0.15,
            min_duration_ratio: 0.5,
            promote_threshold: 3,
            persist_path: None,
            persist_every: 50,
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Adaptive idle-polling lower bound
    pub min_poll: Duration,

    /// Adaptive idle-polling upper bound
    pub max_poll: Duration,

    /// Transcription language hint
    pub language: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_poll: Duration::from_millis(200),
            max_poll: Duration::from_millis(1500),
            language: None,
        }
    }
}

/// Speech-to-text backend configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Provider name: "whisper" or "deepgram"
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// API key for the provider
    pub api_key: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "whisper".to_string(),
            model: "whisper-1".to_string(),
            api_key: None,
        }
    }
}

/// Sotto pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Audio capture configuration
    pub audio: AudioConfig,

    /// Segmentation configuration
    pub segmenter: SegmenterConfig,

    /// Wake word configuration
    pub wake: WakeConfig,

    /// Transcription cache configuration
    pub cache: CacheConfig,

    /// Dispatcher configuration
    pub dispatcher: DispatcherConfig,

    /// STT backend configuration
    pub stt: SttConfig,
}

impl Config {
    /// Load configuration with priority: env > toml file > default
    ///
    /// # Errors
    ///
    /// Returns error if the merged configuration fails validation
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path);

        let audio = AudioConfig {
            sample_rate: env_parse("SOTTO_SAMPLE_RATE")
                .or(fc.audio.sample_rate)
                .unwrap_or(16000),
            frame_ms: env_parse("SOTTO_FRAME_MS")
                .or(fc.audio.frame_ms)
                .unwrap_or(20),
            gain: env_parse("SOTTO_GAIN").or(fc.audio.gain).unwrap_or(1.0),
            queue_capacity: fc.audio.queue_capacity.unwrap_or(512),
        };

        let seg_default = SegmenterConfig::default();
        let segmenter = SegmenterConfig {
            silence_threshold: fc
                .segmenter
                .silence_threshold_ms
                .map_or(seg_default.silence_threshold, Duration::from_millis),
            min_utterance: fc
                .segmenter
                .min_utterance_ms
                .map_or(seg_default.min_utterance, Duration::from_millis),
            poll_interval: fc
                .segmenter
                .poll_ms
                .map_or(seg_default.poll_interval, Duration::from_millis),
            refilter: fc.segmenter.refilter.unwrap_or(seg_default.refilter),
            energy_threshold: fc
                .segmenter
                .energy_threshold
                .unwrap_or(seg_default.energy_threshold),
        };

        let wake_default = WakeConfig::default();
        let wake = WakeConfig {
            mode: std::env::var("SOTTO_ACTIVATION_MODE")
                .ok()
                .or(fc.wake.mode)
                .map_or(wake_default.mode, |s| ActivationMode::from_str_lossy(&s)),
            phrase: std::env::var("SOTTO_WAKE_PHRASE")
                .ok()
                .or(fc.wake.phrase)
                .unwrap_or(wake_default.phrase),
            timeout: fc
                .wake
                .timeout_ms
                .map_or(wake_default.timeout, Duration::from_millis),
            window: fc
                .wake
                .window_ms
                .map_or(wake_default.window, Duration::from_millis),
            reset_after_utterance: fc
                .wake
                .reset_after_utterance
                .unwrap_or(wake_default.reset_after_utterance),
        };

        let cache_default = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: fc.cache.max_entries.unwrap_or(cache_default.max_entries),
            similarity_threshold: fc
                .cache
                .similarity_threshold
                .unwrap_or(cache_default.similarity_threshold),
            weight_length: fc.cache.weight_length.unwrap_or(cache_default.weight_length),
            weight_mean: fc.cache.weight_mean.unwrap_or(cache_default.weight_mean),
            weight_std: fc.cache.weight_std.unwrap_or(cache_default.weight_std),
            weight_energy: fc.cache.weight_energy.unwrap_or(cache_default.weight_energy),
            frequency_blend: fc
                .cache
                .frequency_blend
                .unwrap_or(cache_default.frequency_blend),
            min_duration_ratio: fc
                .cache
                .min_duration_ratio
                .unwrap_or(cache_default.min_duration_ratio),
            promote_threshold: fc
                .cache
                .promote_threshold
                .unwrap_or(cache_default.promote_threshold),
            persist_path: std::env::var("SOTTO_CACHE_PATH")
                .ok()
                .map(PathBuf::from)
                .or(fc.cache.persist_path),
            persist_every: fc.cache.persist_every.unwrap_or(cache_default.persist_every),
        };

        let disp_default = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            min_poll: fc
                .dispatcher
                .min_poll_ms
                .map_or(disp_default.min_poll, Duration::from_millis),
            max_poll: fc
                .dispatcher
                .max_poll_ms
                .map_or(disp_default.max_poll, Duration::from_millis),
            language: std::env::var("SOTTO_LANGUAGE")
                .ok()
                .or(fc.dispatcher.language),
        };

        let stt_default = SttConfig::default();
        let provider = std::env::var("SOTTO_STT_PROVIDER")
            .ok()
            .or(fc.stt.provider)
            .unwrap_or(stt_default.provider);
        let api_key_env = match provider.as_str() {
            "deepgram" => "DEEPGRAM_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        let stt = SttConfig {
            api_key: std::env::var(api_key_env).ok().or(fc.stt.api_key),
            model: std::env::var("SOTTO_STT_MODEL")
                .ok()
                .or(fc.stt.model)
                .unwrap_or(stt_default.model),
            provider,
        };

        let config = Self {
            audio,
            segmenter,
            wake,
            cache,
            dispatcher,
            stt,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the merged configuration
    ///
    /// Configuration errors are fatal: they are reported before any audio
    /// processing begins.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".into()));
        }
        if self.audio.frame_ms == 0 {
            return Err(Error::Config("audio.frame_ms must be positive".into()));
        }
        if self.audio.gain < 0.0 {
            return Err(Error::Config("audio.gain must be non-negative".into()));
        }
        if self.audio.queue_capacity == 0 {
            return Err(Error::Config("audio.queue_capacity must be positive".into()));
        }
        if self.segmenter.silence_threshold.is_zero() {
            return Err(Error::Config(
                "segmenter.silence_threshold_ms must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.segmenter.energy_threshold) {
            return Err(Error::Config(
                "segmenter.energy_threshold must be within 0.0-1.0".into(),
            ));
        }
        if self.wake.mode == ActivationMode::WakeWord && self.wake.phrase.trim().is_empty() {
            return Err(Error::Config(
                "wake.phrase is required in wake-word mode".into(),
            ));
        }
        if self.wake.timeout.is_zero() {
            return Err(Error::Config("wake.timeout_ms must be positive".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(Error::Config("cache.max_entries must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(Error::Config(
                "cache.similarity_threshold must be within 0.0-1.0".into(),
            ));
        }
        let weight_sum = self.cache.weight_length
            + self.cache.weight_mean
            + self.cache.weight_std
            + self.cache.weight_energy;
        if weight_sum <= 0.0 {
            return Err(Error::Config(
                "cache similarity weights must sum to a positive value".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cache.frequency_blend) {
            return Err(Error::Config(
                "cache.frequency_blend must be within 0.0-1.0".into(),
            ));
        }
        if self.dispatcher.min_poll >= self.dispatcher.max_poll {
            return Err(Error::Config(
                "dispatcher.min_poll_ms must be below dispatcher.max_poll_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Read and parse an env var, ignoring unset or malformed values
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
