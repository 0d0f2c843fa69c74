//! TOML configuration file loading
//!
//! Supports `~/.config/omni/sotto/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SottoConfigFile {
    /// Audio capture configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Segmentation configuration
    #[serde(default)]
    pub segmenter: SegmenterFileConfig,

    /// Wake word configuration
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Transcription cache configuration
    #[serde(default)]
    pub cache: CacheFileConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherFileConfig,

    /// Speech-to-text backend configuration
    #[serde(default)]
    pub stt: SttFileConfig,
}

/// Audio capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Capture sample rate in Hz (e.g. 16000)
    pub sample_rate: Option<u32>,

    /// Frame duration in milliseconds
    pub frame_ms: Option<u64>,

    /// Gain multiplier applied at capture (1.0 = no boost)
    pub gain: Option<f32>,

    /// Bounded frame queue capacity
    pub queue_capacity: Option<usize>,
}

/// Segmentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct SegmenterFileConfig {
    /// Silence duration that closes an utterance, in milliseconds
    pub silence_threshold_ms: Option<u64>,

    /// Minimum utterance duration worth dispatching, in milliseconds
    pub min_utterance_ms: Option<u64>,

    /// Consumer loop poll interval in milliseconds
    pub poll_ms: Option<u64>,

    /// Re-filter finished utterances down to detected speech spans
    pub refilter: Option<bool>,

    /// Energy threshold for the built-in RMS detector
    pub energy_threshold: Option<f32>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Activation mode: "manual", "wake-word", or "always-on"
    pub mode: Option<String>,

    /// Wake phrase (e.g. "hey sotto")
    pub phrase: Option<String>,

    /// Disarm timeout after arming with no speech, in milliseconds
    pub timeout_ms: Option<u64>,

    /// Rolling detection window, in milliseconds
    pub window_ms: Option<u64>,

    /// Return to idle after each dispatched utterance
    pub reset_after_utterance: Option<bool>,
}

/// Transcription cache configuration
#[derive(Debug, Default, Deserialize)]
pub struct CacheFileConfig {
    /// Maximum exact-tier entries
    pub max_entries: Option<usize>,

    /// Similarity acceptance threshold (0.0-1.0)
    pub similarity_threshold: Option<f32>,

    /// Per-feature similarity weights
    pub weight_length: Option<f32>,
    pub weight_mean: Option<f32>,
    pub weight_std: Option<f32>,
    pub weight_energy: Option<f32>,

    /// Blend factor for the dominant-frequency term
    pub frequency_blend: Option<f32>,

    /// Duration-ratio floor below which candidates are skipped
    pub min_duration_ratio: Option<f32>,

    /// Occurrences before a phrase is promoted to the common tier
    pub promote_threshold: Option<u32>,

    /// Persist the cache to this path
    pub persist_path: Option<PathBuf>,

    /// Persist every N lookups
    pub persist_every: Option<u64>,
}

/// Dispatcher configuration
#[derive(Debug, Default, Deserialize)]
pub struct DispatcherFileConfig {
    /// Adaptive polling lower bound, in milliseconds
    pub min_poll_ms: Option<u64>,

    /// Adaptive polling upper bound, in milliseconds
    pub max_poll_ms: Option<u64>,

    /// Transcription language hint (e.g. "en")
    pub language: Option<String>,
}

/// Speech-to-text backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Provider: "whisper" or "deepgram"
    pub provider: Option<String>,

    /// Model identifier (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// API key (env vars take priority)
    pub api_key: Option<String>,
}

/// Default config file path: `~/.config/omni/sotto/config.toml`
fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().join("omni").join("sotto").join("config.toml"))
}

/// Load the TOML config file, returning defaults when absent or invalid
///
/// A malformed file is logged and ignored rather than failing startup;
/// explicit validation of the merged config happens in `Config::validate`.
pub fn load_config_file(path: Option<&Path>) -> SottoConfigFile {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) => p,
            None => return SottoConfigFile::default(),
        },
    };

    if !path.exists() {
        return SottoConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SottoConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SottoConfigFile::default()
        }
    }
}
