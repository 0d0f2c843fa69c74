//! Wake phrase gating
//!
//! [`WakeGate`] owns the timing and state discipline around an external
//! [`WakeWordDetector`]: when to run it, when an armed gate times out, and
//! when to fall back to idle. What counts as a phonetic match for the phrase
//! is entirely the detector's business.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::audio::{AudioFrame, calculate_rms};
use crate::config::WakeConfig;
use crate::text::similarity_ratio;
use crate::transcribe::Transcriber;
use crate::Result;

/// Audio accumulated between detector invocations (a new check runs once
/// this much fresh audio has arrived)
const CHECK_STEP: Duration = Duration::from_millis(500);

/// Windows quieter than this RMS skip detection entirely
const MIN_WINDOW_ENERGY: f32 = 0.01;

/// Detects a wake phrase in audio; fuzzy-matching policy is detector-owned
#[async_trait]
pub trait WakeWordDetector: Send {
    /// Decide whether the buffer contains the wake phrase
    ///
    /// # Errors
    ///
    /// Returns error if detection fails; the gate logs and treats a failure
    /// as no detection (arming on error would start capture unprompted)
    async fn detect(&mut self, samples: &[f32], sample_rate: u32) -> Result<bool>;
}

/// State of the wake gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Waiting for the wake phrase; content frames are not accumulated
    Idle,
    /// Wake phrase heard; speech now flows to segmentation
    Armed,
}

/// Events emitted by gate transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    /// Wake phrase detected, gate armed
    Armed,
    /// Armed too long without speech, gate returned to idle
    TimedOut,
}

/// Gates continuous listening behind a wake phrase
pub struct WakeGate {
    detector: Box<dyn WakeWordDetector>,
    state: GateState,
    armed_at: Option<Instant>,
    window: VecDeque<f32>,
    window_samples: usize,
    check_step_samples: usize,
    samples_since_check: usize,
    sample_rate: u32,
    timeout: Duration,
    reset_after_utterance: bool,
}

impl WakeGate {
    /// Create a gate around the given detector
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(detector: Box<dyn WakeWordDetector>, config: &WakeConfig, sample_rate: u32) -> Self {
        let window_samples =
            (u64::from(sample_rate) * config.window.as_millis() as u64 / 1000) as usize;
        let check_step_samples =
            (u64::from(sample_rate) * CHECK_STEP.as_millis() as u64 / 1000) as usize;

        Self {
            detector,
            state: GateState::Idle,
            armed_at: None,
            window: VecDeque::with_capacity(window_samples),
            window_samples: window_samples.max(1),
            check_step_samples: check_step_samples.max(1),
            samples_since_check: 0,
            sample_rate,
            timeout: config.timeout,
            reset_after_utterance: config.reset_after_utterance,
        }
    }

    /// Current gate state
    #[must_use]
    pub const fn state(&self) -> GateState {
        self.state
    }

    /// Whether the gate is armed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state == GateState::Armed
    }

    /// Offer a frame as wake-phrase evidence
    ///
    /// Only meaningful while idle; evidence frames never become utterance
    /// content. The frame's samples are copied into the rolling window.
    pub fn offer(&mut self, frame: &AudioFrame) {
        if self.state != GateState::Idle {
            return;
        }

        for &sample in frame.samples() {
            if self.window.len() >= self.window_samples {
                self.window.pop_front();
            }
            self.window.push_back(sample);
        }
        self.samples_since_check = self
            .samples_since_check
            .saturating_add(frame.len());
    }

    /// Whether enough fresh audio has accumulated to justify a detector run
    #[must_use]
    pub fn ready_to_check(&self) -> bool {
        self.state == GateState::Idle
            && self.samples_since_check >= self.check_step_samples
            && self.window.len() >= self.window_samples / 2
    }

    /// Run the detector over the current window
    ///
    /// Detector errors are logged and treated as no detection.
    pub async fn check(&mut self, now: Instant) -> Option<WakeEvent> {
        if self.state != GateState::Idle {
            return None;
        }
        self.samples_since_check = 0;

        let window: Vec<f32> = self.window.iter().copied().collect();
        match self.detector.detect(&window, self.sample_rate).await {
            Ok(true) => {
                tracing::info!("wake phrase detected, gate armed");
                self.state = GateState::Armed;
                self.armed_at = Some(now);
                self.window.clear();
                Some(WakeEvent::Armed)
            }
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(error = %e, "wake word detection failed");
                None
            }
        }
    }

    /// Advance the gate's timers
    ///
    /// Returns [`WakeEvent::TimedOut`] exactly once when the gate has been
    /// armed longer than the timeout without speech beginning.
    pub fn tick(&mut self, now: Instant, speech_active: bool) -> Option<WakeEvent> {
        if self.state != GateState::Armed || speech_active {
            return None;
        }

        let armed_at = self.armed_at?;
        if now.duration_since(armed_at) > self.timeout {
            tracing::debug!("wake gate timed out without speech");
            self.reset();
            return Some(WakeEvent::TimedOut);
        }

        None
    }

    /// Notify the gate that an utterance was emitted and processed
    pub fn utterance_done(&mut self) {
        if self.reset_after_utterance {
            self.reset();
        }
    }

    /// Force the gate back to idle
    pub fn reset(&mut self) {
        self.state = GateState::Idle;
        self.armed_at = None;
        self.window.clear();
        self.samples_since_check = 0;
    }
}

/// Fuzzy wake-phrase matching over transcripts
///
/// Accepts exact containment first, then word-by-word Levenshtein
/// similarity so near-miss transcriptions ("hey sotho") still match.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    words: Vec<String>,
    threshold: f32,
}

impl PhraseMatcher {
    /// Create a matcher for the given phrase
    #[must_use]
    pub fn new(phrase: &str, threshold: f32) -> Self {
        Self {
            words: phrase
                .to_lowercase()
                .split_whitespace()
                .map(ToString::to_string)
                .collect(),
            threshold,
        }
    }

    /// Similarity of the best phrase-sized word window in `transcript`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(&self, transcript: &str) -> f32 {
        if self.words.is_empty() {
            return 0.0;
        }

        let normalized = transcript.to_lowercase();
        if normalized.contains(&self.words.join(" ")) {
            return 1.0;
        }

        let transcript_words: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if transcript_words.len() < self.words.len() {
            return 0.0;
        }

        let mut best = 0.0f32;
        for window in transcript_words.windows(self.words.len()) {
            let score: f32 = self
                .words
                .iter()
                .zip(window)
                .map(|(expected, got)| similarity_ratio(expected, got))
                .sum::<f32>()
                / self.words.len() as f32;
            best = best.max(score);
        }

        best
    }

    /// Whether the transcript matches the phrase
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        let score = self.similarity(transcript);
        if score >= self.threshold {
            tracing::debug!(score, transcript, "wake phrase matched");
            true
        } else {
            if score > 0.5 {
                tracing::trace!(score, transcript, "wake phrase near miss");
            }
            false
        }
    }
}

/// Wake detection by transcribing the window and fuzzy-matching the phrase
///
/// A local energy screen runs first so quiet windows never hit the
/// transcriber.
pub struct TranscriberWakeDetector {
    transcriber: Arc<dyn Transcriber>,
    matcher: PhraseMatcher,
}

impl TranscriberWakeDetector {
    /// Default phrase-similarity threshold
    pub const DEFAULT_THRESHOLD: f32 = 0.7;

    /// Create a detector for the given phrase
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, phrase: &str, threshold: f32) -> Self {
        Self {
            transcriber,
            matcher: PhraseMatcher::new(phrase, threshold),
        }
    }
}

#[async_trait]
impl WakeWordDetector for TranscriberWakeDetector {
    async fn detect(&mut self, samples: &[f32], sample_rate: u32) -> Result<bool> {
        if samples.is_empty() || calculate_rms(samples) < MIN_WINDOW_ENERGY {
            return Ok(false);
        }

        let transcript = self
            .transcriber
            .transcribe(samples, sample_rate, Some("en"))
            .await?;

        Ok(self.matcher.matches(&transcript))
    }
}
