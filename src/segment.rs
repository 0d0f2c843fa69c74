//! Speech segmentation
//!
//! [`Segmenter`] consumes the frame stream and cuts it into [`Utterance`]s:
//! accumulation starts on the first speech frame, trailing frames are kept
//! as natural context, and the utterance closes once silence persists past
//! the configured threshold. The silence timer runs on wall-clock time from
//! the last speech frame, so a stalled frame source closes an utterance
//! exactly like silence from the microphone would.

use std::time::{Duration, Instant};

use crate::audio::AudioFrame;
use crate::config::SegmenterConfig;
use crate::detect::SpeechDetector;

/// A bounded span of audio judged to be one continuous speech event.
///
/// Created by the segmenter, consumed exactly once by the dispatcher,
/// never mutated in between.
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<f32>,
    sample_rate: u32,
    started_at: Instant,
    ended_at: Instant,
    sequence: u64,
}

impl Utterance {
    /// The concatenated PCM samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Capture timestamp of the first accumulated frame
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Capture timestamp just past the last accumulated frame
    #[must_use]
    pub const fn ended_at(&self) -> Instant {
        self.ended_at
    }

    /// Sequence number assigned at creation; dispatch order follows it
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Audio duration derived from the accumulated sample count
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(
            f64::from(u32::try_from(self.samples.len()).unwrap_or(u32::MAX))
                / f64::from(self.sample_rate),
        )
    }

    /// Replace the audio content, keeping timing and sequence
    ///
    /// Used when re-filtering an utterance down to its speech spans.
    #[must_use]
    pub fn with_samples(self, samples: Vec<f32>) -> Self {
        Self { samples, ..self }
    }

    /// Whether the utterance holds no samples
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Mutable segmentation state, owned exclusively by the segmenter
#[derive(Debug, Default)]
struct SegmentationState {
    speech_active: bool,
    accumulator: Vec<AudioFrame>,
    last_speech: Option<Instant>,
}

impl SegmentationState {
    fn reset(&mut self) {
        self.speech_active = false;
        self.accumulator.clear();
        self.last_speech = None;
    }
}

/// Cuts the frame stream into utterances
pub struct Segmenter {
    detector: Box<dyn SpeechDetector>,
    config: SegmenterConfig,
    state: SegmentationState,
    next_sequence: u64,
}

impl Segmenter {
    /// Create a segmenter around the given speech detector
    #[must_use]
    pub fn new(detector: Box<dyn SpeechDetector>, config: SegmenterConfig) -> Self {
        Self {
            detector,
            config,
            state: SegmentationState::default(),
            next_sequence: 0,
        }
    }

    /// Whether speech is currently being accumulated
    #[must_use]
    pub const fn speech_active(&self) -> bool {
        self.state.speech_active
    }

    /// Feed one captured frame; returns an utterance when silence closes one
    ///
    /// A detector failure is non-fatal: the frame is treated as speech
    /// (fail-open) so potential speech is never silently dropped.
    pub fn feed(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let now = frame.timestamp();

        let is_speech = match self.detector.is_speech(frame.samples()) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "speech detector failed, treating frame as speech");
                true
            }
        };

        if is_speech {
            if !self.state.speech_active {
                self.state.speech_active = true;
                tracing::debug!("speech started");
            }
            self.state.last_speech = Some(now);
            self.state.accumulator.push(frame);
            return None;
        }

        if self.state.speech_active {
            // Trailing silence is kept so the utterance ends with natural
            // context instead of a hard cut
            self.state.accumulator.push(frame);
            return self.close_if_silent(now);
        }

        None
    }

    /// Close the active utterance if silence has persisted past the threshold
    ///
    /// Time, not frame arrival, is the authoritative silence signal: the
    /// pipeline calls this on every poll tick, so a stalled frame source
    /// still closes the utterance.
    pub fn check_silence(&mut self, now: Instant) -> Option<Utterance> {
        if !self.state.speech_active {
            return None;
        }
        self.close_if_silent(now)
    }

    /// Force-emit whatever is accumulated (explicit stop)
    ///
    /// The minimum-duration floor is not applied here; the caller decides
    /// whether a flushed remainder is worth dispatching.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.state.accumulator.is_empty() {
            self.state.reset();
            return None;
        }
        self.emit()
    }

    /// Run the detector's segment scan over a finished utterance and keep
    /// only the speech spans, bridging gaps up to `max_gap` samples
    ///
    /// # Errors
    ///
    /// Returns error if the detector cannot produce segments
    pub fn refilter(&mut self, utterance: &Utterance, max_gap: usize) -> crate::Result<Vec<f32>> {
        crate::detect::filter_speech(self.detector.as_mut(), utterance.samples(), max_gap)
    }

    fn close_if_silent(&mut self, now: Instant) -> Option<Utterance> {
        let last_speech = self.state.last_speech?;

        if now.duration_since(last_speech) <= self.config.silence_threshold {
            return None;
        }

        let utterance = self.emit()?;
        if utterance.duration() < self.config.min_utterance {
            tracing::debug!(
                duration_ms = utterance.duration().as_millis(),
                "discarding utterance below minimum duration"
            );
            return None;
        }
        Some(utterance)
    }

    fn emit(&mut self) -> Option<Utterance> {
        let frames = std::mem::take(&mut self.state.accumulator);
        self.state.reset();

        let first = frames.first()?;
        let last = frames.last()?;

        let started_at = first.timestamp();
        let ended_at = last.timestamp() + last.duration();
        let sample_rate = first.sample_rate();

        let mut samples = Vec::with_capacity(frames.iter().map(AudioFrame::len).sum());
        for frame in &frames {
            samples.extend_from_slice(frame.samples());
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        tracing::debug!(
            sequence,
            duration_ms = (samples.len() as u128 * 1000) / u128::from(sample_rate),
            "utterance emitted"
        );

        Some(Utterance {
            samples,
            sample_rate,
            started_at,
            ended_at,
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::EnergyDetector;

    const RATE: u32 = 16000;
    const FRAME_MS: u64 = 20;
    const FRAME_SAMPLES: usize = 320;

    fn segmenter() -> Segmenter {
        Segmenter::new(
            Box::new(EnergyDetector::new(0.03, 480)),
            SegmenterConfig::default(),
        )
    }

    fn frame_at(base: Instant, index: u64, amplitude: f32) -> AudioFrame {
        AudioFrame::new(
            vec![amplitude; FRAME_SAMPLES],
            RATE,
            base + Duration::from_millis(index * FRAME_MS),
            1.0,
        )
    }

    /// Feed 800ms silence, 500ms speech, 1200ms silence (20ms frames)
    fn run_scenario(seg: &mut Segmenter, base: Instant) -> Vec<Utterance> {
        let mut emitted = Vec::new();
        let mut index = 0u64;

        for _ in 0..40 {
            if let Some(u) = seg.feed(frame_at(base, index, 0.0)) {
                emitted.push(u);
            }
            index += 1;
        }
        for _ in 0..25 {
            if let Some(u) = seg.feed(frame_at(base, index, 0.3)) {
                emitted.push(u);
            }
            index += 1;
        }
        for _ in 0..60 {
            if let Some(u) = seg.feed(frame_at(base, index, 0.0)) {
                emitted.push(u);
            }
            index += 1;
        }

        emitted
    }

    #[test]
    fn concrete_scenario_emits_exactly_one_utterance() {
        let mut seg = segmenter();
        let base = Instant::now();

        let emitted = run_scenario(&mut seg, base);

        assert_eq!(emitted.len(), 1);
        let utterance = &emitted[0];

        // 500ms of flagged speech plus trailing silence padding, well short
        // of the full 1200ms tail
        assert!(utterance.duration() >= Duration::from_millis(500));
        assert!(utterance.duration() < Duration::from_millis(1700));

        // State reset afterwards
        assert!(!seg.speech_active());
    }

    #[test]
    fn scenario_is_idempotent_after_reset() {
        let mut seg = segmenter();
        let base = Instant::now();
        let emitted = run_scenario(&mut seg, base);
        assert_eq!(emitted.len(), 1);

        // The same trailing silence again produces nothing further
        let mut index = 125u64;
        for _ in 0..60 {
            assert!(seg.feed(frame_at(base, index, 0.0)).is_none());
            index += 1;
        }
        assert!(!seg.speech_active());
    }

    #[test]
    fn leading_silence_is_not_accumulated() {
        let mut seg = segmenter();
        let base = Instant::now();

        for i in 0..40 {
            seg.feed(frame_at(base, i, 0.0));
        }
        assert!(!seg.speech_active());

        seg.feed(frame_at(base, 40, 0.3));
        assert!(seg.speech_active());

        let utterance = seg.flush().unwrap();
        // Only the speech frame, none of the leading silence
        assert_eq!(utterance.samples().len(), FRAME_SAMPLES);
    }

    #[test]
    fn flush_duration_equals_accumulated_frames() {
        let mut seg = segmenter();
        let base = Instant::now();

        for i in 0..25 {
            assert!(seg.feed(frame_at(base, i, 0.3)).is_none());
        }

        let utterance = seg.flush().expect("accumulated speech must flush");
        assert_eq!(utterance.duration(), Duration::from_millis(25 * FRAME_MS));
        assert_eq!(utterance.samples().len(), 25 * FRAME_SAMPLES);
        assert!(!seg.speech_active());
    }

    #[test]
    fn flush_of_empty_accumulator_is_none() {
        let mut seg = segmenter();
        assert!(seg.flush().is_none());
    }

    #[test]
    fn stall_triggers_emission_via_check_silence() {
        let mut seg = segmenter();
        let base = Instant::now();

        for i in 0..30 {
            seg.feed(frame_at(base, i, 0.3));
        }
        assert!(seg.speech_active());

        // No frames arrive at all; elapsed time alone must close it
        let stalled = base + Duration::from_millis(30 * FRAME_MS + 1500);
        let utterance = seg.check_silence(stalled).expect("stall must emit");
        assert_eq!(utterance.duration(), Duration::from_millis(600));
        assert!(!seg.speech_active());

        // And only once
        assert!(seg.check_silence(stalled + Duration::from_millis(100)).is_none());
    }

    #[test]
    fn short_bursts_are_discarded() {
        let mut seg = segmenter();
        let base = Instant::now();

        // 100ms of speech, well under the 500ms floor
        for i in 0..5 {
            seg.feed(frame_at(base, i, 0.3));
        }

        let late = base + Duration::from_secs(3);
        assert!(seg.check_silence(late).is_none());
        // State still reset after the discard
        assert!(!seg.speech_active());
    }

    #[test]
    fn sequences_increase_monotonically() {
        let mut seg = segmenter();
        let base = Instant::now();

        for i in 0..30 {
            seg.feed(frame_at(base, i, 0.3));
        }
        let first = seg.flush().unwrap();

        for i in 100..130 {
            seg.feed(frame_at(base, i, 0.3));
        }
        let second = seg.flush().unwrap();

        assert!(second.sequence() > first.sequence());
    }

    #[test]
    fn detector_failure_fails_open() {
        struct BrokenDetector;

        impl SpeechDetector for BrokenDetector {
            fn is_speech(&mut self, _samples: &[f32]) -> crate::Result<bool> {
                Err(crate::Error::Detector("inference failed".to_string()))
            }

            fn segments(&mut self, _samples: &[f32]) -> crate::Result<Vec<(usize, usize)>> {
                Err(crate::Error::Detector("inference failed".to_string()))
            }
        }

        let mut seg = Segmenter::new(Box::new(BrokenDetector), SegmenterConfig::default());
        let base = Instant::now();

        // Even silent frames are treated as speech under failure
        seg.feed(frame_at(base, 0, 0.0));
        assert!(seg.speech_active());
    }

    #[test]
    fn with_samples_preserves_identity() {
        let mut seg = segmenter();
        let base = Instant::now();
        for i in 0..30 {
            seg.feed(frame_at(base, i, 0.3));
        }
        let utterance = seg.flush().unwrap();
        let sequence = utterance.sequence();

        let trimmed = utterance.with_samples(vec![0.3; 100]);
        assert_eq!(trimmed.sequence(), sequence);
        assert_eq!(trimmed.samples().len(), 100);
    }
}
