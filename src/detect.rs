//! Speech/no-speech classification
//!
//! The actual classifier is an external capability behind [`SpeechDetector`].
//! Several detectors can be combined with [`CompositeDetector`], which ORs
//! their verdicts: a single positive vote counts as speech, trading false
//! positives for never missing speech.

use crate::Result;
use crate::audio::calculate_rms;

/// Classifies audio as speech or non-speech
pub trait SpeechDetector: Send {
    /// Classify a buffer as containing speech
    ///
    /// # Errors
    ///
    /// Returns error if the underlying classifier fails; callers treat a
    /// failure as speech (fail-open) rather than dropping audio
    fn is_speech(&mut self, samples: &[f32]) -> Result<bool>;

    /// Locate speech spans in a full buffer, as `(start, end)` sample ranges
    ///
    /// Used when re-filtering an accumulated utterance rather than deciding
    /// frame by frame.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying classifier fails
    fn segments(&mut self, samples: &[f32]) -> Result<Vec<(usize, usize)>>;
}

/// RMS-energy speech detector
///
/// A deliberately simple classifier: anything above the energy threshold is
/// speech. It keeps the pipeline runnable without a model and serves as the
/// permissive member of a composite.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    threshold: f32,
    window_samples: usize,
}

impl EnergyDetector {
    /// Create a detector with the given RMS threshold and scan window
    #[must_use]
    pub const fn new(threshold: f32, window_samples: usize) -> Self {
        Self {
            threshold,
            window_samples,
        }
    }
}

impl SpeechDetector for EnergyDetector {
    fn is_speech(&mut self, samples: &[f32]) -> Result<bool> {
        Ok(calculate_rms(samples) > self.threshold)
    }

    fn segments(&mut self, samples: &[f32]) -> Result<Vec<(usize, usize)>> {
        let window = self.window_samples.max(1);
        let mut spans = Vec::new();
        let mut start = None;

        let mut pos = 0;
        while pos < samples.len() {
            let end = (pos + window).min(samples.len());
            let voiced = calculate_rms(&samples[pos..end]) > self.threshold;

            match (voiced, start) {
                (true, None) => start = Some(pos),
                (false, Some(s)) => {
                    spans.push((s, pos));
                    start = None;
                }
                _ => {}
            }
            pos = end;
        }

        if let Some(s) = start {
            spans.push((s, samples.len()));
        }

        Ok(spans)
    }
}

/// Combines several detectors; any positive verdict counts as speech
pub struct CompositeDetector {
    detectors: Vec<Box<dyn SpeechDetector>>,
}

impl CompositeDetector {
    /// Combine the given detectors
    #[must_use]
    pub fn new(detectors: Vec<Box<dyn SpeechDetector>>) -> Self {
        Self { detectors }
    }
}

impl SpeechDetector for CompositeDetector {
    fn is_speech(&mut self, samples: &[f32]) -> Result<bool> {
        let mut first_error = None;

        for detector in &mut self.detectors {
            match detector.is_speech(samples) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "speech detector failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        // No positive vote: surface any failure so the caller can fail
        // open rather than silently trusting a partial panel
        match first_error {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    fn segments(&mut self, samples: &[f32]) -> Result<Vec<(usize, usize)>> {
        let mut all_spans = Vec::new();
        let mut first_error = None;
        let mut any_verdict = false;

        for detector in &mut self.detectors {
            match detector.segments(samples) {
                Ok(spans) => {
                    any_verdict = true;
                    all_spans.extend(spans);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "speech detector segment scan failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match (any_verdict, first_error) {
            (true, _) => Ok(merge_spans(all_spans, 0)),
            (false, Some(e)) => Err(e),
            (false, None) => Ok(Vec::new()),
        }
    }
}

/// Merge overlapping spans, also bridging gaps up to `max_gap` samples
#[must_use]
pub fn merge_spans(mut spans: Vec<(usize, usize)>, max_gap: usize) -> Vec<(usize, usize)> {
    if spans.is_empty() {
        return spans;
    }

    spans.sort_by_key(|&(start, _)| start);

    let mut merged = Vec::with_capacity(spans.len());
    let (mut current_start, mut current_end) = spans[0];

    for (start, end) in spans.into_iter().skip(1) {
        if start <= current_end + max_gap {
            current_end = current_end.max(end);
        } else {
            merged.push((current_start, current_end));
            current_start = start;
            current_end = end;
        }
    }
    merged.push((current_start, current_end));

    merged
}

/// Keep only the detected speech spans of `samples`
///
/// Gaps up to `max_gap` samples between spans are bridged so natural
/// word boundaries survive the trim.
///
/// # Errors
///
/// Returns error if the detector fails to produce segments
pub fn filter_speech(
    detector: &mut dyn SpeechDetector,
    samples: &[f32],
    max_gap: usize,
) -> Result<Vec<f32>> {
    let spans = merge_spans(detector.segments(samples)?, max_gap);

    let mut speech = Vec::new();
    for (start, end) in spans {
        let end = end.min(samples.len());
        if start < end {
            speech.extend_from_slice(&samples[start..end]);
        }
    }

    Ok(speech)
}
