//! Utterance dispatch and adaptive scheduling
//!
//! The dispatcher takes finished utterances in capture order, consults the
//! cache before paying for a transcription, and forwards results downstream
//! with a non-decreasing sequence marker. Recent transcription latencies
//! feed an adaptive idle-polling interval so a slow backend is not hammered
//! and a fast one is not starved.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::TranscriptionCache;
use crate::config::DispatcherConfig;
use crate::segment::Utterance;
use crate::transcribe::Transcriber;
use crate::{Error, Result};

/// Latency pivot: below this average, polling speeds up; above, it slows
const ADAPT_PIVOT: Duration = Duration::from_millis(500);

/// Rolling latency window size
const WINDOW_SIZE: usize = 10;

/// A transcription result forwarded downstream
#[derive(Debug, Clone)]
pub struct TranscriptResult {
    /// Transcribed text; empty when the transcriber failed
    pub text: String,

    /// Whether this is a final result for its utterance
    pub is_final: bool,

    /// Monotonically non-decreasing ordering marker
    pub sequence: u64,

    /// Whether the text came from the cache (no transcriber call)
    pub from_cache: bool,

    /// Wall-clock transcriber latency; `None` on cache hits
    pub latency: Option<Duration>,
}

/// Receives ordered transcript messages
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Deliver one result downstream
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails; the dispatcher logs and continues
    async fn deliver(&self, result: &TranscriptResult) -> Result<()>;
}

/// Writes results to stdout as JSON lines
///
/// One object per line: `{"type":"transcription","text":...,"final":...,
/// "sequence":...}` — transport-agnostic and trivially consumed by a
/// supervising process.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineSink;

#[async_trait]
impl TranscriptSink for JsonLineSink {
    async fn deliver(&self, result: &TranscriptResult) -> Result<()> {
        let message = serde_json::json!({
            "type": "transcription",
            "text": result.text,
            "final": result.is_final,
            "sequence": result.sequence,
        });

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{message}").map_err(|e| Error::Sink(e.to_string()))?;
        stdout.flush().map_err(|e| Error::Sink(e.to_string()))?;
        Ok(())
    }
}

/// Forwards results into a tokio channel (embedding and tests)
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<TranscriptResult>,
}

impl ChannelSink {
    /// Create a sink and the receiving end
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<TranscriptResult>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TranscriptSink for ChannelSink {
    async fn deliver(&self, result: &TranscriptResult) -> Result<()> {
        self.tx
            .send(result.clone())
            .map_err(|e| Error::Sink(e.to_string()))
    }
}

/// Rolling window of recent transcription latencies
#[derive(Debug)]
pub struct PerformanceWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for PerformanceWindow {
    fn default() -> Self {
        Self::new(WINDOW_SIZE)
    }
}

impl PerformanceWindow {
    /// Create a window keeping the last `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record one latency sample
    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    /// Rolling average, `None` while empty
    #[must_use]
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / u32::try_from(self.samples.len()).unwrap_or(1))
    }

    /// Number of recorded samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Dispatcher performance counters
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    /// Transcriber invocations
    pub transcriptions: u64,
    /// Results served from the cache
    pub cache_hits: u64,
    /// Transcriber failures degraded to empty results
    pub failures: u64,
    /// Rolling average transcription latency
    pub average_latency: Option<Duration>,
    /// Current adaptive idle-polling interval
    pub poll_interval: Duration,
}

/// Orchestrates utterance transcription
pub struct Dispatcher {
    cache: Arc<TranscriptionCache>,
    transcriber: Arc<dyn Transcriber>,
    sink: Arc<dyn TranscriptSink>,
    config: DispatcherConfig,
    window: PerformanceWindow,
    poll_interval: Duration,
    last_sequence: Option<u64>,
    transcriptions: u64,
    cache_hits: u64,
    failures: u64,
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        cache: Arc<TranscriptionCache>,
        transcriber: Arc<dyn Transcriber>,
        sink: Arc<dyn TranscriptSink>,
        config: DispatcherConfig,
    ) -> Self {
        let poll_interval = ADAPT_PIVOT.clamp(config.min_poll, config.max_poll);
        Self {
            cache,
            transcriber,
            sink,
            config,
            window: PerformanceWindow::default(),
            poll_interval,
            last_sequence: None,
            transcriptions: 0,
            cache_hits: 0,
            failures: 0,
        }
    }

    /// Current adaptive idle-polling interval
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            transcriptions: self.transcriptions,
            cache_hits: self.cache_hits,
            failures: self.failures,
            average_latency: self.window.average(),
            poll_interval: self.poll_interval,
        }
    }

    /// Process one utterance to completion
    ///
    /// Cache hits return without touching the transcriber. Transcriber
    /// failures never propagate: they yield an empty-text result so the
    /// pipeline keeps flowing. The cache lock is only taken around lookup
    /// and insert, never across the transcriber call.
    pub async fn dispatch(&mut self, utterance: Utterance) -> TranscriptResult {
        let sequence = utterance.sequence();
        let sample_rate = utterance.sample_rate();

        if let Some(text) = self.cache.lookup(utterance.samples(), sample_rate) {
            self.cache_hits += 1;
            tracing::info!(sequence, hits = self.cache_hits, "transcript served from cache");
            let result = TranscriptResult {
                text,
                is_final: true,
                sequence,
                from_cache: true,
                latency: None,
            };
            self.deliver(&result).await;
            return result;
        }

        let started = Instant::now();
        let text = match self
            .transcriber
            .transcribe(
                utterance.samples(),
                sample_rate,
                self.config.language.as_deref(),
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                self.failures += 1;
                tracing::error!(sequence, error = %e, "transcription failed, emitting empty result");
                String::new()
            }
        };
        let latency = started.elapsed();

        self.transcriptions += 1;
        self.window.record(latency);
        self.adapt_interval();

        if text.is_empty() {
            tracing::debug!(sequence, "empty transcript, nothing to deliver");
        } else {
            self.cache.insert(utterance.samples(), sample_rate, &text);
        }

        let result = TranscriptResult {
            text,
            is_final: true,
            sequence,
            from_cache: false,
            latency: Some(latency),
        };

        if !result.text.is_empty() {
            self.deliver(&result).await;
        }

        tracing::debug!(
            sequence,
            latency_ms = latency.as_millis(),
            poll_ms = self.poll_interval.as_millis(),
            "utterance dispatched"
        );

        result
    }

    /// Adapt the idle-polling interval to recent latency
    fn adapt_interval(&mut self) {
        let Some(average) = self.window.average() else {
            return;
        };

        self.poll_interval = if average < ADAPT_PIVOT {
            self.poll_interval.mul_f64(0.9)
        } else {
            self.poll_interval.mul_f64(1.1)
        }
        .clamp(self.config.min_poll, self.config.max_poll);
    }

    async fn deliver(&mut self, result: &TranscriptResult) {
        // Sequence markers must never decrease from the consumer's view
        if let Some(last) = self.last_sequence {
            if result.sequence < last {
                tracing::warn!(
                    sequence = result.sequence,
                    last,
                    "out-of-order result suppressed"
                );
                return;
            }
        }
        self.last_sequence = Some(result.sequence);

        if let Err(e) = self.sink.deliver(result).await {
            tracing::error!(error = %e, "downstream delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TranscriptionCache;
    use crate::config::{CacheConfig, SegmenterConfig};
    use crate::detect::EnergyDetector;
    use crate::segment::Segmenter;
    use crate::audio::AudioFrame;

    struct ScriptedTranscriber {
        responses: std::sync::Mutex<Vec<Result<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            _language: Option<&str>,
        ) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok("default".to_string())
            } else {
                responses.remove(0)
            }
        }
    }

    fn utterance(amplitude: f32, frames: usize) -> Utterance {
        let mut seg = Segmenter::new(
            Box::new(EnergyDetector::new(0.03, 480)),
            SegmenterConfig::default(),
        );
        let base = Instant::now();
        for i in 0..frames {
            let frame = AudioFrame::new(
                vec![amplitude; 320],
                16000,
                base + Duration::from_millis(i as u64 * 20),
                1.0,
            );
            seg.feed(frame);
        }
        seg.flush().expect("accumulated speech")
    }

    fn dispatcher(
        responses: Vec<Result<String>>,
        delay: Duration,
    ) -> (
        Dispatcher,
        tokio::sync::mpsc::UnboundedReceiver<TranscriptResult>,
    ) {
        let cache = Arc::new(TranscriptionCache::new(CacheConfig::default()));
        let (sink, rx) = ChannelSink::new();
        let dispatcher = Dispatcher::new(
            cache,
            Arc::new(ScriptedTranscriber {
                responses: std::sync::Mutex::new(responses),
                delay,
            }),
            Arc::new(sink),
            DispatcherConfig::default(),
        );
        (dispatcher, rx)
    }

    #[tokio::test]
    async fn miss_then_cached_hit() {
        let (mut dispatcher, mut rx) =
            dispatcher(vec![Ok("hello there".to_string())], Duration::ZERO);

        let first = dispatcher.dispatch(utterance(0.3, 30)).await;
        assert_eq!(first.text, "hello there");
        assert!(!first.from_cache);

        // Identical audio: served from cache, transcriber not called again
        let second = dispatcher.dispatch(utterance(0.3, 30)).await;
        assert_eq!(second.text, "hello there");
        assert!(second.from_cache);
        assert_eq!(dispatcher.stats().transcriptions, 1);
        assert_eq!(dispatcher.stats().cache_hits, 1);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn transcriber_failure_degrades_to_empty_result() {
        let (mut dispatcher, mut rx) = dispatcher(
            vec![
                Err(Error::Stt("backend exploded".to_string())),
                Ok("recovered".to_string()),
            ],
            Duration::ZERO,
        );

        let failed = dispatcher.dispatch(utterance(0.3, 30)).await;
        assert!(failed.text.is_empty());
        assert_eq!(dispatcher.stats().failures, 1);

        // Pipeline keeps serving subsequent utterances
        let ok = dispatcher.dispatch(utterance(0.6, 40)).await;
        assert_eq!(ok.text, "recovered");

        // Only the non-empty result was delivered
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.text, "recovered");
    }

    #[tokio::test]
    async fn empty_transcripts_are_not_cached() {
        let (mut dispatcher, _rx) = dispatcher(
            vec![Err(Error::Stt("down".to_string())), Ok("later".to_string())],
            Duration::ZERO,
        );

        dispatcher.dispatch(utterance(0.3, 30)).await;

        // Same audio again: must go to the transcriber, not hit a cached
        // empty entry
        let second = dispatcher.dispatch(utterance(0.3, 30)).await;
        assert_eq!(second.text, "later");
        assert!(!second.from_cache);
    }

    #[tokio::test]
    async fn sequences_delivered_non_decreasing() {
        let (mut dispatcher, mut rx) = dispatcher(
            vec![Ok("one".to_string()), Ok("two".to_string())],
            Duration::ZERO,
        );

        dispatcher.dispatch(utterance(0.3, 30)).await;
        dispatcher.dispatch(utterance(0.6, 40)).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.sequence >= first.sequence);
    }

    #[tokio::test]
    async fn slow_transcriber_stretches_poll_interval() {
        let (mut dispatcher, _rx) = dispatcher(vec![], Duration::from_millis(800));
        let initial = dispatcher.poll_interval();

        dispatcher.dispatch(utterance(0.3, 30)).await;
        assert!(dispatcher.poll_interval() > initial);
    }

    #[tokio::test]
    async fn fast_transcriber_shrinks_poll_interval_to_floor() {
        let (mut dispatcher, _rx) = dispatcher(vec![], Duration::ZERO);
        let floor = DispatcherConfig::default().min_poll;

        // Geometric amplitudes keep every pair below the similarity
        // threshold, so each dispatch actually reaches the transcriber
        let mut amplitude = 0.9f32;
        for _ in 0..10 {
            dispatcher.dispatch(utterance(amplitude, 30)).await;
            amplitude *= 0.7;
        }

        assert_eq!(dispatcher.poll_interval(), floor);
    }

    #[test]
    fn window_caps_at_capacity() {
        let mut window = PerformanceWindow::new(3);
        for ms in [100u64, 200, 300, 400] {
            window.record(Duration::from_millis(ms));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn empty_window_has_no_average() {
        assert!(PerformanceWindow::new(5).average().is_none());
    }
}
