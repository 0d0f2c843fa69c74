//! Pipeline assembly and the consumer loops
//!
//! Two cooperative loops, mirroring the producer/consumer split:
//!
//! - the *frame loop* polls the bounded frame queue on a short fixed tick,
//!   routes frames through the wake gate and segmenter, and falls through
//!   to the time-based silence check when the queue is empty;
//! - the *dispatch loop* polls its utterance queue with the dispatcher's
//!   adaptive sleep, processing one utterance to completion at a time so
//!   results leave in capture order.
//!
//! All segmentation state is touched only from the frame loop; frames cross
//! execution contexts exclusively through the queue.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{AudioFrame, FrameQueue};
use crate::cache::TranscriptionCache;
use crate::config::{ActivationMode, Config};
use crate::detect::{EnergyDetector, SpeechDetector};
use crate::dispatch::{Dispatcher, DispatcherStats, JsonLineSink, TranscriptSink};
use crate::segment::{Segmenter, Utterance};
use crate::transcribe::{HttpTranscriber, Transcriber};
use crate::wake::{TranscriberWakeDetector, WakeEvent, WakeGate, WakeWordDetector};
use crate::{Error, Result};

/// Detector scan window for the built-in energy detector (30 ms)
const ENERGY_WINDOW_MS: u64 = 30;

/// Gap bridged when re-filtering an utterance to speech spans (120 ms)
const REFILTER_GAP_MS: u64 = 120;

/// Builds a [`Pipeline`], with injection points for every external
/// collaborator
pub struct PipelineBuilder {
    config: Config,
    detector: Option<Box<dyn SpeechDetector>>,
    wake_detector: Option<Box<dyn WakeWordDetector>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    sink: Option<Arc<dyn TranscriptSink>>,
    queue: Option<Arc<FrameQueue>>,
}

impl PipelineBuilder {
    /// Start building a pipeline from configuration
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            detector: None,
            wake_detector: None,
            transcriber: None,
            sink: None,
            queue: None,
        }
    }

    /// Use a custom speech detector
    #[must_use]
    pub fn detector(mut self, detector: Box<dyn SpeechDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Use a custom wake word detector
    #[must_use]
    pub fn wake_detector(mut self, detector: Box<dyn WakeWordDetector>) -> Self {
        self.wake_detector = Some(detector);
        self
    }

    /// Use a custom transcriber
    #[must_use]
    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Use a custom downstream sink
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use an existing frame queue (e.g. from [`crate::audio::AudioCapture`])
    #[must_use]
    pub fn queue(mut self, queue: Arc<FrameQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Assemble the pipeline
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a default
    /// collaborator cannot be constructed (e.g. missing STT API key)
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;

        let sample_rate = config.audio.sample_rate;
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(FrameQueue::new(config.audio.queue_capacity)));

        #[allow(clippy::cast_possible_truncation)]
        let energy_window = (u64::from(sample_rate) * ENERGY_WINDOW_MS / 1000) as usize;
        let detector = self.detector.unwrap_or_else(|| {
            Box::new(EnergyDetector::new(
                config.segmenter.energy_threshold,
                energy_window,
            ))
        });

        let transcriber: Arc<dyn Transcriber> = match self.transcriber {
            Some(t) => t,
            None => Arc::new(HttpTranscriber::from_config(&config.stt)?),
        };

        let sink: Arc<dyn TranscriptSink> = self.sink.unwrap_or_else(|| Arc::new(JsonLineSink));

        let gate = if config.wake.mode == ActivationMode::WakeWord {
            let wake_detector = self.wake_detector.unwrap_or_else(|| {
                Box::new(TranscriberWakeDetector::new(
                    Arc::clone(&transcriber),
                    &config.wake.phrase,
                    TranscriberWakeDetector::DEFAULT_THRESHOLD,
                ))
            });
            Some(WakeGate::new(wake_detector, &config.wake, sample_rate))
        } else {
            None
        };

        let cache = Arc::new(TranscriptionCache::load_or_default(config.cache.clone()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&cache),
            transcriber,
            sink,
            config.dispatcher.clone(),
        );

        let segmenter = Segmenter::new(detector, config.segmenter.clone());

        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let dispatcher_task = tokio::spawn(run_dispatch_loop(dispatcher, utterance_rx));

        Ok(Pipeline {
            config,
            segmenter,
            gate,
            queue,
            cache,
            utterance_tx: Some(utterance_tx),
            dispatcher_task,
        })
    }
}

/// The assembled dictation pipeline
pub struct Pipeline {
    config: Config,
    segmenter: Segmenter,
    gate: Option<WakeGate>,
    queue: Arc<FrameQueue>,
    cache: Arc<TranscriptionCache>,
    utterance_tx: Option<mpsc::UnboundedSender<Utterance>>,
    dispatcher_task: JoinHandle<Dispatcher>,
}

impl Pipeline {
    /// The frame queue this pipeline consumes
    #[must_use]
    pub fn queue(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.queue)
    }

    /// The shared transcription cache
    #[must_use]
    pub fn cache(&self) -> Arc<TranscriptionCache> {
        Arc::clone(&self.cache)
    }

    /// Run the frame loop until a shutdown signal arrives, then stop cleanly
    ///
    /// Stopping flushes any pending partial utterance, resets the wake gate,
    /// waits for in-flight dispatches to complete (never cancelling them),
    /// and persists the cache.
    ///
    /// # Errors
    ///
    /// Returns error if the dispatch loop panicked
    pub async fn run(mut self, shutdown: &mut mpsc::Receiver<()>) -> Result<DispatcherStats> {
        tracing::info!(mode = %self.config.wake.mode, "pipeline running");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                () = tokio::time::sleep(self.config.segmenter.poll_interval) => {
                    self.poll_once().await;
                }
            }
        }

        self.stop().await
    }

    /// One frame-loop iteration: drain the queue, then run the time-based
    /// silence and wake-gate checks
    pub async fn poll_once(&mut self) {
        for frame in self.queue.drain() {
            self.process_frame(frame);
        }

        let now = Instant::now();

        // Time, not frame arrival, closes utterances: a stalled source is
        // treated exactly like silence
        if let Some(utterance) = self.segmenter.check_silence(now) {
            self.enqueue(utterance);
        }

        if let Some(gate) = &mut self.gate {
            if gate.ready_to_check() {
                let _ = gate.check(now).await;
            }
            if gate.tick(now, self.segmenter.speech_active()) == Some(WakeEvent::TimedOut) {
                tracing::info!("wake gate timed out, listening for wake phrase again");
            }
        }
    }

    fn process_frame(&mut self, frame: AudioFrame) {
        if let Some(gate) = &mut self.gate {
            if !gate.is_armed() {
                // Wake-phrase evidence only; never utterance content
                gate.offer(&frame);
                return;
            }
        }

        if let Some(utterance) = self.segmenter.feed(frame) {
            self.enqueue(utterance);
        }
    }

    /// Hand a finished utterance to the dispatch loop
    fn enqueue(&mut self, utterance: Utterance) {
        if utterance.duration() < self.config.segmenter.min_utterance {
            tracing::debug!(
                sequence = utterance.sequence(),
                duration_ms = utterance.duration().as_millis(),
                "skipping utterance below minimum duration"
            );
            return;
        }

        let utterance = if self.config.segmenter.refilter {
            #[allow(clippy::cast_possible_truncation)]
            let max_gap =
                (u64::from(utterance.sample_rate()) * REFILTER_GAP_MS / 1000) as usize;
            match self.segmenter.refilter(&utterance, max_gap) {
                Ok(speech) if speech.is_empty() => {
                    tracing::debug!(
                        sequence = utterance.sequence(),
                        "no speech left after re-filtering, skipping"
                    );
                    return;
                }
                Ok(speech) => utterance.with_samples(speech),
                Err(e) => {
                    tracing::warn!(error = %e, "re-filter failed, dispatching unfiltered");
                    utterance
                }
            }
        } else {
            utterance
        };

        if let Some(tx) = &self.utterance_tx {
            if tx.send(utterance).is_err() {
                tracing::error!("dispatch loop gone, dropping utterance");
            }
        }

        if let Some(gate) = &mut self.gate {
            gate.utterance_done();
        }
    }

    /// Stop listening: flush, reset the gate, drain dispatch, persist
    async fn stop(mut self) -> Result<DispatcherStats> {
        if let Some(utterance) = self.segmenter.flush() {
            tracing::debug!(
                sequence = utterance.sequence(),
                duration_ms = utterance.duration().as_millis(),
                "flushing pending utterance"
            );
            self.enqueue(utterance);
        }

        if let Some(gate) = &mut self.gate {
            gate.reset();
        }

        // Closing the channel lets in-flight work finish; nothing is
        // cancelled
        drop(self.utterance_tx.take());
        let dispatcher = self
            .dispatcher_task
            .await
            .map_err(|e| Error::Sink(format!("dispatch loop failed: {e}")))?;

        self.cache.persist();

        let stats = dispatcher.stats();
        tracing::info!(
            transcriptions = stats.transcriptions,
            cache_hits = stats.cache_hits,
            failures = stats.failures,
            "pipeline stopped"
        );
        Ok(stats)
    }
}

/// The outer dispatch loop: poll the utterance queue with the adaptive
/// sleep, processing strictly in FIFO order
async fn run_dispatch_loop(
    mut dispatcher: Dispatcher,
    mut utterances: mpsc::UnboundedReceiver<Utterance>,
) -> Dispatcher {
    loop {
        match utterances.try_recv() {
            Ok(utterance) => {
                dispatcher.dispatch(utterance).await;
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                tokio::select! {
                    maybe = utterances.recv() => match maybe {
                        Some(utterance) => {
                            dispatcher.dispatch(utterance).await;
                        }
                        None => break,
                    },
                    () = tokio::time::sleep(dispatcher.poll_interval()) => {}
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        }
    }

    // Channel closed: drain whatever is left, in order
    while let Some(utterance) = utterances.recv().await {
        dispatcher.dispatch(utterance).await;
    }

    dispatcher
}
