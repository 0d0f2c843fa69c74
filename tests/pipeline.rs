//! End-to-end pipeline tests without audio hardware
//!
//! Frames are pushed straight into the frame queue; the transcriber and
//! wake detector are scripted.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sotto::config::{Config, ActivationMode};
use sotto::{
    ChannelSink, FrameQueue, PipelineBuilder, Result, TranscriptResult, Transcriber,
    WakeWordDetector,
};

use common::{FRAME_MS, frame_run};

/// Transcriber that returns a fixed text and counts invocations
struct CountingTranscriber {
    text: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transcriber for CountingTranscriber {
    async fn transcribe(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        _language: Option<&str>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

/// Wake detector armed by a positive energy window
struct EnergyWakeDetector;

#[async_trait]
impl WakeWordDetector for EnergyWakeDetector {
    async fn detect(&mut self, samples: &[f32], _sample_rate: u32) -> Result<bool> {
        Ok(sotto::audio::calculate_rms(samples) > 0.05)
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    // Tight timings keep the tests fast; ratios match the defaults
    config.segmenter.silence_threshold = Duration::from_millis(200);
    config.segmenter.min_utterance = Duration::from_millis(100);
    config.segmenter.poll_interval = Duration::from_millis(5);
    config.segmenter.refilter = false;
    config
}

async fn recv_with_timeout(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<TranscriptResult>,
) -> Option<TranscriptResult> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn silence_speech_silence_produces_one_final_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sink, mut rx) = ChannelSink::new();
    let queue = Arc::new(FrameQueue::new(512));

    let pipeline = PipelineBuilder::new(test_config())
        .transcriber(Arc::new(CountingTranscriber {
            text: "hello world".to_string(),
            calls: Arc::clone(&calls),
        }))
        .sink(Arc::new(sink))
        .queue(Arc::clone(&queue))
        .build()
        .unwrap();

    // Pre-stamped history: 800ms silence, 500ms speech, 1200ms silence.
    // The trailing silence already exceeds the threshold, so the first
    // poll emits exactly one utterance.
    let base = Instant::now() - Duration::from_millis(125 * FRAME_MS);
    for frame in frame_run(base, 0, 40, 0.0) {
        queue.push(frame);
    }
    for frame in frame_run(base, 40, 25, 0.3) {
        queue.push(frame);
    }
    for frame in frame_run(base, 65, 60, 0.0) {
        queue.push(frame);
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move { pipeline.run(&mut shutdown_rx).await });

    let result = recv_with_timeout(&mut rx).await.expect("one transcript");
    assert_eq!(result.text, "hello world");
    assert!(result.is_final);
    assert!(!result.from_cache);

    shutdown_tx.send(()).await.unwrap();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.transcriptions, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Nothing else was dispatched
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn repeated_audio_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sink, mut rx) = ChannelSink::new();
    let queue = Arc::new(FrameQueue::new(512));

    let pipeline = PipelineBuilder::new(test_config())
        .transcriber(Arc::new(CountingTranscriber {
            text: "again".to_string(),
            calls: Arc::clone(&calls),
        }))
        .sink(Arc::new(sink))
        .queue(Arc::clone(&queue))
        .build()
        .unwrap();

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move { pipeline.run(&mut shutdown_rx).await });

    // Two identical utterances, separated by closed silence
    for round in 0..2u64 {
        let base = Instant::now() - Duration::from_millis(50 * FRAME_MS);
        for frame in frame_run(base, 0, 25, 0.3) {
            queue.push(frame);
        }
        for frame in frame_run(base, 25, 20, 0.0) {
            queue.push(frame);
        }

        let result = recv_with_timeout(&mut rx).await.expect("transcript");
        assert_eq!(result.text, "again");
        assert_eq!(result.from_cache, round == 1);
    }

    shutdown_tx.send(()).await.unwrap();
    let stats = handle.await.unwrap().unwrap();

    // Second round never reached the transcriber
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn short_noise_bursts_are_never_dispatched() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sink, mut rx) = ChannelSink::new();
    let queue = Arc::new(FrameQueue::new(512));

    // The floor is compared against the utterance incl. its trailing
    // padding, so it sits above burst + silence threshold here
    let mut config = test_config();
    config.segmenter.min_utterance = Duration::from_millis(400);

    let pipeline = PipelineBuilder::new(config)
        .transcriber(Arc::new(CountingTranscriber {
            text: "noise".to_string(),
            calls: Arc::clone(&calls),
        }))
        .sink(Arc::new(sink))
        .queue(Arc::clone(&queue))
        .build()
        .unwrap();

    // 60ms of "speech" (below the 100ms floor), then closed silence
    let base = Instant::now() - Duration::from_millis(40 * FRAME_MS);
    for frame in frame_run(base, 0, 3, 0.3) {
        queue.push(frame);
    }
    for frame in frame_run(base, 3, 20, 0.0) {
        queue.push(frame);
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move { pipeline.run(&mut shutdown_rx).await });

    // Give the pipeline time to (not) dispatch
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn stop_flushes_pending_speech() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sink, mut rx) = ChannelSink::new();
    let queue = Arc::new(FrameQueue::new(512));

    let pipeline = PipelineBuilder::new(test_config())
        .transcriber(Arc::new(CountingTranscriber {
            text: "flushed".to_string(),
            calls: Arc::clone(&calls),
        }))
        .sink(Arc::new(sink))
        .queue(Arc::clone(&queue))
        .build()
        .unwrap();

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move { pipeline.run(&mut shutdown_rx).await });

    // Ongoing speech, timestamped right now so silence never closes it
    let base = Instant::now();
    for frame in frame_run(base, 0, 25, 0.3) {
        queue.push(frame);
    }

    // Let the frames be consumed, then stop mid-utterance
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(()).await.unwrap();
    let stats = handle.await.unwrap().unwrap();

    let result = recv_with_timeout(&mut rx).await.expect("flushed transcript");
    assert_eq!(result.text, "flushed");
    assert_eq!(stats.transcriptions, 1);
}

#[tokio::test]
async fn wake_gate_holds_back_content_until_armed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (sink, mut rx) = ChannelSink::new();
    let queue = Arc::new(FrameQueue::new(512));

    let mut config = test_config();
    config.wake.mode = ActivationMode::WakeWord;
    config.wake.phrase = "hey sotto".to_string();
    config.wake.window = Duration::from_millis(600);
    config.wake.timeout = Duration::from_secs(5);

    let pipeline = PipelineBuilder::new(config)
        .transcriber(Arc::new(CountingTranscriber {
            text: "command".to_string(),
            calls: Arc::clone(&calls),
        }))
        .wake_detector(Box::new(EnergyWakeDetector))
        .sink(Arc::new(sink))
        .queue(Arc::clone(&queue))
        .build()
        .unwrap();

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move { pipeline.run(&mut shutdown_rx).await });

    // Quiet evidence while idle: never segmented, never transcribed
    let base = Instant::now() - Duration::from_millis(30 * FRAME_MS);
    for frame in frame_run(base, 0, 30, 0.01) {
        queue.push(frame);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Loud wake evidence arms the gate (scripted detector keys on energy)
    let base = Instant::now() - Duration::from_millis(30 * FRAME_MS);
    for frame in frame_run(base, 0, 30, 0.3) {
        queue.push(frame);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Now actual content flows through segmentation
    let base = Instant::now() - Duration::from_millis(45 * FRAME_MS);
    for frame in frame_run(base, 0, 25, 0.3) {
        queue.push(frame);
    }
    for frame in frame_run(base, 25, 20, 0.0) {
        queue.push(frame);
    }

    let result = recv_with_timeout(&mut rx).await.expect("gated transcript");
    assert_eq!(result.text, "command");

    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();
}
