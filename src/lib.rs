//! Sotto - voice dictation backend
//!
//! This library turns a continuous microphone stream into discrete,
//! correctly-bounded utterances, optionally gates them behind a wake
//! phrase, and dispatches them to a speech-to-text backend through a
//! multi-tier result cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    FrameSource                        │
//! │        cpal capture → bounded FrameQueue              │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                 Frame loop (10 ms)                    │
//! │   WakeGate  │  SpeechDetector  │  Segmenter          │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ Utterance (FIFO)
//! ┌────────────────────▼─────────────────────────────────┐
//! │            Dispatch loop (adaptive)                   │
//! │   TranscriptionCache  │  Transcriber  │  Sink        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The speech classifier, the wake-phrase matcher, and the transcription
//! engine are opaque collaborators behind the [`detect::SpeechDetector`],
//! [`wake::WakeWordDetector`], and [`transcribe::Transcriber`] traits.

pub mod audio;
pub mod cache;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod segment;
pub mod text;
pub mod transcribe;
pub mod wake;

pub use audio::{AudioCapture, AudioFrame, FrameQueue};
pub use cache::{AudioFingerprint, CacheStats, TranscriptionCache};
pub use config::{ActivationMode, Config};
pub use detect::{CompositeDetector, EnergyDetector, SpeechDetector};
pub use dispatch::{
    ChannelSink, Dispatcher, DispatcherStats, JsonLineSink, TranscriptResult, TranscriptSink,
};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use segment::{Segmenter, Utterance};
pub use transcribe::{HttpTranscriber, Transcriber};
pub use wake::{GateState, PhraseMatcher, WakeEvent, WakeGate, WakeWordDetector};
