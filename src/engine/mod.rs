//! # Speech Engines
//!
//! The three speech engines are black boxes behind fixed contracts. The
//! session layer only ever talks to these traits, which keeps the real-time
//! protocol testable with fakes and lets deployments swap engines without
//! touching the session code.
//!
//! ## Contracts:
//! - **SegmentationEngine** (one instance per ASR session, never shared):
//!   consumes frames, buffers internally, exposes a FIFO of completed speech
//!   segments. Dropping the instance destroys it.
//! - **Recognizer** (process-wide): decodes one waveform per single-use
//!   [`DecodeContext`].
//! - **Synthesizer** (process-wide): turns text plus voice parameters into a
//!   waveform at the engine's native rate.
//!
//! Process-wide engines are shared by every session's worker. Engines that
//! are not reentrant get wrapped in [`Serialized`].

pub mod adapter;  // Fixed-frame bridge into the segmentation engine
pub mod energy;   // Built-in energy-based segmentation engine
pub mod remote;   // HTTP clients for a model-serving sidecar

use crate::error::EngineError;
use async_trait::async_trait;
use tokio::sync::Mutex;

pub use adapter::VadAdapter;
pub use energy::{EnergySegmenter, EnergySegmenterFactory};
pub use remote::{RemoteRecognizer, RemoteSynthesizer, UnavailableSynthesizer};

/// One detected utterance: the unit of transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Normalized samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz
    pub sample_rate: u32,
}

impl SpeechSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }
}

/// Stateful voice activity detector.
///
/// # Frame Size Contract
/// Callers submit frames of the configured frame size; the final frame of a
/// payload may be shorter and must be tolerated.
pub trait SegmentationEngine: Send {
    /// Feed one frame of normalized samples.
    fn accept_frame(&mut self, samples: &[f32]);

    /// True when no completed segment is waiting.
    fn is_empty(&self) -> bool;

    /// Oldest completed segment, if any.
    fn front(&self) -> Option<&SpeechSegment>;

    /// Discard the oldest completed segment.
    fn pop(&mut self);

    fn name(&self) -> &'static str {
        "unknown_vad"
    }
}

/// Builds one segmentation engine per session.
pub trait SegmenterFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn SegmentationEngine>, EngineError>;
}

/// Single-use handle through which one waveform is submitted to the
/// recognizer and one result retrieved.
///
/// A context is created per segment and dropped right after its result is
/// read; it is never reused.
#[derive(Debug, Default)]
pub struct DecodeContext {
    sample_rate: u32,
    samples: Vec<f32>,
    result: Option<String>,
}

impl DecodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the waveform to decode to the context.
    pub fn accept_waveform(&mut self, sample_rate: u32, samples: Vec<f32>) {
        self.sample_rate = sample_rate;
        self.samples = samples;
    }

    /// Waveform submitted through [`accept_waveform`](Self::accept_waveform).
    pub fn waveform(&self) -> (u32, &[f32]) {
        (self.sample_rate, &self.samples)
    }

    /// Store the decoded text. Called by the recognizer.
    pub fn set_result(&mut self, text: String) {
        self.result = Some(text);
    }

    /// Decoded text, once the recognizer has run.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }
}

/// Speech recognizer shared by every ASR session.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Decode the waveform held by `ctx` and store the text in it.
    async fn decode(&self, ctx: &mut DecodeContext) -> Result<(), EngineError>;

    fn name(&self) -> &'static str {
        "unknown_recognizer"
    }
}

/// Text plus voice parameters for one synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: i32,
    pub speed: f32,
}

/// Engine output at its native sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedWaveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Speech synthesizer shared by every TTS session.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesizedWaveform, EngineError>;

    fn name(&self) -> &'static str {
        "unknown_synthesizer"
    }
}

/// Serializes calls into an engine that is not safe for concurrent use.
///
/// Sessions keep their own ordering; this only makes concurrent sessions
/// take turns on the wrapped engine.
pub struct Serialized<T> {
    inner: T,
    lock: Mutex<()>,
}

impl<T> Serialized<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl<T: Recognizer> Recognizer for Serialized<T> {
    async fn decode(&self, ctx: &mut DecodeContext) -> Result<(), EngineError> {
        let _turn = self.lock.lock().await;
        self.inner.decode(ctx).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[async_trait]
impl<T: Synthesizer> Synthesizer for Serialized<T> {
    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesizedWaveform, EngineError> {
        let _turn = self.lock.lock().await;
        self.inner.generate(request).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
