//! # TTS Session Worker
//!
//! Every inbound text message is one unit of work:
//!
//! ```text
//! text ─► synthesizer (native rate) ─► resample to transport rate
//!      ─► clamp + PCM16 ─► WAV container ─► one binary reply
//! ```
//!
//! Units run one at a time in arrival order (the session actor waits on
//! each). Nothing is carried from one message to the next, so a failed
//! message only costs its own reply.

use super::{contain, Reply, ReplySink, SessionKind, SessionReport, SessionWorker, UnitCounters, UnitOfWork};
use crate::audio::{float_to_wav, resample_linear};
use crate::engine::{SynthesisRequest, Synthesizer};
use crate::error::EngineError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Voice parameters applied to every message of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    pub voice_id: i32,
    pub speed: f32,
    pub transport_sample_rate: u32,
}

/// Synthesize `text` and frame it as a WAV file at the transport rate.
pub async fn synthesize_reply(
    synthesizer: &dyn Synthesizer,
    text: String,
    voice: VoiceSettings,
) -> Result<Vec<u8>, EngineError> {
    let request = SynthesisRequest {
        text,
        voice_id: voice.voice_id,
        speed: voice.speed,
    };
    let waveform = synthesizer.generate(&request).await?;
    if waveform.sample_rate == 0 {
        return Err(EngineError::InvalidResponse("synthesizer returned sample rate 0".to_string()));
    }

    let resampled = resample_linear(&waveform.samples, waveform.sample_rate, voice.transport_sample_rate);
    Ok(float_to_wav(&resampled, voice.transport_sample_rate))
}

/// Per-connection TTS worker.
pub struct TtsWorker {
    synthesizer: Arc<dyn Synthesizer>,
    voice: VoiceSettings,
    counters: Arc<UnitCounters>,
}

impl TtsWorker {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, voice: VoiceSettings) -> Self {
        Self {
            synthesizer,
            voice,
            counters: Arc::new(UnitCounters::default()),
        }
    }
}

impl SessionWorker for TtsWorker {
    fn kind(&self) -> SessionKind {
        SessionKind::Tts
    }

    fn open(&mut self, _sink: Arc<dyn ReplySink>) {}

    fn on_binary(&mut self, data: &[u8]) -> Option<UnitOfWork> {
        debug!(bytes = data.len(), "Ignoring binary message on TTS session");
        None
    }

    fn on_text(&mut self, text: String) -> Option<UnitOfWork> {
        let synthesizer = self.synthesizer.clone();
        let counters = self.counters.clone();
        let voice = self.voice;

        Some(
            async move {
                let chars = text.chars().count();
                let started = Instant::now();
                let outcome = contain(synthesize_reply(synthesizer.as_ref(), text, voice)).await;
                counters.record(&outcome);

                match outcome {
                    Ok(wav) => {
                        debug!(
                            chars,
                            wav_bytes = wav.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Message synthesized"
                        );
                        Some(Reply::Binary(wav))
                    }
                    Err(err) => {
                        warn!(chars, error = %err, "Synthesis failed, continuing");
                        None
                    }
                }
            }
            .boxed_local(),
        )
    }

    fn shutdown(&mut self) -> BoxFuture<'static, SessionReport> {
        let report = SessionReport {
            messages_synthesized: self.counters.succeeded(),
            synthesis_failures: self.counters.failed(),
            ..SessionReport::default()
        };
        futures_util::future::ready(report).boxed()
    }
}
