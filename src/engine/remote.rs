//! # Model-Serving Sidecar Clients
//!
//! The recognition and synthesis models run in a separate model-serving
//! process. These clients speak its small HTTP protocol:
//!
//! ## Recognition
//! `POST {asr.engine.url}` with a 16-bit mono WAV body
//! (`Content-Type: audio/wav`, `x-compute-provider: cpu`), answered with
//! `{"text": "..."}`.
//!
//! ## Synthesis
//! `POST {tts.engine.url}` with
//! `{"text": "...", "sid": 0, "speed": 1.0, "provider": "cpu"}`, answered with
//! `{"samples": [f32, ...], "sample_rate": 22050}`.
//!
//! A non-2xx answer becomes [`EngineError::Rejected`]; an unreachable sidecar
//! or a timeout becomes [`EngineError::Transport`].

use super::{DecodeContext, Recognizer, SynthesisRequest, SynthesizedWaveform, Synthesizer};
use crate::audio::float_to_wav;
use crate::config::EngineEndpoint;
use crate::error::EngineError;
use crate::provider::ComputeProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Header carrying the compute provider on recognition requests.
pub const PROVIDER_HEADER: &str = "x-compute-provider";

fn build_client(endpoint: &EngineEndpoint) -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(endpoint.timeout())
        .build()
        .map_err(|e| EngineError::Construction(e.to_string()))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(EngineError::Rejected { status, body })
}

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    text: String,
}

/// Recognizer backed by the sidecar's decode endpoint.
pub struct RemoteRecognizer {
    client: reqwest::Client,
    url: String,
    provider: ComputeProvider,
}

impl RemoteRecognizer {
    pub fn new(endpoint: &EngineEndpoint, provider: ComputeProvider) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(endpoint)?,
            url: endpoint.url.clone(),
            provider,
        })
    }
}

#[async_trait]
impl Recognizer for RemoteRecognizer {
    async fn decode(&self, ctx: &mut DecodeContext) -> Result<(), EngineError> {
        let (sample_rate, samples) = ctx.waveform();
        let wav = float_to_wav(samples, sample_rate);
        debug!(url = %self.url, wav_bytes = wav.len(), "Sending segment for recognition");

        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .header(PROVIDER_HEADER, self.provider.as_str())
            .body(wav)
            .send()
            .await?;

        let recognized: RecognitionResponse = check_status(resp).await?.json().await?;
        ctx.set_result(recognized.text);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "remote_recognizer"
    }
}

#[derive(Debug, Serialize)]
struct SynthesisPayload<'a> {
    text: &'a str,
    sid: i32,
    speed: f32,
    provider: &'static str,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Synthesizer backed by the sidecar's generate endpoint.
pub struct RemoteSynthesizer {
    client: reqwest::Client,
    url: String,
    provider: ComputeProvider,
}

impl RemoteSynthesizer {
    pub fn new(endpoint: &EngineEndpoint, provider: ComputeProvider) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(endpoint)?,
            url: endpoint.url.clone(),
            provider,
        })
    }
}

#[async_trait]
impl Synthesizer for RemoteSynthesizer {
    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesizedWaveform, EngineError> {
        let payload = SynthesisPayload {
            text: &request.text,
            sid: request.voice_id,
            speed: request.speed,
            provider: self.provider.as_str(),
        };
        debug!(url = %self.url, chars = request.text.len(), "Requesting synthesis");

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        let generated: SynthesisResponse = check_status(resp).await?.json().await?;

        if generated.sample_rate == 0 {
            return Err(EngineError::InvalidResponse("sample_rate must be greater than 0".to_string()));
        }

        Ok(SynthesizedWaveform {
            samples: generated.samples,
            sample_rate: generated.sample_rate,
        })
    }

    fn name(&self) -> &'static str {
        "remote_synthesizer"
    }
}

/// Stand-in when no synthesis engine is configured.
///
/// TTS sessions still open; every request fails at the message boundary and
/// produces no reply.
#[derive(Debug, Default)]
pub struct UnavailableSynthesizer;

#[async_trait]
impl Synthesizer for UnavailableSynthesizer {
    async fn generate(&self, _request: &SynthesisRequest) -> Result<SynthesizedWaveform, EngineError> {
        Err(EngineError::Unavailable("no synthesis engine configured".to_string()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}
