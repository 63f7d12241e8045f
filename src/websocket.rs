//! # WebSocket Session Endpoints
//!
//! - `GET /asr`: stream raw PCM16 (little-endian, mono, 16 kHz) as binary
//!   messages, receive one lower-cased transcript per detected utterance as
//!   text messages
//! - `GET /tts`: send text messages, receive one complete WAV file per
//!   message as a binary message
//!
//! Every resource a session needs is acquired before the HTTP upgrade
//! completes. When any step fails (session cap, segmentation engine,
//! handshake) the request is answered with an error and no session exists.
//! No error is ever written on an established data channel.

use crate::engine::VadAdapter;
use crate::error::AppError;
use crate::session::tts::VoiceSettings;
use crate::session::{AsrWorker, SessionActor, SessionKind, SessionSettings, SessionWorker, TtsWorker};
use crate::state::{AppState, SessionLease};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tracing::{error, info, warn};

/// Upgrade handler for speech recognition sessions.
pub async fn asr_session(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let lease = state.open_session(SessionKind::Asr)?;

    let engine = state.engines.segmenter.create().map_err(|err| {
        error!(error = %err, "Failed to create segmentation engine");
        AppError::from(err)
    })?;
    let vad = VadAdapter::new(engine, state.config.asr.frame_size);
    let worker = AsrWorker::new(vad, state.engines.recognizer.clone(), state.config.poll_interval());

    start_session(worker, lease, &req, stream, &state)
}

/// Upgrade handler for speech synthesis sessions.
pub async fn tts_session(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let lease = state.open_session(SessionKind::Tts)?;

    let voice = VoiceSettings {
        voice_id: state.config.tts.sid,
        speed: state.config.tts.speed,
        transport_sample_rate: state.config.tts.transport_sample_rate,
    };
    let worker = TtsWorker::new(state.engines.synthesizer.clone(), voice);

    start_session(worker, lease, &req, stream, &state)
}

fn start_session<W: SessionWorker>(
    worker: W,
    lease: SessionLease,
    req: &HttpRequest,
    stream: web::Payload,
    state: &AppState,
) -> Result<HttpResponse, AppError> {
    let kind = worker.kind();
    let actor = SessionActor::new(worker, Some(lease), SessionSettings::from_config(&state.config));
    let session_id = actor.session_id();

    let response = ws::WsResponseBuilder::new(actor, req, stream)
        .frame_size(state.config.server.max_frame_bytes)
        .start()
        .map_err(|err| {
            warn!(kind = kind.as_str(), error = %err, "Websocket upgrade failed");
            AppError::UpgradeFailed(err.to_string())
        })?;

    info!(
        %session_id,
        kind = kind.as_str(),
        peer = ?req.connection_info().peer_addr(),
        "Websocket session accepted"
    );
    Ok(response)
}
