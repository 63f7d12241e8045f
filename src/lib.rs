//! # Speech Relay
//!
//! Streams live audio between websocket clients and speech engines:
//! - **ASR** (`/asr`): raw PCM16 in, one transcript per detected utterance out
//! - **TTS** (`/tts`): text in, one WAV file per message out
//!
//! ## Module Layout:
//! - **config**: layered configuration (defaults, config file, `APP_` environment)
//! - **provider**: compute provider shared by every engine
//! - **error**: engine and HTTP error types
//! - **audio**: PCM normalization, resampling and WAV framing
//! - **engine**: speech engine contracts and the built-in engines
//! - **session**: the websocket session actor and its ASR/TTS workers
//! - **state**: shared state, engine set, session slots and metrics
//! - **health**, **handlers**, **middleware**, **websocket**: the HTTP surface

pub mod audio;       // PCM, resampling and WAV framing
pub mod config;      // Configuration management
pub mod engine;      // Segmentation, recognition and synthesis engines
pub mod error;       // Error handling types
pub mod handlers;    // HTTP request handlers
pub mod health;      // Health check endpoints
pub mod middleware;  // Request metrics
pub mod provider;    // Compute provider selection
pub mod session;     // Per-connection session actor and workers
pub mod state;       // Application state management
pub mod websocket;   // Websocket upgrade endpoints

use actix_web::web;

/// Register every route of the service.
///
/// Shared by the binary and the integration tests so both serve exactly the
/// same surface.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/asr", web::get().to(websocket::asr_session))
        .route("/tts", web::get().to(websocket::tts_session))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(handlers::get_config)),
        )
        .route("/health", web::get().to(health::health_check));
}
