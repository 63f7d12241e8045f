//! # Application State Management
//!
//! Shared state handed to every HTTP handler and websocket session.
//!
//! ## What lives here:
//! - **Configuration**: loaded once at startup, immutable afterwards (`Arc<AppConfig>`)
//! - **Engines**: the three speech engines, built once and shared by reference
//! - **Metrics**: counters updated by the middleware and by session teardown
//!
//! ## Arc<RwLock<T>> Pattern
//! Only the metrics are mutable. They sit behind an `RwLock` so the health
//! endpoints can read a consistent snapshot while sessions keep updating it.
//! A poisoned lock still holds valid counters, so it is recovered rather than
//! propagated.
//!
//! ## Session Slots
//! [`AppState::open_session`] enforces `max_concurrent_sessions` and hands out
//! a [`SessionLease`]. Dropping the lease frees the slot, so a session that
//! never finishes its upgrade still gives its slot back.

use crate::config::AppConfig;
use crate::engine::{
    EnergySegmenterFactory, Recognizer, RemoteRecognizer, RemoteSynthesizer, SegmenterFactory, Serialized,
    Synthesizer, UnavailableSynthesizer,
};
use crate::error::{AppError, EngineError};
use crate::session::{SessionKind, SessionReport};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{info, warn};

/// The process-wide engine set.
///
/// The segmenter factory builds one segmentation engine per ASR session; the
/// recognizer and synthesizer are shared by all sessions.
#[derive(Clone)]
pub struct Engines {
    pub segmenter: Arc<dyn SegmenterFactory>,
    pub recognizer: Arc<dyn Recognizer>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Engines {
    /// Build the default engines described by the configuration.
    ///
    /// ## Engines:
    /// - segmentation: [`EnergySegmenterFactory`] with the `asr.vad` knobs
    /// - recognition: [`RemoteRecognizer`] against `asr.engine`
    /// - synthesis: [`RemoteSynthesizer`] against `tts.engine`, or
    ///   [`UnavailableSynthesizer`] when no endpoint is configured
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        let segmenter = EnergySegmenterFactory::new(config.asr.vad.clone(), config.asr.sample_rate, config.provider);

        let remote = RemoteRecognizer::new(&config.asr.engine, config.provider)?;
        let recognizer: Arc<dyn Recognizer> = if config.asr.serialize_decodes {
            Arc::new(Serialized::new(remote))
        } else {
            Arc::new(remote)
        };

        let synthesizer: Arc<dyn Synthesizer> = match &config.tts.engine {
            Some(endpoint) => {
                let remote = RemoteSynthesizer::new(endpoint, config.provider)?;
                if config.tts.serialize_synthesis {
                    Arc::new(Serialized::new(remote))
                } else {
                    Arc::new(remote)
                }
            }
            None => {
                warn!("No synthesis engine configured, TTS requests will produce no audio");
                Arc::new(UnavailableSynthesizer)
            }
        };

        info!(
            provider = %config.provider,
            recognizer = recognizer.name(),
            synthesizer = synthesizer.name(),
            "Speech engines ready"
        );

        Ok(Self {
            segmenter: Arc::new(segmenter),
            recognizer,
            synthesizer,
        })
    }
}

/// The main application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Immutable after startup
    pub config: Arc<AppConfig>,

    pub engines: Engines,

    /// Counters updated by the middleware and by session teardown
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Process metrics.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests answered with a 4xx/5xx status
    pub error_count: u64,

    pub active_asr_sessions: u32,
    pub active_tts_sessions: u32,

    /// Sessions opened since start, both kinds
    pub total_sessions: u64,

    /// Upgrades refused because the session cap was reached
    pub sessions_refused: u64,

    /// Websocket upgrade requests that did not end in a 101 response
    pub upgrade_failures: u64,

    pub segments_decoded: u64,
    pub decode_failures: u64,
    pub messages_synthesized: u64,
    pub synthesis_failures: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

impl AppMetrics {
    pub fn active_sessions(&self) -> u32 {
        self.active_asr_sessions + self.active_tts_sessions
    }

    fn active_mut(&mut self, kind: SessionKind) -> &mut u32 {
        match kind {
            SessionKind::Asr => &mut self.active_asr_sessions,
            SessionKind::Tts => &mut self.active_tts_sessions,
        }
    }
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

/// A claimed session slot.
///
/// Dropping the lease releases the slot. [`SessionLease::finish`] also folds
/// the session's report into the process metrics.
pub struct SessionLease {
    kind: SessionKind,
    metrics: Arc<RwLock<AppMetrics>>,
}

impl SessionLease {
    /// Record the outcome of a session that ran to teardown.
    pub fn finish(self, report: &SessionReport) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.segments_decoded += report.segments_decoded;
        metrics.decode_failures += report.decode_failures;
        metrics.messages_synthesized += report.messages_synthesized;
        metrics.synthesis_failures += report.synthesis_failures;
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let active = metrics.active_mut(self.kind);
        *active = active.saturating_sub(1);
    }
}

impl AppState {
    pub fn new(config: AppConfig, engines: Engines) -> Self {
        Self {
            config: Arc::new(config),
            engines,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a session slot, or refuse with 503 when the cap is reached.
    pub fn open_session(&self, kind: SessionKind) -> Result<SessionLease, AppError> {
        let limit = self.config.performance.max_concurrent_sessions;
        let mut metrics = self.metrics_write();

        if metrics.active_sessions() as usize >= limit {
            metrics.sessions_refused += 1;
            return Err(AppError::ServiceUnavailable(format!(
                "Maximum concurrent sessions ({}) reached",
                limit
            )));
        }

        *metrics.active_mut(kind) += 1;
        metrics.total_sessions += 1;

        Ok(SessionLease {
            kind,
            metrics: self.metrics.clone(),
        })
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    pub fn increment_upgrade_failures(&self) {
        self.metrics_write().upgrade_failures += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken under the read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
