//! # Real-Time Sessions
//!
//! One session per accepted websocket connection. The connection handling is
//! shared by both endpoints; what differs is the per-unit worker plugged
//! into it:
//!
//! - [`asr::AsrWorker`]: binary PCM in, one transcript per detected utterance out
//! - [`tts::TtsWorker`]: text in, one WAV file per message out
//!
//! ## Lifecycle:
//! ```text
//! upgrade ──► Open ──(close frame / protocol error)──► Draining ──► Closed
//! ```
//! The [`SessionActor`] is the read loop. It hands every frame to the worker
//! and runs the unit of work the worker returns with `ctx.wait`, so units
//! from one connection never overlap and replies keep their order. When the
//! actor stops, the worker's shutdown future runs to completion before the
//! session slot is released.
//!
//! ## Liveness:
//! The actor pings the client every `heartbeat_interval`. Any inbound frame
//! counts as a sign of life; a session that stays silent for longer than
//! `client_timeout` is stopped and torn down like a closed one.
//!
//! Messages split over several frames are reassembled by
//! [`fragment::MessageAssembler`] before the worker sees them.
//!
//! ## Failure Isolation:
//! Every unit of work yields a `Result<_, EngineError>`; panics inside a unit
//! are caught by [`contain`] and turned into [`EngineError::Panicked`]. A
//! failed unit is logged and produces no reply. Only transport faults end a
//! session.

pub mod asr;
pub mod fragment;
pub mod tts;

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::state::SessionLease;
use actix::prelude::*;
use actix_web_actors::ws;
use futures_util::future::{BoxFuture, LocalBoxFuture};
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub use asr::AsrWorker;
pub use fragment::{Assembled, MessageAssembler};
pub use tts::TtsWorker;

/// Outbound message on the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Message)]
#[rtype(result = "()")]
pub enum Reply {
    Text(String),
    Binary(Vec<u8>),
}

/// Where background loops deliver their replies.
///
/// Returns `false` once the connection is gone so the caller can log it; a
/// failed delivery never ends the loop by itself.
pub trait ReplySink: Send + Sync + 'static {
    fn deliver(&self, reply: Reply) -> bool;
}

impl ReplySink for Recipient<Reply> {
    fn deliver(&self, reply: Reply) -> bool {
        if !self.connected() {
            return false;
        }
        self.do_send(reply);
        true
    }
}

impl ReplySink for mpsc::UnboundedSender<Reply> {
    fn deliver(&self, reply: Reply) -> bool {
        self.send(reply).is_ok()
    }
}

/// Which endpoint a session was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Asr,
    Tts,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Asr => "asr",
            SessionKind::Tts => "tts",
        }
    }
}

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Reading frames and producing replies
    Open,
    /// Reading stopped; in-flight work is finishing
    Draining,
    /// All loops exited and engine resources released
    Closed,
}

/// Counters shared between a worker and its background loops.
#[derive(Debug, Default)]
pub struct UnitCounters {
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

impl UnitCounters {
    pub fn record<T>(&self, outcome: &Result<T, EngineError>) {
        match outcome {
            Ok(_) => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Summary logged at teardown and folded into the process metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub segments_decoded: u64,
    pub decode_failures: u64,
    pub messages_synthesized: u64,
    pub synthesis_failures: u64,
}

/// One unit of work started by an inbound frame. Resolves to the reply to
/// send, if any.
pub type UnitOfWork = LocalBoxFuture<'static, Option<Reply>>;

/// Pluggable per-endpoint behaviour of a session.
pub trait SessionWorker: Unpin + 'static {
    fn kind(&self) -> SessionKind;

    /// Called once when the connection is established.
    fn open(&mut self, sink: Arc<dyn ReplySink>);

    fn on_binary(&mut self, data: &[u8]) -> Option<UnitOfWork>;

    fn on_text(&mut self, text: String) -> Option<UnitOfWork>;

    /// Stop background work and release engine resources. Called once after
    /// the read loop ended.
    fn shutdown(&mut self) -> BoxFuture<'static, SessionReport>;
}

/// Run one unit of work, turning a panic into an error.
pub async fn contain<F, T>(unit: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match AssertUnwindSafe(unit).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(EngineError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Connection-level limits shared by every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Largest message accepted after reassembling fragments
    pub max_message_bytes: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_message_bytes: config.server.max_frame_bytes,
            heartbeat_interval: config.heartbeat_interval(),
            client_timeout: config.client_timeout(),
        }
    }
}

/// Websocket actor driving one session.
///
/// ## Actor Model:
/// Each connection is an independent actor. Inbound frames arrive through
/// the `StreamHandler` impl; replies produced by background loops arrive as
/// [`Reply`] messages and are written to the socket in mailbox order.
pub struct SessionActor<W: SessionWorker> {
    session_id: Uuid,
    worker: W,
    phase: SessionPhase,
    lease: Option<SessionLease>,
    settings: SessionSettings,
    assembler: MessageAssembler,
    opened_at: Instant,
    last_heartbeat: Instant,
    span: tracing::Span,
}

impl<W: SessionWorker> SessionActor<W> {
    pub fn new(worker: W, lease: Option<SessionLease>, settings: SessionSettings) -> Self {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("session", %session_id, kind = worker.kind().as_str());
        Self {
            session_id,
            worker,
            phase: SessionPhase::Open,
            lease,
            settings,
            assembler: MessageAssembler::new(settings.max_message_bytes),
            opened_at: Instant::now(),
            last_heartbeat: Instant::now(),
            span,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn transition(&mut self, next: SessionPhase) {
        let _entered = self.span.enter();
        debug!(from = ?self.phase, to = ?next, "Session phase change");
        self.phase = next;
    }

    fn send(ctx: &mut ws::WebsocketContext<Self>, reply: Reply) {
        match reply {
            Reply::Text(text) => ctx.text(text),
            Reply::Binary(bytes) => ctx.binary(bytes),
        }
    }

    /// Ping the client periodically and stop the session once it has been
    /// silent for longer than the client timeout.
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.settings.heartbeat_interval, |act, ctx| {
            if act.last_heartbeat.elapsed() > act.settings.client_timeout {
                let _entered = act.span.enter();
                warn!(
                    silent_ms = act.last_heartbeat.elapsed().as_millis() as u64,
                    "Client heartbeat timed out, closing session"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn dispatch(&mut self, message: Assembled, ctx: &mut ws::WebsocketContext<Self>) {
        let unit = match message {
            Assembled::Binary(data) => self.worker.on_binary(&data),
            Assembled::Text(text) => self.worker.on_text(text),
        };
        self.run_unit(unit, ctx);
    }

    fn run_unit(&mut self, unit: Option<UnitOfWork>, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(unit) = unit else { return };
        let unit = unit.instrument(self.span.clone());
        ctx.wait(unit.into_actor(self).map(|reply, act, ctx| {
            // Frames are not read while a unit runs
            act.last_heartbeat = Instant::now();
            if let Some(reply) = reply {
                Self::send(ctx, reply);
            }
        }));
    }
}

impl<W: SessionWorker> Actor for SessionActor<W> {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let sink: Arc<dyn ReplySink> = Arc::new(ctx.address().recipient::<Reply>());
        {
            let _entered = self.span.enter();
            self.worker.open(sink);
            info!("Session opened");
        }
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.transition(SessionPhase::Draining);

        let shutdown = self.worker.shutdown();
        let lease = self.lease.take();
        let opened_at = self.opened_at;
        actix::spawn(
            async move {
                let report = shutdown.await;
                debug!(from = ?SessionPhase::Draining, to = ?SessionPhase::Closed, "Session phase change");
                info!(
                    elapsed_ms = opened_at.elapsed().as_millis() as u64,
                    segments_decoded = report.segments_decoded,
                    decode_failures = report.decode_failures,
                    messages_synthesized = report.messages_synthesized,
                    synthesis_failures = report.synthesis_failures,
                    "Session closed"
                );
                if let Some(lease) = lease {
                    lease.finish(&report);
                }
            }
            .instrument(self.span.clone()),
        );
    }
}

impl<W: SessionWorker> Handler<Reply> for SessionActor<W> {
    type Result = ();

    fn handle(&mut self, reply: Reply, ctx: &mut Self::Context) {
        Self::send(ctx, reply);
    }
}

impl<W: SessionWorker> StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionActor<W> {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        if msg.is_ok() {
            self.last_heartbeat = Instant::now();
        }

        match msg {
            Ok(ws::Message::Binary(data)) => {
                let unit = self.worker.on_binary(&data);
                self.run_unit(unit, ctx);
            }
            Ok(ws::Message::Text(text)) => {
                let unit = self.worker.on_text(text.to_string());
                self.run_unit(unit, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Continuation(item)) => match self.assembler.push(item) {
                Ok(Some(message)) => self.dispatch(message, ctx),
                Ok(None) => {}
                Err(err) => {
                    {
                        let _entered = self.span.enter();
                        warn!(error = %err, "Bad fragmented message, closing session");
                    }
                    let code = match err {
                        fragment::AssemblyError::TooLarge { .. } => ws::CloseCode::Size,
                        fragment::AssemblyError::InvalidUtf8 => ws::CloseCode::Invalid,
                        _ => ws::CloseCode::Protocol,
                    };
                    ctx.close(Some(code.into()));
                    ctx.stop();
                }
            },
            Ok(ws::Message::Close(reason)) => {
                {
                    let _entered = self.span.enter();
                    info!(?reason, "Client closed the connection");
                }
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                {
                    let _entered = self.span.enter();
                    warn!(error = %err, "Websocket protocol error, closing session");
                }
                ctx.stop();
            }
        }
    }

    /// The client's stream ended without a close frame.
    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.stop();
    }
}
