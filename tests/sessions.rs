//! End-to-end sessions over a real websocket connection.

use actix_web::{dev::ServerHandle, web, App, HttpServer};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use speech_relay::config::AppConfig;
use speech_relay::engine::{
    DecodeContext, EnergySegmenterFactory, Recognizer, SynthesisRequest, SynthesizedWaveform, Synthesizer,
};
use speech_relay::error::EngineError;
use speech_relay::middleware::MetricsMiddleware;
use speech_relay::state::{AppMetrics, AppState, Engines};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message;

/// Answers every segment with a padded, mixed-case transcript.
struct FakeRecognizer;

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn decode(&self, ctx: &mut DecodeContext) -> Result<(), EngineError> {
        assert!(!ctx.waveform().1.is_empty());
        ctx.set_result("  Hello World ".to_string());
        Ok(())
    }
}

/// 0.1 s of a quiet tone at 22050 Hz; fails on the text "fail".
struct FakeSynthesizer;

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesizedWaveform, EngineError> {
        if request.text == "fail" {
            return Err(EngineError::Rejected {
                status: 500,
                body: "synthesis failed".to_string(),
            });
        }
        Ok(SynthesizedWaveform {
            samples: (0..2205).map(|i| (i as f32 * 0.05).sin() * 0.3).collect(),
            sample_rate: 22050,
        })
    }
}

async fn start_server(config: AppConfig) -> (String, ServerHandle, web::Data<AppState>) {
    let engines = Engines {
        segmenter: Arc::new(EnergySegmenterFactory::new(
            config.asr.vad.clone(),
            config.asr.sample_rate,
            config.provider,
        )),
        recognizer: Arc::new(FakeRecognizer),
        synthesizer: Arc::new(FakeSynthesizer),
    };
    let state = web::Data::new(AppState::new(config, engines));

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(MetricsMiddleware)
            .configure(speech_relay::configure)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    tokio::spawn(server);

    (format!("ws://{}", addr), handle, state)
}

/// Half-scale square wave as PCM16 little-endian bytes.
fn speech_pcm(seconds: f32) -> Vec<u8> {
    let n = (seconds * 16000.0) as usize;
    (0..n)
        .map(|i| if (i / 20) % 2 == 0 { 16384i16 } else { -16384i16 })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

fn silence_pcm(seconds: f32) -> Vec<u8> {
    vec![0u8; (seconds * 16000.0) as usize * 2]
}

/// Next data message, skipping control frames. `None` on timeout.
async fn next_data<S>(ws: &mut S, wait: Duration) -> Option<Message>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(msg @ (Message::Text(_) | Message::Binary(_))))) => return Some(msg),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// One fragment of a data message as a raw frame.
fn fragment(data: &[u8], data_type: Data, is_final: bool) -> Message {
    Message::Frame(Frame::message(data.to_vec(), OpCode::Data(data_type), is_final))
}

/// Poll the metrics until `done` holds or two seconds pass.
async fn eventually(state: &web::Data<AppState>, done: impl Fn(&AppMetrics) -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if done(&state.get_metrics_snapshot()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn declared_rate(wav: &[u8]) -> u32 {
    u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]])
}

#[actix_web::test]
async fn asr_utterance_yields_one_normalized_transcript() {
    let (base, handle, state) = start_server(AppConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/asr", base)).await.unwrap();

    ws.send(Message::Binary(speech_pcm(0.5))).await.unwrap();
    ws.send(Message::Binary(silence_pcm(0.7))).await.unwrap();

    match next_data(&mut ws, Duration::from_secs(5)).await {
        Some(Message::Text(text)) => assert_eq!(text, "hello world"),
        other => panic!("expected a transcript, got {:?}", other),
    }
    assert!(next_data(&mut ws, Duration::from_millis(300)).await.is_none());

    ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let metrics = state.get_metrics_snapshot();
    assert_eq!(metrics.active_asr_sessions, 0);
    assert_eq!(metrics.segments_decoded, 1);

    handle.stop(false).await;
}

#[actix_web::test]
async fn tts_message_yields_one_wav_at_transport_rate() {
    let (base, handle, _state) = start_server(AppConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/tts", base)).await.unwrap();

    ws.send(Message::Text("hello".to_string())).await.unwrap();

    match next_data(&mut ws, Duration::from_secs(5)).await {
        Some(Message::Binary(wav)) => {
            assert_eq!(&wav[0..4], b"RIFF");
            assert_eq!(&wav[8..12], b"WAVE");
            assert_eq!(declared_rate(&wav), 16000);
            assert_eq!(wav.len(), 44 + 1600 * 2);
        }
        other => panic!("expected a WAV reply, got {:?}", other),
    }

    handle.stop(false).await;
}

#[actix_web::test]
async fn tts_failure_only_costs_its_own_reply() {
    let (base, handle, state) = start_server(AppConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/tts", base)).await.unwrap();

    ws.send(Message::Text("fail".to_string())).await.unwrap();
    ws.send(Message::Text("hello".to_string())).await.unwrap();

    match next_data(&mut ws, Duration::from_secs(5)).await {
        Some(Message::Binary(wav)) => assert_eq!(&wav[0..4], b"RIFF"),
        other => panic!("expected a WAV reply, got {:?}", other),
    }
    assert!(next_data(&mut ws, Duration::from_millis(300)).await.is_none());

    ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let metrics = state.get_metrics_snapshot();
    assert_eq!(metrics.messages_synthesized, 1);
    assert_eq!(metrics.synthesis_failures, 1);

    handle.stop(false).await;
}

#[actix_web::test]
async fn asr_utterance_split_over_fragments_is_transcribed() {
    let (base, handle, state) = start_server(AppConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/asr", base)).await.unwrap();

    // One binary message carried by three frames; the splits fall mid-sample
    let speech = speech_pcm(0.5);
    ws.send(fragment(&speech[..3001], Data::Binary, false)).await.unwrap();
    ws.send(fragment(&speech[3001..9000], Data::Continue, false)).await.unwrap();
    ws.send(fragment(&speech[9000..], Data::Continue, true)).await.unwrap();
    ws.send(Message::Binary(silence_pcm(0.7))).await.unwrap();

    match next_data(&mut ws, Duration::from_secs(5)).await {
        Some(Message::Text(text)) => assert_eq!(text, "hello world"),
        other => panic!("expected a transcript, got {:?}", other),
    }

    ws.close(None).await.unwrap();
    assert!(eventually(&state, |m| m.active_asr_sessions == 0 && m.segments_decoded == 1).await);

    handle.stop(false).await;
}

#[actix_web::test]
async fn tts_text_split_over_fragments_is_synthesized() {
    let (base, handle, _state) = start_server(AppConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/tts", base)).await.unwrap();

    ws.send(fragment(b"hel", Data::Text, false)).await.unwrap();
    ws.send(fragment(b"lo", Data::Continue, true)).await.unwrap();

    match next_data(&mut ws, Duration::from_secs(5)).await {
        Some(Message::Binary(wav)) => assert_eq!(wav.len(), 44 + 1600 * 2),
        other => panic!("expected a WAV reply, got {:?}", other),
    }

    handle.stop(false).await;
}

#[actix_web::test]
async fn oversized_fragmented_message_closes_the_session() {
    let mut config = AppConfig::default();
    config.server.max_frame_bytes = 4096;
    let (base, handle, state) = start_server(config).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/asr", base)).await.unwrap();

    ws.send(fragment(&[0u8; 3000], Data::Binary, false)).await.unwrap();
    ws.send(fragment(&[0u8; 3000], Data::Continue, true)).await.unwrap();

    assert!(eventually(&state, |m| m.active_asr_sessions == 0).await);

    handle.stop(false).await;
}

#[actix_web::test]
async fn silent_client_is_disconnected_after_timeout() {
    let mut config = AppConfig::default();
    config.server.heartbeat_interval_ms = 50;
    config.server.client_timeout_ms = 200;
    let (base, handle, state) = start_server(config).await;

    // Never read from the socket, so pings go unanswered
    let (_ws, _) = tokio_tungstenite::connect_async(format!("{}/tts", base)).await.unwrap();
    assert!(eventually(&state, |m| m.active_tts_sessions == 1).await);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(eventually(&state, |m| m.active_tts_sessions == 0).await);

    handle.stop(false).await;
}

#[actix_web::test]
async fn active_client_outlives_the_timeout() {
    let mut config = AppConfig::default();
    config.server.heartbeat_interval_ms = 50;
    config.server.client_timeout_ms = 200;
    let (base, handle, state) = start_server(config).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/asr", base)).await.unwrap();

    // Text on an ASR session is ignored but still counts as a sign of life
    for _ in 0..10 {
        ws.send(Message::Text("still here".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(state.get_metrics_snapshot().active_asr_sessions, 1);

    ws.send(Message::Binary(speech_pcm(0.5))).await.unwrap();
    ws.send(Message::Binary(silence_pcm(0.7))).await.unwrap();
    match next_data(&mut ws, Duration::from_secs(5)).await {
        Some(Message::Text(text)) => assert_eq!(text, "hello world"),
        other => panic!("expected a transcript, got {:?}", other),
    }

    handle.stop(false).await;
}
