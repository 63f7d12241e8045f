//! # ASR Session Worker
//!
//! Two activities run per connection:
//! - the **read loop** (the session actor) normalizes every binary message
//!   and submits it to the VAD adapter in fixed frames
//! - the **decode loop** (a tokio task) drains completed segments in FIFO
//!   order and decodes them one at a time, backing off briefly when the
//!   queue is empty
//!
//! The VAD adapter is shared by the two behind a mutex that is only held
//! for a submit or a pop, never across a decode.
//!
//! ## Teardown Ordering:
//! 1. cancel the liveness token
//! 2. wait for the decode loop to acknowledge exit (it finishes the segment
//!    in flight first)
//! 3. drop the VAD adapter, which destroys the segmentation engine
//!
//! No call into the segmentation engine can happen after step 3.

use super::{contain, Reply, ReplySink, SessionKind, SessionReport, SessionWorker, UnitCounters, UnitOfWork};
use crate::audio::bytes_to_normalized_pcm;
use crate::engine::{DecodeContext, Recognizer, SpeechSegment, VadAdapter};
use crate::error::EngineError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

/// Lower-case and trim a raw transcript.
pub fn normalize_transcript(raw: &str) -> String {
    raw.to_lowercase().trim().to_string()
}

/// Decode one segment through a fresh, single-use context.
pub async fn recognize(recognizer: &dyn Recognizer, segment: SpeechSegment) -> Result<String, EngineError> {
    let mut ctx = DecodeContext::new();
    ctx.accept_waveform(segment.sample_rate, segment.samples);
    recognizer.decode(&mut ctx).await?;
    let text = ctx
        .result()
        .map(normalize_transcript)
        .ok_or_else(|| EngineError::InvalidResponse("recognizer produced no result".to_string()))?;
    Ok(text)
}

struct DecodeLoop {
    vad: Arc<Mutex<VadAdapter>>,
    recognizer: Arc<dyn Recognizer>,
    sink: Arc<dyn ReplySink>,
    cancel: CancellationToken,
    poll_interval: Duration,
    counters: Arc<UnitCounters>,
}

impl DecodeLoop {
    async fn run(self, ack: oneshot::Sender<()>) {
        debug!("Decode loop started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Drain everything that is ready, one segment at a time.
            while !self.cancel.is_cancelled() {
                let Some(segment) = self.next_segment() else { break };
                self.decode_one(segment).await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!("Decode loop exiting");
        let _ = ack.send(());
    }

    fn next_segment(&self) -> Option<SpeechSegment> {
        let mut vad = self.vad.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if vad.has_pending() {
            vad.pop_next()
        } else {
            None
        }
    }

    async fn decode_one(&self, segment: SpeechSegment) {
        let samples = segment.samples.len();
        let started = Instant::now();
        let outcome = contain(recognize(self.recognizer.as_ref(), segment)).await;
        self.counters.record(&outcome);

        match outcome {
            Ok(text) => {
                debug!(
                    samples,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    text = %text,
                    "Segment decoded"
                );
                if !self.sink.deliver(Reply::Text(text)) {
                    debug!("Connection gone, transcript dropped");
                }
            }
            Err(err) => {
                warn!(samples, error = %err, "Segment decode failed, continuing");
            }
        }
    }
}

/// Per-connection ASR worker.
pub struct AsrWorker {
    vad: Option<Arc<Mutex<VadAdapter>>>,
    recognizer: Arc<dyn Recognizer>,
    poll_interval: Duration,
    cancel: CancellationToken,
    counters: Arc<UnitCounters>,
    decode_loop: Option<(oneshot::Receiver<()>, JoinHandle<()>)>,
}

impl AsrWorker {
    /// The VAD adapter must be built for this session alone.
    pub fn new(vad: VadAdapter, recognizer: Arc<dyn Recognizer>, poll_interval: Duration) -> Self {
        Self {
            vad: Some(Arc::new(Mutex::new(vad))),
            recognizer,
            poll_interval,
            cancel: CancellationToken::new(),
            counters: Arc::new(UnitCounters::default()),
            decode_loop: None,
        }
    }

    /// Normalize one binary payload and submit it in fixed frames.
    pub fn ingest(&self, data: &[u8]) {
        let Some(vad) = &self.vad else { return };
        let samples = bytes_to_normalized_pcm(data);
        if samples.is_empty() {
            return;
        }
        match vad.lock() {
            Ok(mut vad) => vad.submit(&samples),
            Err(poisoned) => poisoned.into_inner().submit(&samples),
        }
    }
}

impl SessionWorker for AsrWorker {
    fn kind(&self) -> SessionKind {
        SessionKind::Asr
    }

    fn open(&mut self, sink: Arc<dyn ReplySink>) {
        let Some(vad) = self.vad.clone() else { return };
        if self.decode_loop.is_some() {
            return;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let decode_loop = DecodeLoop {
            vad,
            recognizer: self.recognizer.clone(),
            sink,
            cancel: self.cancel.clone(),
            poll_interval: self.poll_interval,
            counters: self.counters.clone(),
        };
        let handle = tokio::spawn(decode_loop.run(ack_tx).instrument(tracing::Span::current()));
        self.decode_loop = Some((ack_rx, handle));
    }

    fn on_binary(&mut self, data: &[u8]) -> Option<UnitOfWork> {
        self.ingest(data);
        None
    }

    fn on_text(&mut self, _text: String) -> Option<UnitOfWork> {
        debug!("Ignoring text message on ASR session");
        None
    }

    fn shutdown(&mut self) -> BoxFuture<'static, SessionReport> {
        self.cancel.cancel();

        let decode_loop = self.decode_loop.take();
        let vad = self.vad.take();
        let counters = self.counters.clone();

        async move {
            if let Some((ack, handle)) = decode_loop {
                if ack.await.is_err() {
                    warn!("Decode loop ended without acknowledging");
                }
                if let Err(err) = handle.await {
                    error!(error = %err, "Decode loop task failed");
                }
            }

            if let Some(vad) = vad {
                match Arc::try_unwrap(vad) {
                    Ok(vad) => {
                        let vad = vad.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
                        debug!(
                            engine = vad.engine_name(),
                            frames = vad.frames_submitted(),
                            "Destroying segmentation engine"
                        );
                        drop(vad);
                    }
                    Err(_) => error!("Segmentation engine still shared at teardown"),
                }
            }

            SessionReport {
                segments_decoded: counters.succeeded(),
                decode_failures: counters.failed(),
                ..SessionReport::default()
            }
        }
        .boxed()
    }
}

impl Drop for AsrWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SegmentationEngine;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    /// Emits one segment per frame whose first sample is positive, and
    /// records every call including its own destruction.
    struct ScriptedVad {
        calls: CallLog,
        queue: VecDeque<SpeechSegment>,
    }

    impl SegmentationEngine for ScriptedVad {
        fn accept_frame(&mut self, samples: &[f32]) {
            self.calls.lock().unwrap().push("accept_frame");
            if samples.first().copied().unwrap_or(0.0) > 0.0 {
                self.queue.push_back(SpeechSegment::new(samples.to_vec(), 16000));
            }
        }

        fn is_empty(&self) -> bool {
            self.calls.lock().unwrap().push("is_empty");
            self.queue.is_empty()
        }

        fn front(&self) -> Option<&SpeechSegment> {
            self.calls.lock().unwrap().push("front");
            self.queue.front()
        }

        fn pop(&mut self) {
            self.calls.lock().unwrap().push("pop");
            self.queue.pop_front();
        }
    }

    impl Drop for ScriptedVad {
        fn drop(&mut self) {
            self.calls.lock().unwrap().push("destroy");
        }
    }

    /// Transcribes a segment as "  Segment <n> " where n is its length, and
    /// fails any segment of length 3.
    struct LengthRecognizer {
        delay: Duration,
        decodes: AtomicUsize,
        in_flight: AtomicBool,
    }

    #[async_trait]
    impl Recognizer for LengthRecognizer {
        async fn decode(&self, ctx: &mut DecodeContext) -> Result<(), EngineError> {
            assert!(!self.in_flight.swap(true, Ordering::SeqCst), "decodes overlapped");
            tokio::time::sleep(self.delay).await;
            self.in_flight.store(false, Ordering::SeqCst);
            self.decodes.fetch_add(1, Ordering::SeqCst);

            let len = ctx.waveform().1.len();
            if len == 3 {
                return Err(EngineError::Transport("sidecar hiccup".into()));
            }
            if len == 5 {
                panic!("bad segment");
            }
            ctx.set_result(format!("  Segment {} ", len));
            Ok(())
        }
    }

    fn recognizer(delay_ms: u64) -> Arc<LengthRecognizer> {
        Arc::new(LengthRecognizer {
            delay: Duration::from_millis(delay_ms),
            decodes: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
        })
    }

    fn worker(recognizer: Arc<LengthRecognizer>, frame_size: usize) -> (AsrWorker, CallLog) {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let vad = ScriptedVad {
            calls: calls.clone(),
            queue: VecDeque::new(),
        };
        let adapter = VadAdapter::new(Box::new(vad), frame_size);
        let worker = AsrWorker::new(adapter, recognizer, Duration::from_millis(1));
        (worker, calls)
    }

    /// PCM16 payload of `n` samples at a positive level.
    fn loud(n: usize) -> Vec<u8> {
        std::iter::repeat(8192i16.to_le_bytes()).take(n).flatten().collect()
    }

    async fn next_text(rx: &mut mpsc::UnboundedReceiver<Reply>) -> String {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(Reply::Text(text))) => text,
            other => panic!("expected a transcript, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_transcript() {
        assert_eq!(normalize_transcript("  Hello World \n"), "hello world");
        assert_eq!(normalize_transcript(""), "");
    }

    #[tokio::test]
    async fn test_segments_are_decoded_in_order() {
        let (mut worker, _) = worker(recognizer(5), 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.open(Arc::new(tx));

        // Frame size 4: one payload of 4 + 2 samples yields segments of 4 and 2
        worker.on_binary(&loud(6));
        worker.on_binary(&loud(4));

        assert_eq!(next_text(&mut rx).await, "segment 4");
        assert_eq!(next_text(&mut rx).await, "segment 2");
        assert_eq!(next_text(&mut rx).await, "segment 4");

        let report = worker.shutdown().await;
        assert_eq!(report.segments_decoded, 3);
        assert_eq!(report.decode_failures, 0);
    }

    #[tokio::test]
    async fn test_decode_failures_do_not_end_the_session() {
        let (mut worker, _) = worker(recognizer(1), 8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.open(Arc::new(tx));

        worker.on_binary(&loud(3)); // engine error
        worker.on_binary(&loud(5)); // engine panic
        worker.on_binary(&loud(7));

        assert_eq!(next_text(&mut rx).await, "segment 7");

        let report = worker.shutdown().await;
        assert_eq!(report.segments_decoded, 1);
        assert_eq!(report.decode_failures, 2);
    }

    #[tokio::test]
    async fn test_destroy_is_the_last_engine_call() {
        let recognizer = recognizer(30);
        let (mut worker, calls) = worker(recognizer.clone(), 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.open(Arc::new(tx));

        worker.on_binary(&loud(4));
        worker.on_binary(&loud(4));
        // Let the first decode start, then tear down mid-decode
        tokio::time::sleep(Duration::from_millis(10)).await;
        let report = worker.shutdown().await;

        // The in-flight segment finished and was delivered
        assert_eq!(next_text(&mut rx).await, "segment 4");
        assert_eq!(report.segments_decoded, recognizer.decodes.load(Ordering::SeqCst) as u64);

        let recorded = {
            let log = calls.lock().unwrap();
            assert_eq!(log.last(), Some(&"destroy"));
            assert_eq!(log.iter().filter(|c| **c == "destroy").count(), 1);
            log.len()
        };

        // Frames arriving after teardown never reach the engine
        worker.on_binary(&loud(4));
        assert_eq!(calls.lock().unwrap().len(), recorded);
    }

    #[tokio::test]
    async fn test_odd_length_payload_drops_trailing_byte() {
        let (mut worker, calls) = worker(recognizer(1), 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.open(Arc::new(tx));

        let mut payload = loud(2);
        payload.push(0x7f);
        worker.on_binary(&payload);

        assert_eq!(next_text(&mut rx).await, "segment 2");
        worker.shutdown().await;
        assert_eq!(calls.lock().unwrap().iter().filter(|c| **c == "accept_frame").count(), 1);
    }

    #[tokio::test]
    async fn test_decode_loop_only_pops_pending_segments() {
        let (mut worker, calls) = worker(recognizer(1), 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.open(Arc::new(tx));

        worker.on_binary(&loud(4));
        assert_eq!(next_text(&mut rx).await, "segment 4");
        // Let the loop poll an empty queue a few times
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.shutdown().await;

        let log = calls.lock().unwrap();
        let count = |name: &str| log.iter().filter(|c| **c == name).count();
        assert_eq!(count("front"), 1);
        assert_eq!(count("pop"), 1);
        assert!(count("is_empty") > 1);

        // Each segment is checked for, read, then discarded
        let at = log.iter().position(|c| *c == "front").unwrap();
        assert_eq!(&log[at - 1..=at + 1], &["is_empty", "front", "pop"]);
    }

    #[tokio::test]
    async fn test_text_messages_are_ignored() {
        let (mut worker, _) = worker(recognizer(1), 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        worker.open(Arc::new(tx));

        assert!(worker.on_text("hello".into()).is_none());
        let report = worker.shutdown().await;
        assert_eq!(report, SessionReport::default());
        assert!(rx.try_recv().is_err());
    }
}
