//! # Energy-Based Segmentation Engine
//!
//! A lightweight voice activity detector that needs no model file. Audio is
//! analysed in fixed windows; each window's RMS level is converted to dBFS
//! and mapped onto a 0..1 speech score over a 60 dB range, so the configured
//! `threshold` keeps the same meaning as a model probability.
//!
//! ## Segmentation rules:
//! - A window scoring at or above `threshold` is speech
//! - An utterance ends after `min_silence_duration` of consecutive silence;
//!   the trailing silence is not part of the segment
//! - Utterances shorter than `min_speech_duration` are discarded
//! - An utterance reaching `max_speech_duration` is emitted immediately and
//!   a new one starts with the next speech window
//! - The utterance being built never holds more than `buffer_size_in_seconds`
//!   of audio; the oldest samples are dropped first

use super::{SegmentationEngine, SegmenterFactory, SpeechSegment};
use crate::config::VadConfig;
use crate::error::EngineError;
use crate::provider::ComputeProvider;
use std::collections::VecDeque;
use tracing::debug;

/// Dynamic range mapped onto the 0..1 speech score.
const SCORE_RANGE_DB: f32 = 60.0;

/// Floor for the RMS value before taking the logarithm.
const RMS_FLOOR: f32 = 1e-6;

/// Per-session energy detector.
pub struct EnergySegmenter {
    sample_rate: u32,
    threshold: f32,
    window_size: usize,
    min_silence_samples: usize,
    min_speech_samples: usize,
    max_speech_samples: usize,
    buffer_samples: usize,

    /// Samples not yet forming a full analysis window
    pending: Vec<f32>,
    /// Utterance under construction, including trailing silence
    current: VecDeque<f32>,
    triggered: bool,
    trailing_silence: usize,
    completed: VecDeque<SpeechSegment>,
}

impl EnergySegmenter {
    pub fn new(vad: &VadConfig, sample_rate: u32) -> Self {
        let seconds = |s: f32| (s.max(0.0) * sample_rate as f32) as usize;
        let window_size = vad.window_size.max(1);

        Self {
            sample_rate,
            threshold: vad.threshold,
            window_size,
            min_silence_samples: seconds(vad.min_silence_duration),
            min_speech_samples: seconds(vad.min_speech_duration),
            max_speech_samples: seconds(vad.max_speech_duration).max(window_size),
            buffer_samples: seconds(vad.buffer_size_in_seconds).max(window_size),
            pending: Vec::with_capacity(window_size),
            current: VecDeque::new(),
            triggered: false,
            trailing_silence: 0,
            completed: VecDeque::new(),
        }
    }

    /// Speech score of one window in [0, 1].
    pub fn score(window: &[f32]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        let mean_square = window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32;
        let rms = mean_square.sqrt().max(RMS_FLOOR);
        let db = 20.0 * rms.log10();
        ((db + SCORE_RANGE_DB) / SCORE_RANGE_DB).clamp(0.0, 1.0)
    }

    fn process_window(&mut self, window: &[f32]) {
        let is_speech = Self::score(window) >= self.threshold;

        if !self.triggered {
            if !is_speech {
                return;
            }
            self.triggered = true;
            self.trailing_silence = 0;
        }

        self.current.extend(window.iter().copied());
        if is_speech {
            self.trailing_silence = 0;
        } else {
            self.trailing_silence += window.len();
        }

        while self.current.len() > self.buffer_samples {
            self.current.pop_front();
        }

        if !is_speech && self.trailing_silence >= self.min_silence_samples {
            self.finish_utterance();
        } else if self.current.len() >= self.max_speech_samples {
            self.finish_utterance();
        }
    }

    fn finish_utterance(&mut self) {
        let speech_len = self.current.len().saturating_sub(self.trailing_silence);
        let samples: Vec<f32> = self.current.drain(..).take(speech_len).collect();
        self.triggered = false;
        self.trailing_silence = 0;

        if samples.is_empty() || samples.len() < self.min_speech_samples {
            debug!(samples = samples.len(), "Discarding utterance shorter than min speech duration");
            return;
        }

        self.completed.push_back(SpeechSegment::new(samples, self.sample_rate));
    }
}

impl SegmentationEngine for EnergySegmenter {
    fn accept_frame(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);

        let full = self.pending.len() / self.window_size * self.window_size;
        if full == 0 {
            return;
        }

        let ready: Vec<f32> = self.pending.drain(..full).collect();
        for window in ready.chunks_exact(self.window_size) {
            self.process_window(window);
        }
    }

    fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    fn front(&self) -> Option<&SpeechSegment> {
        self.completed.front()
    }

    fn pop(&mut self) {
        self.completed.pop_front();
    }

    fn name(&self) -> &'static str {
        "energy_vad"
    }
}

/// Creates an [`EnergySegmenter`] for every new ASR session.
#[derive(Debug, Clone)]
pub struct EnergySegmenterFactory {
    vad: VadConfig,
    sample_rate: u32,
    provider: ComputeProvider,
}

impl EnergySegmenterFactory {
    pub fn new(vad: VadConfig, sample_rate: u32, provider: ComputeProvider) -> Self {
        Self {
            vad,
            sample_rate,
            provider,
        }
    }
}

impl SegmenterFactory for EnergySegmenterFactory {
    fn create(&self) -> Result<Box<dyn SegmentationEngine>, EngineError> {
        if self.sample_rate == 0 {
            return Err(EngineError::Construction("sample rate must be greater than 0".to_string()));
        }
        if self.vad.window_size == 0 {
            return Err(EngineError::Construction("window size must be greater than 0".to_string()));
        }
        // Pure signal math; the provider only matters for model-based detectors.
        debug!(provider = %self.provider, "Creating energy segmentation engine");
        Ok(Box::new(EnergySegmenter::new(&self.vad, self.sample_rate)))
    }
}
