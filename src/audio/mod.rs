//! # Audio Processing Module
//!
//! Pure audio conversions used by both endpoints. Nothing in here holds state
//! between calls.
//!
//! ## Key Components:
//! - **PCM Normalizer**: wire bytes (16-bit little-endian) to `f32` samples
//! - **Resampler**: linear-interpolation rate conversion for synthesized audio
//! - **WAV Framer**: canonical 44-byte RIFF/WAVE container around PCM16
//!
//! ## Audio Format on the Wire:
//! - **Encoding**: signed 16-bit little-endian PCM, mono
//! - **Inbound rate**: 16kHz (ASR endpoint)
//! - **Outbound rate**: the transport rate, 16kHz (TTS endpoint)

pub mod pcm;       // Normalization and PCM16 encoding
pub mod resample;  // Linear-interpolation resampler
pub mod wav;       // RIFF/WAVE framing

pub use pcm::{bytes_to_normalized_pcm, float_to_pcm16};
pub use resample::resample_linear;
pub use wav::{float_to_wav, pcm_to_wav, WAV_HEADER_LEN};
