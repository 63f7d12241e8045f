//! # PCM Conversion
//!
//! Converts between the wire representation (signed 16-bit little-endian
//! integers) and the normalized floating-point samples the engines consume.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use tracing::debug;

/// Scale of a signed 16-bit sample when normalizing to [-1.0, 1.0).
const PCM16_SCALE: f32 = 32768.0;

/// Convert raw PCM16 bytes from the wire into normalized samples.
///
/// ## Conversion:
/// Each sample is `int16 / 32768.0`, so the output lies in [-1.0, 1.0).
///
/// ## Odd-length payloads:
/// A trailing unpaired byte cannot form a sample and is dropped. The caller
/// receives one sample per complete byte pair; this is a lenient policy, not
/// a protocol error.
pub fn bytes_to_normalized_pcm(data: &[u8]) -> Vec<f32> {
    if data.len() % 2 != 0 {
        debug!(bytes = data.len(), "Dropping trailing odd byte from PCM payload");
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    // Read each 16-bit sample (little-endian format)
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM16_SCALE);
    }

    samples
}

/// Convert float samples to PCM16 bytes for transport.
///
/// Samples are clamped to [-1.0, 1.0] and scaled by `i16::MAX`, truncating
/// toward zero, so 1.0 maps to 32767 and -1.0 to -32767.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);

    for &sample in samples {
        let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let value = (clamped * i16::MAX as f32) as i16;
        pcm.extend_from_slice(&value.to_le_bytes());
    }

    pcm
}
