//! # WAV Framing
//!
//! Wraps PCM data in a canonical RIFF/WAVE container: a 44-byte header
//! followed by the raw samples. Every synthesis reply is one such file, and
//! the same framing is used to ship a speech segment to the recognition
//! sidecar.
//!
//! ## Header Layout (little-endian):
//! | Offset | Field                              |
//! |--------|------------------------------------|
//! | 0      | `RIFF`                             |
//! | 4      | chunk size = 36 + data size        |
//! | 8      | `WAVE`                             |
//! | 12     | `fmt `, size 16, format 1 (PCM)    |
//! | 22     | channels                           |
//! | 24     | sample rate                        |
//! | 28     | byte rate = rate * block align     |
//! | 32     | block align = channels * bits / 8  |
//! | 34     | bits per sample                    |
//! | 36     | `data`, data size, then PCM bytes  |

use crate::audio::pcm::float_to_pcm16;
use byteorder::{ByteOrder, LittleEndian};

/// Size of the canonical header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Build a WAV file around already-encoded PCM bytes.
///
/// The output is byte-for-byte reproducible for the same inputs; there is no
/// hidden state.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    wav.extend_from_slice(&wav_header(pcm.len() as u32, sample_rate, channels, bits_per_sample));
    wav.extend_from_slice(pcm);
    wav
}

fn wav_header(data_size: u32, sample_rate: u32, channels: u16, bits_per_sample: u16) -> [u8; WAV_HEADER_LEN] {
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;
    let mut header = [0u8; WAV_HEADER_LEN];

    // RIFF header
    header[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut header[4..8], 36 + data_size);
    header[8..12].copy_from_slice(b"WAVE");

    // fmt subchunk
    header[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut header[16..20], 16);
    LittleEndian::write_u16(&mut header[20..22], 1); // PCM
    LittleEndian::write_u16(&mut header[22..24], channels);
    LittleEndian::write_u32(&mut header[24..28], sample_rate);
    LittleEndian::write_u32(&mut header[28..32], byte_rate);
    LittleEndian::write_u16(&mut header[32..34], block_align);
    LittleEndian::write_u16(&mut header[34..36], bits_per_sample);

    // data subchunk
    header[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut header[40..44], data_size);

    header
}

/// Encode mono float samples as a 16-bit PCM WAV file at `sample_rate`.
pub fn float_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    pcm_to_wav(&float_to_pcm16(samples), sample_rate, 1, 16)
}
