//! # Linear Resampler
//!
//! Converts synthesized audio from the engine's native rate to the transport
//! rate. Linear interpolation is enough for speech sent to a client that will
//! play it back directly; nothing downstream re-analyzes it.

/// Resample `input` from `source_rate` to `target_rate` by linear interpolation.
///
/// ## Contract:
/// - Output length is `floor(input.len() * target_rate / source_rate)`.
/// - Output sample `i` reads the source at `pos = i * source_rate / target_rate`;
///   positions at or past the second-to-last input sample repeat the last one,
///   everything else interpolates between the two neighbours.
/// - Equal rates reproduce the input exactly.
///
/// A zero rate or an empty input yields an empty output.
pub fn resample_linear(input: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if input.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    // Integer arithmetic keeps the length law exact for any rate pair
    let out_len = (input.len() as u64 * target_rate as u64 / source_rate as u64) as usize;
    let step = source_rate as f64 / target_rate as f64;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = pos as usize;
            if index >= last {
                input[last]
            } else {
                let frac = (pos - index as f64) as f32;
                input[index] * (1.0 - frac) + input[index + 1] * frac
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rate() {
        let input: Vec<f32> = (0..100).map(|i| (i as f32 * 0.1).sin()).collect();
        let output = resample_linear(&input, 22050, 22050);
        assert_eq!(output, input);
    }

    #[test]
    fn test_length_law() {
        let input = vec![0.25f32; 1001];
        for &(from, to) in &[(22050u32, 16000u32), (16000, 24000), (44100, 8000), (16000, 16001), (7, 3)] {
            let output = resample_linear(&input, from, to);
            let expected = (input.len() as u64 * to as u64 / from as u64) as usize;
            assert_eq!(output.len(), expected, "{} -> {}", from, to);
        }
    }

    #[test]
    fn test_upsampling_interpolates() {
        // Doubling the rate puts a midpoint between every pair
        let output = resample_linear(&[0.0, 1.0, 0.0], 8000, 16000);
        assert_eq!(output.len(), 6);
        assert!((output[0] - 0.0).abs() < 1e-6);
        assert!((output[1] - 0.5).abs() < 1e-6);
        assert!((output[2] - 1.0).abs() < 1e-6);
        assert!((output[3] - 0.5).abs() < 1e-6);
        // Past the second-to-last sample the last sample repeats
        assert_eq!(output[4], 0.0);
        assert_eq!(output[5], 0.0);
    }

    #[test]
    fn test_downsampling_picks_source_positions() {
        let input: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let output = resample_linear(&input, 16000, 8000);
        assert_eq!(output, vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(resample_linear(&[], 16000, 8000).is_empty());
        assert!(resample_linear(&[0.5], 0, 8000).is_empty());
        assert!(resample_linear(&[0.5], 16000, 0).is_empty());
        assert_eq!(resample_linear(&[0.5], 8000, 16000), vec![0.5, 0.5]);
    }
}
