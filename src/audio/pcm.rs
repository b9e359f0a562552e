//! PCM sample conversions
//!
//! All wire audio is little-endian. PCM16 samples map to float32 by dividing
//! by 32768, so -32768 becomes exactly -1.0.

const PCM16_SCALE: f32 = 32768.0;

/// Decode little-endian PCM16 bytes into samples. A trailing odd byte is dropped.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Convert PCM16 LE bytes to float32 LE bytes.
///
/// Odd-length input is truncated to the last whole sample.
pub fn pcm16_to_f32le(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() % 2 != 0 {
        log::debug!(
            "PCM: dropping trailing byte of odd-length frame ({} bytes)",
            bytes.len()
        );
    }
    let mut out = Vec::with_capacity(bytes.len() / 2 * 4);
    for pair in bytes.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        out.extend_from_slice(&(sample as f32 / PCM16_SCALE).to_le_bytes());
    }
    out
}

/// Convert float32 LE bytes back to PCM16 LE bytes, clamping to [-1.0, 1.0).
pub fn f32le_to_pcm16(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / 4 * 2);
    for quad in bytes.chunks_exact(4) {
        let value = f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
        let scaled = (value * PCM16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32);
        out.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    out
}

/// Playback duration of a PCM16 mono buffer.
pub fn pcm16_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (byte_len as u64 / 2) * 1000 / sample_rate as u64
}
