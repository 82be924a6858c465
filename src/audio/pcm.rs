//! Conversions between normalized float samples and 16-bit PCM.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::{LivevoxError, Result};

/// Convert one normalized sample to 16-bit PCM.
///
/// The input is clamped to `[-1.0, 1.0]` and scaled by `i16::MAX`, truncating
/// toward zero, so `1.0 -> 32767` and `-1.0 -> -32767`. `-32768` is never
/// produced. NaN maps to `0`.
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

#[must_use]
pub fn f32_to_i16_block(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s)).collect()
}

#[must_use]
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Little-endian 16-bit PCM to floats in `[-1.0, 1.0)`. A trailing odd byte is ignored.
#[must_use]
pub fn le_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

#[must_use]
pub fn encode_base64(samples: &[i16]) -> String {
    B64.encode(i16_to_le_bytes(samples))
}

/// Decode a base64 PCM payload as delivered by the live endpoint.
pub fn decode_base64(payload: &str) -> Result<Vec<f32>> {
    let bytes = B64
        .decode(payload)
        .map_err(|e| LivevoxError::Protocol(format!("invalid base64 audio payload: {e}")))?;
    Ok(le_bytes_to_f32(&bytes))
}
