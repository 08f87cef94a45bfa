//! Native-endian sample decoding and encoding.
//!
//! Everything is converted through `f32` in the range -1.0..=1.0. Encoding
//! clips; there is no dithering.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use reel_core::{Error, Result, SampleFormat};

const S24_MAX: f32 = 8_388_607.0;

/// Decode interleaved samples of `format` from `bytes`, appending to `out`.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn decode(format: SampleFormat, bytes: &[u8], out: &mut Vec<f32>) -> Result<()> {
    let size = format.sample_size();
    out.reserve(bytes.len() / size);
    match format {
        SampleFormat::S8 => out.extend(bytes.iter().map(|&b| f32::from(b as i8) / 128.0)),
        SampleFormat::S16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|b| f32::from(i16::from_ne_bytes([b[0], b[1]])) / 32_768.0),
        ),
        SampleFormat::S24P32 => out.extend(bytes.chunks_exact(4).map(|b| {
            // Sign-extend from bit 23.
            let raw = i32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
            ((raw << 8) >> 8) as f32 / (S24_MAX + 1.0)
        })),
        SampleFormat::S32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0),
        ),
        SampleFormat::Float => out.extend(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
        ),
        SampleFormat::Dsd => {
            return Err(Error::UnsupportedFormat("cannot convert DSD samples".to_string()))
        }
    }
    Ok(())
}

/// Encode `samples` as `format`, appending to `out`. Values are clipped.
pub fn encode(format: SampleFormat, samples: &[f32], out: &mut Vec<u8>) -> Result<()> {
    out.reserve(samples.len() * format.sample_size());
    match format {
        SampleFormat::S8 => {
            out.extend(samples.iter().map(|&s| (clip(s) * 127.0).round() as i8 as u8));
        }
        SampleFormat::S16 => {
            for &s in samples {
                out.extend_from_slice(&((clip(s) * 32_767.0).round() as i16).to_ne_bytes());
            }
        }
        SampleFormat::S24P32 => {
            for &s in samples {
                out.extend_from_slice(&((clip(s) * S24_MAX).round() as i32).to_ne_bytes());
            }
        }
        SampleFormat::S32 => {
            for &s in samples {
                let v = (f64::from(clip(s)) * f64::from(i32::MAX)).round() as i32;
                out.extend_from_slice(&v.to_ne_bytes());
            }
        }
        SampleFormat::Float => {
            for &s in samples {
                out.extend_from_slice(&clip(s).to_ne_bytes());
            }
        }
        SampleFormat::Dsd => {
            return Err(Error::UnsupportedFormat("cannot convert DSD samples".to_string()))
        }
    }
    Ok(())
}

#[inline]
fn clip(sample: f32) -> f32 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}
