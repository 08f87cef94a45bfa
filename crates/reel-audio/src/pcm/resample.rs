//! Sample-rate conversion using rubato.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use reel_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

const CHUNK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Streaming resampler for interleaved `f32` audio.
///
/// Input is buffered per channel until a whole rubato chunk is available,
/// so small or oddly sized chunks can be fed one at a time.
pub struct Resampler {
    inner: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk.
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let inner = FftFixedIn::new(
            input_rate as usize,
            output_rate as usize,
            CHUNK_FRAMES,
            SUB_CHUNKS,
            channels,
        )
        .map_err(|e| Error::Conversion(format!("Failed to create resampler: {e}")))?;

        debug!("Resampler created: {input_rate}Hz -> {output_rate}Hz, {channels} channels");

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
        })
    }

    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Frames buffered but not yet converted.
    pub fn buffered_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// Feed interleaved samples; converted output is appended to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        for frame in input.chunks_exact(self.channels) {
            for (ch, buffer) in self.pending.iter_mut().enumerate() {
                buffer.push(frame[ch]);
            }
        }

        while self.buffered_frames() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();
            let resampled = self
                .inner
                .process(&chunk, None)
                .map_err(|e| Error::Conversion(format!("Resample failed: {e}")))?;
            interleave(&resampled, usize::MAX, out);
        }
        Ok(())
    }

    /// Convert whatever is still buffered, padding with silence, and append
    /// only the part that corresponds to real input.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let remaining = self.buffered_frames();
        if remaining == 0 {
            return Ok(());
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|ch| {
                let mut data = std::mem::take(ch);
                data.resize(CHUNK_FRAMES, 0.0);
                data
            })
            .collect();
        let resampled = self
            .inner
            .process(&chunk, None)
            .map_err(|e| Error::Conversion(format!("Resample failed: {e}")))?;

        let frames = (remaining as f64 * f64::from(self.output_rate) / f64::from(self.input_rate))
            as usize;
        interleave(&resampled, frames, out);
        Ok(())
    }

    /// Drop buffered input and filter state (after a seek or cancel).
    pub fn reset(&mut self) {
        self.inner.reset();
        self.pending.iter_mut().for_each(Vec::clear);
    }
}

fn interleave(channels: &[Vec<f32>], max_frames: usize, out: &mut Vec<f32>) {
    let Some(first) = channels.first() else {
        return;
    };
    let frames = first.len().min(max_frames);
    out.reserve(frames * channels.len());
    for frame in 0..frames {
        out.extend(channels.iter().map(|ch| ch[frame]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampler_creation() {
        let resampler = Resampler::new(48_000, 44_100, 2).unwrap();
        assert_eq!(resampler.input_rate(), 48_000);
        assert_eq!(resampler.output_rate(), 44_100);
        assert_eq!(resampler.channels(), 2);
    }

    #[test]
    fn test_small_input_is_buffered() {
        let mut resampler = Resampler::new(44_100, 48_000, 2).unwrap();
        let mut out = Vec::new();
        resampler.process(&[0.1; 200], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(resampler.buffered_frames(), 100);

        resampler.reset();
        assert_eq!(resampler.buffered_frames(), 0);
    }

    #[test]
    fn test_output_length_tracks_ratio() {
        let mut resampler = Resampler::new(44_100, 22_050, 1).unwrap();
        let mut out = Vec::new();
        resampler.process(&vec![0.0; CHUNK_FRAMES * 4], &mut out).unwrap();
        resampler.flush(&mut out).unwrap();
        // Four full chunks at half rate; the FFT resampler emits exactly
        // half as many frames per chunk.
        assert_eq!(out.len(), CHUNK_FRAMES * 2);
    }
}
