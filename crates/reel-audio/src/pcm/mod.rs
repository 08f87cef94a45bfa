//! PCM conversion between a decoder's format and a sink's format.
//!
//! Conversion goes through interleaved `f32`: decode, gain, channel remap,
//! resample, encode. Each stage is skipped when it would be a no-op.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

pub mod channels;
pub mod resample;
pub mod sample;
pub mod volume;

use std::mem;

use reel_core::{AudioFormat, Result};
use tracing::debug;

pub use resample::Resampler;
pub use volume::apply_scale;

/// Per-sink conversion state.
///
/// Scratch buffers are reused between chunks; they grow to the largest
/// chunk seen and are never shrunk.
#[derive(Default)]
pub struct PcmConverter {
    samples: Vec<f32>,
    scratch: Vec<f32>,
    output: Vec<u8>,
    resampler: Option<Resampler>,
}

impl PcmConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert `data` from `src` to `dst`, multiplying by `scale`.
    ///
    /// When nothing needs to change the input slice is returned as is.
    pub fn convert<'a>(
        &'a mut self,
        src: AudioFormat,
        data: &'a [u8],
        dst: AudioFormat,
        scale: f32,
    ) -> Result<&'a [u8]> {
        if src == dst && volume::is_unity(scale) {
            return Ok(data);
        }

        self.samples.clear();
        sample::decode(src.format(), data, &mut self.samples)?;
        volume::apply_scale(&mut self.samples, scale);

        if src.channels() != dst.channels() {
            self.scratch.clear();
            channels::remap(
                &self.samples,
                usize::from(src.channels()),
                usize::from(dst.channels()),
                &mut self.scratch,
            );
            mem::swap(&mut self.samples, &mut self.scratch);
        }

        if src.sample_rate() != dst.sample_rate() {
            self.ensure_resampler(src.sample_rate(), dst)?;
            self.scratch.clear();
            if let Some(resampler) = self.resampler.as_mut() {
                resampler.process(&self.samples, &mut self.scratch)?;
            }
            mem::swap(&mut self.samples, &mut self.scratch);
        }

        self.output.clear();
        sample::encode(dst.format(), &self.samples, &mut self.output)?;
        Ok(&self.output)
    }

    /// Emit what the resampler still holds, padded with silence, as `dst`
    /// bytes. Empty when nothing is buffered.
    pub fn flush(&mut self, dst: AudioFormat) -> Result<&[u8]> {
        self.output.clear();
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(&self.output);
        };
        if resampler.buffered_frames() == 0 {
            return Ok(&self.output);
        }
        self.scratch.clear();
        resampler.flush(&mut self.scratch)?;
        sample::encode(dst.format(), &self.scratch, &mut self.output)?;
        Ok(&self.output)
    }

    fn ensure_resampler(&mut self, input_rate: u32, dst: AudioFormat) -> Result<()> {
        let channels = usize::from(dst.channels());
        let matches = self.resampler.as_ref().is_some_and(|r| {
            r.input_rate() == input_rate
                && r.output_rate() == dst.sample_rate()
                && r.channels() == channels
        });
        if !matches {
            debug!("Creating resampler {input_rate}Hz -> {}Hz", dst.sample_rate());
            self.resampler = Some(Resampler::new(input_rate, dst.sample_rate(), channels)?);
        }
        Ok(())
    }

    /// Forget buffered resampler input (after a seek or cancel).
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}
