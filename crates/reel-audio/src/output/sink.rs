//! One configured output together with its conversion state.

use reel_core::{AudioFormat, Error, FormatMask, Result};
use tracing::{debug, warn};

use super::OutputPlugin;
use crate::pcm::PcmConverter;

/// Status of a sink, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkState {
    pub name: String,
    pub open: bool,
    pub available: bool,
    /// Format the pipeline delivers.
    pub in_format: Option<AudioFormat>,
    /// Format the device accepted.
    pub out_format: Option<AudioFormat>,
    pub failures: u32,
}

pub struct OutputSink {
    plugin: Box<dyn OutputPlugin>,
    name: String,
    mask: Option<FormatMask>,
    open: bool,
    available: bool,
    in_format: Option<AudioFormat>,
    out_format: Option<AudioFormat>,
    converter: PcmConverter,
    failures: u32,
    finished: bool,
}

impl OutputSink {
    pub fn new(plugin: Box<dyn OutputPlugin>, mask: Option<FormatMask>) -> Self {
        let name = plugin.name().to_string();
        Self {
            plugin,
            name,
            mask: mask.filter(|m| !m.is_empty()),
            open: false,
            available: true,
            in_format: None,
            out_format: None,
            converter: PcmConverter::new(),
            failures: 0,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn is_open(&self) -> bool {
        self.open
    }

    pub const fn is_available(&self) -> bool {
        self.available
    }

    pub const fn in_format(&self) -> Option<AudioFormat> {
        self.in_format
    }

    /// Open for `format`. Does nothing when already open for it.
    pub fn open(&mut self, format: AudioFormat) -> Result<()> {
        if self.finished {
            return Err(Error::Output(format!("{} was finished", self.name)));
        }
        if self.open && self.in_format == Some(format) {
            return Ok(());
        }
        if self.open {
            self.close();
        }

        let requested = match self.mask {
            Some(mask) => format.apply_mask(&mask)?,
            None => format,
        };
        match self.plugin.open(requested) {
            Ok(actual) => {
                if actual == requested {
                    debug!("Output {:?} opened with {actual}", self.name);
                } else {
                    debug!(
                        "Output {:?} adjusted {requested} to {actual}, converting",
                        self.name
                    );
                }
                self.open = true;
                self.available = true;
                self.in_format = Some(format);
                self.out_format = Some(actual);
                self.converter.reset();
                Ok(())
            }
            Err(e) => {
                self.available = false;
                self.failures += 1;
                Err(e)
            }
        }
    }

    /// Convert `data` (in `format`, scaled by `scale`) and play it.
    pub fn play(&mut self, data: &[u8], format: AudioFormat, scale: f32) -> Result<()> {
        if self.in_format != Some(format) {
            self.open(format)?;
        }
        let out_format = match (self.open, self.out_format) {
            (true, Some(out_format)) => out_format,
            _ => return Err(Error::Output(format!("{} is not open", self.name))),
        };
        let converted = self.converter.convert(format, data, out_format, scale)?;
        if converted.is_empty() {
            return Ok(());
        }
        self.plugin.play(converted)
    }

    /// Close after a failure and exclude from playback until the next
    /// successful open. Buffered audio is dropped.
    pub fn fail(&mut self, error: &Error) {
        warn!("Output {:?} failed: {error}", self.name);
        self.release();
        self.available = false;
        self.failures += 1;
    }

    pub fn cancel(&mut self) {
        if self.open {
            self.plugin.cancel();
            self.converter.reset();
        }
    }

    /// Play out what the converter still holds, then close.
    pub fn close(&mut self) {
        self.drain();
        self.release();
    }

    /// Hand the resampler's last partial block to the plugin.
    fn drain(&mut self) {
        let Some(out_format) = self.out_format.filter(|_| self.open) else {
            return;
        };
        let result = match self.converter.flush(out_format) {
            Ok(tail) if tail.is_empty() => Ok(()),
            Ok(tail) => self.plugin.play(tail),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Output {:?} dropped its last block: {e}", self.name);
        }
    }

    fn release(&mut self) {
        if self.open {
            debug!("Closing output {:?}", self.name);
            self.plugin.close();
            self.converter.reset();
            self.open = false;
            self.in_format = None;
            self.out_format = None;
        }
    }

    /// Close and tear down. Later calls do nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.close();
        self.plugin.finish();
        self.finished = true;
    }

    pub fn state(&self) -> SinkState {
        SinkState {
            name: self.name.clone(),
            open: self.open,
            available: self.available,
            in_format: self.in_format,
            out_format: self.out_format,
            failures: self.failures,
        }
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        self.finish();
    }
}
