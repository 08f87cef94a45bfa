//! Output that discards everything.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::time::Duration;

use reel_core::{AudioFormat, Error, Result};
use tracing::debug;

use super::OutputPlugin;
use crate::config::OutputConfig;

/// Discards audio, counting the bytes it was given.
///
/// With `sync` enabled it sleeps for the duration of each chunk, so the
/// pipeline runs at real-time speed.
#[derive(Debug)]
pub struct NullOutput {
    name: String,
    sync: bool,
    format: Option<AudioFormat>,
    bytes: u64,
}

impl NullOutput {
    pub fn new(name: impl Into<String>, sync: bool) -> Self {
        Self {
            name: name.into(),
            sync,
            format: None,
            bytes: 0,
        }
    }

    /// Options: `sync` (`true`/`false`, default `false`).
    pub fn from_config(config: &OutputConfig) -> Result<Self> {
        let sync = match config.option("sync") {
            None => false,
            Some(value) => value.parse().map_err(|_| {
                Error::Config(format!("output {:?}: bad sync value {value:?}", config.name))
            })?,
        };
        Ok(Self::new(config.name.clone(), sync))
    }

    /// Bytes played since creation.
    pub const fn bytes_played(&self) -> u64 {
        self.bytes
    }
}

impl OutputPlugin for NullOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: AudioFormat) -> Result<AudioFormat> {
        debug!("Null output {:?} opened with {format}", self.name);
        self.format = Some(format);
        Ok(format)
    }

    fn play(&mut self, data: &[u8]) -> Result<()> {
        self.bytes += data.len() as u64;
        if self.sync {
            if let Some(format) = self.format {
                std::thread::sleep(Duration::from_secs_f64(format.duration_of(data.len())));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.format = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_bytes() {
        let mut output = NullOutput::new("null", false);
        output.open(AudioFormat::cd()).unwrap();
        output.play(&[0; 100]).unwrap();
        output.play(&[0; 28]).unwrap();
        assert_eq!(output.bytes_played(), 128);
    }

    #[test]
    fn test_bad_sync_option() {
        let config = OutputConfig::new("null", "null").with_option("sync", "maybe");
        assert!(matches!(NullOutput::from_config(&config), Err(Error::Config(_))));
    }
}
