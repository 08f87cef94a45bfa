//! Raw PCM file output.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use reel_core::{AudioFormat, Error, Result};
use tracing::{debug, warn};

use super::OutputPlugin;
use crate::config::OutputConfig;

/// Writes the raw sample stream to a file, truncating it on every open.
#[derive(Debug)]
pub struct FileOutput {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileOutput {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            writer: None,
        }
    }

    /// Options: `path` (required).
    pub fn from_config(config: &OutputConfig) -> Result<Self> {
        let path = config.option("path").ok_or_else(|| {
            Error::Config(format!("output {:?}: file plugin needs a path", config.name))
        })?;
        Ok(Self::new(config.name.clone(), path))
    }

    fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush {}: {e}", self.path.display());
            }
        }
    }
}

impl OutputPlugin for FileOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: AudioFormat) -> Result<AudioFormat> {
        let file = File::create(&self.path).map_err(|e| {
            Error::Output(format!("Failed to create {}: {e}", self.path.display()))
        })?;
        debug!("Writing {format} PCM to {}", self.path.display());
        self.writer = Some(BufWriter::new(file));
        Ok(format)
    }

    fn play(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Output(format!("{} is not open", self.name)))?;
        writer
            .write_all(data)
            .map_err(|e| Error::Output(format!("Failed to write {}: {e}", self.path.display())))
    }

    /// Audio already handed to the file cannot be taken back; flush it.
    fn cancel(&mut self) {
        self.flush();
    }

    fn close(&mut self) {
        self.flush();
        self.writer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let mut output = FileOutput::new("file", &path);

        output.open(AudioFormat::cd()).unwrap();
        output.play(&[1, 2, 3, 4]).unwrap();
        output.play(&[5, 6, 7, 8]).unwrap();
        output.close();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_play_before_open_fails() {
        let mut output = FileOutput::new("file", "/nonexistent/out.pcm");
        assert!(matches!(output.play(&[0; 4]), Err(Error::Output(_))));
        assert!(output.open(AudioFormat::cd()).is_err());
    }

    #[test]
    fn test_requires_path() {
        let config = OutputConfig::new("file", "file");
        assert!(matches!(FileOutput::from_config(&config), Err(Error::Config(_))));
    }
}
