//! Recording output for tests.

use std::sync::Arc;

use parking_lot::Mutex;
use reel_core::{AudioFormat, Error, Result};

use super::OutputPlugin;

/// Everything a [`RecordingOutput`] was asked to do.
#[derive(Debug, Default)]
pub struct Recording {
    /// Every `open` call, including refused ones.
    pub open_calls: usize,
    /// Formats of successful opens.
    pub opens: Vec<AudioFormat>,
    pub chunks: Vec<Vec<u8>>,
    pub play_calls: usize,
    pub cancels: usize,
    pub closes: usize,
    pub finishes: usize,
}

impl Recording {
    pub fn bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

pub struct RecordingOutput {
    name: String,
    log: Arc<Mutex<Recording>>,
    /// Fail the n-th call to `play` (1-based).
    fail_on_play: Option<usize>,
    /// Refuse this many `open` calls before accepting.
    refused_opens: usize,
    panic_on_open: bool,
    /// Format reported back from `open`.
    adjust: Option<AudioFormat>,
}

impl RecordingOutput {
    pub fn new(name: &str) -> (Self, Arc<Mutex<Recording>>) {
        let log = Arc::new(Mutex::new(Recording::default()));
        (Self::with_log(name, Arc::clone(&log)), log)
    }

    /// Record into an existing log, e.g. from an output factory.
    pub fn with_log(name: &str, log: Arc<Mutex<Recording>>) -> Self {
        Self {
            name: name.to_string(),
            log,
            fail_on_play: None,
            refused_opens: 0,
            panic_on_open: false,
            adjust: None,
        }
    }

    pub const fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_play = Some(call);
        self
    }

    /// Refuse the first `count` opens, as a device that is busy.
    pub const fn failing_open(mut self, count: usize) -> Self {
        self.refused_opens = count;
        self
    }

    pub const fn panicking_on_open(mut self) -> Self {
        self.panic_on_open = true;
        self
    }

    pub const fn adjusting_to(mut self, format: AudioFormat) -> Self {
        self.adjust = Some(format);
        self
    }
}

impl OutputPlugin for RecordingOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: AudioFormat) -> Result<AudioFormat> {
        assert!(!self.panic_on_open, "{} crashed", self.name);
        let mut log = self.log.lock();
        log.open_calls += 1;
        if log.open_calls <= self.refused_opens {
            return Err(Error::Output(format!("{} is busy", self.name)));
        }
        log.opens.push(format);
        Ok(self.adjust.unwrap_or(format))
    }

    fn play(&mut self, data: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        log.play_calls += 1;
        if self.fail_on_play == Some(log.play_calls) {
            return Err(Error::Output(format!("{} write failed", self.name)));
        }
        log.chunks.push(data.to_vec());
        Ok(())
    }

    fn cancel(&mut self) {
        self.log.lock().cancels += 1;
    }

    fn close(&mut self) {
        self.log.lock().closes += 1;
    }

    fn finish(&mut self) {
        self.log.lock().finishes += 1;
    }
}
