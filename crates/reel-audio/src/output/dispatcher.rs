//! Fan-out of the chunk stream to every configured sink.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use reel_core::{AudioFormat, Error, FormatMask, Result};
use tracing::{debug, error, info, warn};

use super::{OutputPlugin, OutputRegistry, OutputSink, SinkState};
use crate::config::OutputConfig;

/// Drives a set of independently failing sinks.
///
/// A sink that fails is closed and skipped until the next
/// [`open_all`](Self::open_all) manages to reopen it; its siblings keep
/// playing.
#[derive(Default)]
pub struct OutputDispatcher {
    sinks: Vec<OutputSink>,
    failures: Vec<(String, Error)>,
}

impl OutputDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every configured output. Outputs whose plugin cannot be
    /// created are logged, recorded as failures and left out.
    pub fn from_configs(registry: &OutputRegistry, configs: &[OutputConfig]) -> Self {
        let mut dispatcher = Self::new();
        for config in configs {
            match registry.create(config) {
                Ok(plugin) => dispatcher.add(plugin, config.format),
                Err(e) => {
                    error!("Failed to create output {:?}: {e}", config.name);
                    dispatcher.failures.push((config.name.clone(), e));
                }
            }
        }
        info!("{} audio output(s) configured", dispatcher.sinks.len());
        dispatcher
    }

    pub fn add(&mut self, plugin: Box<dyn OutputPlugin>, mask: Option<FormatMask>) {
        self.sinks.push(OutputSink::new(plugin, mask));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.sinks.iter().filter(|s| s.is_open()).count()
    }

    /// Open every sink for `format`, retrying sinks that failed before.
    ///
    /// Fails with [`Error::NoOutputs`] if not a single sink could be opened.
    pub fn open_all(&mut self, format: AudioFormat) -> Result<()> {
        for sink in &mut self.sinks {
            if !sink.is_available() {
                debug!("Retrying output {:?}", sink.name());
            }
            if let Err(e) = sink.open(format) {
                warn!("Failed to open output {:?}: {e}", sink.name());
                self.failures.push((sink.name().to_string(), e));
            }
        }
        if self.open_count() == 0 {
            return Err(Error::NoOutputs);
        }
        Ok(())
    }

    /// Play one chunk on every open sink. Returns the number of sinks that
    /// accepted it.
    pub fn play(&mut self, data: &[u8], format: AudioFormat, scale: f32) -> Result<usize> {
        let mut delivered = 0;
        for sink in &mut self.sinks {
            if !sink.is_open() {
                continue;
            }
            match sink.play(data, format, scale) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    sink.fail(&e);
                    self.failures.push((sink.name().to_string(), e));
                }
            }
        }
        if delivered == 0 {
            return Err(Error::NoOutputs);
        }
        Ok(delivered)
    }

    /// Failures since the last call, as `(sink name, error)`.
    pub fn take_failures(&mut self) -> Vec<(String, Error)> {
        std::mem::take(&mut self.failures)
    }

    pub fn cancel_all(&mut self) {
        self.sinks.iter_mut().for_each(OutputSink::cancel);
    }

    pub fn close_all(&mut self) {
        self.sinks.iter_mut().for_each(OutputSink::close);
    }

    pub fn finish_all(&mut self) {
        self.sinks.iter_mut().for_each(OutputSink::finish);
    }

    pub fn sink_states(&self) -> Vec<SinkState> {
        self.sinks.iter().map(OutputSink::state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::RecordingOutput;
    use reel_core::SampleFormat;

    fn chunk(i: u8) -> Vec<u8> {
        vec![i; 64]
    }

    #[test]
    fn test_failing_sink_is_isolated() {
        let (good, good_log) = RecordingOutput::new("good");
        let (bad, bad_log) = RecordingOutput::new("bad");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(good), None);
        dispatcher.add(Box::new(bad.failing_on(3)), None);
        dispatcher.open_all(AudioFormat::cd()).unwrap();

        for i in 0..5 {
            let delivered = dispatcher.play(&chunk(i), AudioFormat::cd(), 1.0).unwrap();
            assert_eq!(delivered, if i < 2 { 2 } else { 1 });
        }

        let states = dispatcher.sink_states();
        assert!(states[0].open && states[0].available);
        assert!(!states[1].open && !states[1].available);
        assert_eq!(states[1].failures, 1);

        assert_eq!(good_log.lock().chunks.len(), 5);
        assert_eq!(bad_log.lock().chunks.len(), 2);
        assert_eq!(bad_log.lock().closes, 1);

        let failures = dispatcher.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");
    }

    #[test]
    fn test_failed_sink_retried_on_open() {
        let (bad, log) = RecordingOutput::new("bad");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(bad.failing_on(1)), None);
        dispatcher.open_all(AudioFormat::cd()).unwrap();

        assert!(matches!(
            dispatcher.play(&chunk(0), AudioFormat::cd(), 1.0),
            Err(Error::NoOutputs)
        ));
        dispatcher.open_all(AudioFormat::cd()).unwrap();
        assert_eq!(dispatcher.play(&chunk(1), AudioFormat::cd(), 1.0).unwrap(), 1);
        assert_eq!(log.lock().opens.len(), 2);
    }

    #[test]
    fn test_open_is_idempotent() {
        let (sink, log) = RecordingOutput::new("sink");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(sink), None);
        dispatcher.open_all(AudioFormat::cd()).unwrap();
        dispatcher.open_all(AudioFormat::cd()).unwrap();
        assert_eq!(log.lock().opens.len(), 1);

        let other = AudioFormat::new(48_000, SampleFormat::S16, 2).unwrap();
        dispatcher.open_all(other).unwrap();
        assert_eq!(log.lock().opens.len(), 2);
        assert_eq!(log.lock().closes, 1);
    }

    #[test]
    fn test_adjusted_format_is_converted() {
        let float_mono = AudioFormat::new(44_100, SampleFormat::Float, 1).unwrap();
        let (sink, log) = RecordingOutput::new("sink");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(sink.adjusting_to(float_mono)), None);
        dispatcher.open_all(AudioFormat::cd()).unwrap();

        let data: Vec<u8> = [16_384i16, 16_384].iter().flat_map(|v| v.to_ne_bytes()).collect();
        dispatcher.play(&data, AudioFormat::cd(), 1.0).unwrap();
        assert_eq!(log.lock().chunks[0], 0.5f32.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_forced_format_mask() {
        let (sink, log) = RecordingOutput::new("sink");
        let mask: FormatMask = "48000:*:*".parse().unwrap();
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(sink), Some(mask));
        dispatcher.open_all(AudioFormat::cd()).unwrap();
        assert_eq!(
            log.lock().opens[0],
            AudioFormat::new(48_000, SampleFormat::S16, 2).unwrap()
        );
    }

    #[test]
    fn test_no_sinks() {
        let mut dispatcher = OutputDispatcher::new();
        assert!(matches!(
            dispatcher.open_all(AudioFormat::cd()),
            Err(Error::NoOutputs)
        ));
    }

    #[test]
    fn test_finish_once() {
        let (sink, log) = RecordingOutput::new("sink");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(sink), None);
        dispatcher.open_all(AudioFormat::cd()).unwrap();
        dispatcher.cancel_all();
        dispatcher.finish_all();
        dispatcher.finish_all();
        drop(dispatcher);
        let log = log.lock();
        assert_eq!(log.cancels, 1);
        assert_eq!(log.closes, 1);
        assert_eq!(log.finishes, 1);
    }

    #[test]
    fn test_refused_open_skipped_then_retried() {
        let (good, good_log) = RecordingOutput::new("good");
        let (busy, busy_log) = RecordingOutput::new("busy");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(good), None);
        dispatcher.add(Box::new(busy.failing_open(1)), None);

        dispatcher.open_all(AudioFormat::cd()).unwrap();
        assert_eq!(dispatcher.open_count(), 1);
        let failures = dispatcher.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "busy");
        assert!(!dispatcher.sink_states()[1].available);

        assert_eq!(dispatcher.play(&chunk(0), AudioFormat::cd(), 1.0).unwrap(), 1);
        assert!(busy_log.lock().chunks.is_empty());

        dispatcher.open_all(AudioFormat::cd()).unwrap();
        assert_eq!(dispatcher.open_count(), 2);
        assert!(dispatcher.sink_states()[1].available);
        assert_eq!(dispatcher.play(&chunk(1), AudioFormat::cd(), 1.0).unwrap(), 2);

        assert_eq!(busy_log.lock().open_calls, 2);
        assert_eq!(busy_log.lock().chunks, vec![chunk(1)]);
        assert_eq!(good_log.lock().chunks.len(), 2);
    }

    #[test]
    fn test_all_opens_refused() {
        let (busy, _log) = RecordingOutput::new("busy");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(busy.failing_open(usize::MAX)), None);
        assert!(matches!(
            dispatcher.open_all(AudioFormat::cd()),
            Err(Error::NoOutputs)
        ));
        assert_eq!(dispatcher.sink_states()[0].failures, 1);
    }

    #[test]
    fn test_resampled_tail_played_on_finish() {
        let src = AudioFormat::new(48_000, SampleFormat::S16, 2).unwrap();
        let dst = AudioFormat::cd();
        let (sink, log) = RecordingOutput::new("sink");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(sink.adjusting_to(dst)), None);
        dispatcher.open_all(src).unwrap();

        // Less than one resampler block: nothing reaches the device yet.
        let data = vec![0u8; 500 * src.frame_size()];
        assert_eq!(dispatcher.play(&data, src, 1.0).unwrap(), 1);
        assert_eq!(log.lock().bytes(), 0);

        dispatcher.finish_all();
        let log = log.lock();
        assert!(log.bytes() > 0);
        assert_eq!(log.bytes() % dst.frame_size(), 0);
        assert!(log.bytes() <= 460 * dst.frame_size());
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_cancel_drops_resampled_tail() {
        let src = AudioFormat::new(48_000, SampleFormat::S16, 2).unwrap();
        let (sink, log) = RecordingOutput::new("sink");
        let mut dispatcher = OutputDispatcher::new();
        dispatcher.add(Box::new(sink.adjusting_to(AudioFormat::cd())), None);
        dispatcher.open_all(src).unwrap();

        let data = vec![0u8; 500 * src.frame_size()];
        dispatcher.play(&data, src, 1.0).unwrap();
        dispatcher.cancel_all();
        dispatcher.close_all();
        assert_eq!(log.lock().bytes(), 0);
        assert_eq!(log.lock().closes, 1);
    }
}
