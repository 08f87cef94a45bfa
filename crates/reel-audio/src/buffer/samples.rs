//! Interleaved f32 sample FIFO between an output sink and its device
//! callback.
//!
//! The sink (player thread) writes converted samples, the real-time
//! callback reads them. Allocation happens once, up front.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ring::{Consumer, Producer, RingBuffer};

/// Create a sample FIFO holding at least `capacity` samples.
pub fn sample_ring(capacity: usize) -> (SampleWriter, SampleReader) {
    let (producer, consumer) = RingBuffer::new(capacity + 1, || 0.0f32).split();
    let clear = Arc::new(AtomicBool::new(false));
    (
        SampleWriter {
            producer,
            clear: Arc::clone(&clear),
        },
        SampleReader { consumer, clear },
    )
}

/// Writing side, owned by the sink.
pub struct SampleWriter {
    producer: Producer<f32>,
    clear: Arc<AtomicBool>,
}

impl SampleWriter {
    /// Copy as many samples as fit. Returns the number written.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let (first, second) = self.producer.write_vector();
        let head = samples.len().min(first.len());
        first[..head].copy_from_slice(&samples[..head]);
        let tail = (samples.len() - head).min(second.len());
        second[..tail].copy_from_slice(&samples[head..head + tail]);
        self.producer.advance_write(head + tail);
        head + tail
    }

    /// Free sample slots.
    pub fn free(&self) -> usize {
        self.producer.write_space()
    }

    /// Samples not yet consumed by the reader.
    pub fn available(&self) -> usize {
        self.producer.read_space()
    }

    /// Ask the reader to drop everything queued so far.
    ///
    /// The reader owns the read cursor, so the flush happens on its next
    /// [`SampleReader::read`].
    pub fn request_clear(&self) {
        self.clear.store(true, Ordering::Release);
    }

    /// Whether a requested clear has not been carried out yet.
    pub fn clear_pending(&self) -> bool {
        self.clear.load(Ordering::Acquire)
    }
}

/// Reading side, owned by the device callback.
pub struct SampleReader {
    consumer: Consumer<f32>,
    clear: Arc<AtomicBool>,
}

impl SampleReader {
    /// Fill `output` from the FIFO. Returns the number of samples read; the
    /// rest of `output` is left untouched.
    pub fn read(&mut self, output: &mut [f32]) -> usize {
        if self.clear.swap(false, Ordering::AcqRel) {
            self.consumer.discard();
        }

        let (first, second) = self.consumer.read_vector();
        let head = output.len().min(first.len());
        output[..head].copy_from_slice(&first[..head]);
        let tail = (output.len() - head).min(second.len());
        output[head..head + tail].copy_from_slice(&second[..tail]);
        self.consumer.advance_read(head + tail);
        head + tail
    }

    pub fn available(&self) -> usize {
        self.consumer.read_space()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_write_read_wraps() {
        let (mut writer, mut reader) = sample_ring(7);
        assert_eq!(writer.free(), 7);

        assert_eq!(writer.write(&[1.0; 6]), 6);
        let mut out = [0.0f32; 4];
        assert_eq!(reader.read(&mut out), 4);

        assert_eq!(writer.write(&[2.0; 5]), 5);
        let mut out = [0.0f32; 8];
        assert_eq!(reader.read(&mut out), 7);
        assert_eq!(&out[..7], &[1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_write_stops_when_full() {
        let (mut writer, _reader) = sample_ring(3);
        assert_eq!(writer.write(&[0.5; 10]), 3);
        assert_eq!(writer.write(&[0.5]), 0);
        assert_eq!(writer.available(), 3);
    }

    #[test]
    fn test_clear_is_applied_by_reader() {
        let (mut writer, mut reader) = sample_ring(16);
        writer.write(&[1.0; 10]);
        writer.request_clear();
        assert!(writer.clear_pending());

        let mut out = [0.0f32; 4];
        assert_eq!(reader.read(&mut out), 0);
        assert!(!writer.clear_pending());
        assert_eq!(writer.available(), 0);
    }
}
