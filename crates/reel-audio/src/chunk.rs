//! Decoded audio chunks and the ring that carries them.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cmp::Ordering;
use std::sync::Arc;

use reel_core::{AudioFormat, ReplayGainInfo, Tag};

use crate::buffer::{Consumer, Producer, RingBuffer};

/// Byte capacity of one chunk.
pub const CHUNK_SIZE: usize = 4096;

/// A fixed-capacity unit of decoded PCM.
///
/// Chunks are allocated once with the ring and reused; the producer fills
/// them in place and the consumer reads them.
#[derive(Debug)]
pub struct AudioChunk {
    data: Box<[u8; CHUNK_SIZE]>,
    length: usize,
    /// Bit rate estimate in kbit/s.
    pub bit_rate: u16,
    /// Song position of the first frame, in seconds.
    pub time: f64,
    pub format: Option<AudioFormat>,
    /// Tag that becomes current when this chunk is played.
    pub tag: Option<Box<Tag>>,
    pub replay_gain: Option<Arc<ReplayGainInfo>>,
    /// Decode generation that produced this chunk.
    pub sequence: u32,
}

impl Default for AudioChunk {
    fn default() -> Self {
        Self {
            data: Box::new([0; CHUNK_SIZE]),
            length: 0,
            bit_rate: 0,
            time: 0.0,
            format: None,
            tag: None,
            replay_gain: None,
            sequence: 0,
        }
    }
}

impl AudioChunk {
    /// The used part of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub const fn len(&self) -> usize {
        self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Usable capacity when only whole frames of `frame_size` bytes are
    /// stored.
    pub const fn frame_capacity(frame_size: usize) -> usize {
        CHUNK_SIZE - CHUNK_SIZE % frame_size
    }

    /// Bytes still free for whole frames of `frame_size`.
    pub const fn remaining(&self, frame_size: usize) -> usize {
        Self::frame_capacity(frame_size).saturating_sub(self.length)
    }

    pub const fn is_full(&self, frame_size: usize) -> bool {
        self.remaining(frame_size) < frame_size
    }

    /// Append as many whole frames of `data` as fit. Returns bytes copied.
    pub fn append(&mut self, data: &[u8], frame_size: usize) -> usize {
        let room = self.remaining(frame_size);
        let n = data.len().min(room) / frame_size * frame_size;
        self.data[self.length..self.length + n].copy_from_slice(&data[..n]);
        self.length += n;
        n
    }

    /// Reset to an empty chunk, dropping attached metadata.
    pub fn clear(&mut self) {
        self.length = 0;
        self.bit_rate = 0;
        self.time = 0.0;
        self.format = None;
        self.tag = None;
        self.replay_gain = None;
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.format.map_or(0.0, |f| f.duration_of(self.length))
    }
}

pub type ChunkProducer = Producer<AudioChunk>;
pub type ChunkConsumer = Consumer<AudioChunk>;

/// Allocate the chunk ring with `chunks` slots (rounded up to a power of
/// two, one reserved).
pub fn chunk_ring(chunks: usize) -> (ChunkProducer, ChunkConsumer) {
    RingBuffer::<AudioChunk>::with_capacity(chunks).split()
}

/// Compare generation numbers, tolerating wraparound.
///
/// `a` is newer than `b` when it is less than half the number space ahead.
pub const fn sequence_cmp(a: u32, b: u32) -> Ordering {
    let diff = a.wrapping_sub(b) as i32;
    if diff < 0 {
        Ordering::Less
    } else if diff > 0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}
