//! Lock-free buffers between the pipeline threads.

pub mod ring;
pub mod samples;

pub use ring::{Consumer, Producer, RingBuffer};
pub use samples::{sample_ring, SampleReader, SampleWriter};
