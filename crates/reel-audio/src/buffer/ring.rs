//! Lock-free single-producer, single-consumer slot ring.
//!
//! The ring is a contiguous array of pre-allocated slots addressed by two
//! cursors. Capacity is a power of two so wrapping is a mask, and one slot
//! is always left empty: equal cursors mean *empty*, and the ring is *full*
//! one slot before they would meet again. Hence
//! `write_space() + read_space() == capacity() - 1` at all times.
//!
//! Slots are whole units (audio chunks, tag events), never bytes, so a slot
//! is either owned by the writer or by the reader and cannot tear.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared storage and cursors.
struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    /// Next slot to write; only advanced by the [`Producer`].
    write: AtomicUsize,
    /// Next slot to read; only advanced by the [`Consumer`].
    read: AtomicUsize,
}

// SAFETY: the producer only touches slots in `[write, read - 1)` and the
// consumer only slots in `[read, write)`. The ranges are disjoint and a slot
// changes hands only through a Release store of a cursor paired with an
// Acquire load on the other side, so a slot is never accessed from two
// threads at once.
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    const fn capacity(&self) -> usize {
        self.mask + 1
    }

    const fn read_space_at(&self, write: usize, read: usize) -> usize {
        write.wrapping_sub(read) & self.mask
    }

    const fn write_space_at(&self, write: usize, read: usize) -> usize {
        read.wrapping_sub(write).wrapping_sub(1) & self.mask
    }

    /// Split the `len` slots starting at `start` into at most two spans.
    const fn spans(&self, start: usize, len: usize) -> ((usize, usize), (usize, usize)) {
        let capacity = self.capacity();
        if start + len > capacity {
            let first = capacity - start;
            ((start, first), (0, len - first))
        } else {
            ((start, len), (0, 0))
        }
    }

    /// # Safety
    /// The caller must own `[start, start + len)` and hold no other
    /// reference into it.
    #[allow(unsafe_code, clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, start: usize, len: usize) -> &mut [T] {
        debug_assert!(start + len <= self.capacity());
        let base = UnsafeCell::raw_get(self.slots.as_ptr().add(start));
        std::slice::from_raw_parts_mut(base, len)
    }

    /// # Safety
    /// No one may write `[start, start + len)` while the slice lives.
    #[allow(unsafe_code)]
    unsafe fn slice(&self, start: usize, len: usize) -> &[T] {
        debug_assert!(start + len <= self.capacity());
        let base = UnsafeCell::raw_get(self.slots.as_ptr().add(start));
        std::slice::from_raw_parts(base, len)
    }
}

/// An unsplit ring. Call [`split`](Self::split) to hand the two ends to the
/// writer and reader threads.
pub struct RingBuffer<T> {
    shared: Shared<T>,
}

impl<T> RingBuffer<T> {
    /// Allocate a ring with at least `capacity` slots (rounded up to a power
    /// of two, minimum 2), filling every slot with `fill()`.
    ///
    /// One slot is reserved, so `capacity() - 1` slots are usable.
    pub fn new(capacity: usize, mut fill: impl FnMut() -> T) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity).map(|_| UnsafeCell::new(fill())).collect();
        Self {
            shared: Shared {
                slots,
                mask: capacity - 1,
                write: AtomicUsize::new(0),
                read: AtomicUsize::new(0),
            },
        }
    }

    pub const fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Move both cursors back to the start.
    ///
    /// Only reachable while the ring is unsplit, i.e. while no other thread
    /// can be operating on it.
    pub fn reset(&mut self) {
        *self.shared.write.get_mut() = 0;
        *self.shared.read.get_mut() = 0;
    }

    /// Split into the writing and the reading end.
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let shared = Arc::new(self.shared);
        (
            Producer {
                shared: Arc::clone(&shared),
            },
            Consumer { shared },
        )
    }
}

impl<T: Default> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, T::default)
    }
}

/// Writing end of a ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Slots that can be written without overtaking the reader.
    pub fn write_space(&self) -> usize {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        self.shared.write_space_at(write, read)
    }

    /// Slots written but not yet consumed.
    pub fn read_space(&self) -> usize {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        self.shared.read_space_at(write, read)
    }

    pub fn is_full(&self) -> bool {
        self.write_space() == 0
    }

    /// The writable region as up to two contiguous spans.
    ///
    /// The second span is non-empty only when the region wraps around the
    /// end of the slot array.
    #[allow(unsafe_code)]
    pub fn write_vector(&mut self) -> (&mut [T], &mut [T]) {
        let write = self.shared.write.load(Ordering::Relaxed);
        let free = self.write_space();
        let ((a, a_len), (b, b_len)) = self.shared.spans(write, free);
        // SAFETY: both spans lie inside the writable region, which belongs
        // to this producer, and they do not overlap each other.
        unsafe {
            (
                self.shared.slice_mut(a, a_len),
                self.shared.slice_mut(b, b_len),
            )
        }
    }

    /// The slot at the write cursor, if there is space.
    #[allow(unsafe_code)]
    pub fn current(&mut self) -> Option<&mut T> {
        if self.write_space() == 0 {
            return None;
        }
        let write = self.shared.write.load(Ordering::Relaxed);
        // SAFETY: the slot at the write cursor is writable and owned by the
        // producer until `advance_write` publishes it.
        unsafe { self.shared.slice_mut(write, 1).first_mut() }
    }

    /// Publish `n` written slots to the consumer.
    ///
    /// # Panics
    /// If `n` exceeds [`write_space`](Self::write_space).
    pub fn advance_write(&mut self, n: usize) {
        assert!(n <= self.write_space(), "advance_write past the reader");
        let write = self.shared.write.load(Ordering::Relaxed);
        self.shared
            .write
            .store((write + n) & self.shared.mask, Ordering::Release);
    }

    /// Write one value, handing it back if the ring is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        match self.current() {
            Some(slot) => {
                *slot = value;
                self.advance_write(1);
                Ok(())
            }
            None => Err(value),
        }
    }
}

/// Reading end of a ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Slots ready to be read.
    pub fn read_space(&self) -> usize {
        let write = self.shared.write.load(Ordering::Acquire);
        let read = self.shared.read.load(Ordering::Relaxed);
        self.shared.read_space_at(write, read)
    }

    /// Slots the producer could still write.
    pub fn write_space(&self) -> usize {
        let write = self.shared.write.load(Ordering::Acquire);
        let read = self.shared.read.load(Ordering::Relaxed);
        self.shared.write_space_at(write, read)
    }

    pub fn is_empty(&self) -> bool {
        self.read_space() == 0
    }

    /// The readable region as up to two contiguous spans.
    #[allow(unsafe_code)]
    pub fn read_vector(&self) -> (&[T], &[T]) {
        let read = self.shared.read.load(Ordering::Relaxed);
        let ready = self.read_space();
        let ((a, a_len), (b, b_len)) = self.shared.spans(read, ready);
        // SAFETY: the readable region was published by the producer and is
        // not written again until `advance_read` hands it back.
        unsafe { (self.shared.slice(a, a_len), self.shared.slice(b, b_len)) }
    }

    /// The oldest unread slot.
    pub fn peek(&self) -> Option<&T> {
        self.read_vector().0.first()
    }

    /// Mutable access to the oldest unread slot.
    #[allow(unsafe_code)]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        if self.read_space() == 0 {
            return None;
        }
        let read = self.shared.read.load(Ordering::Relaxed);
        // SAFETY: the slot is in the readable region, which only this
        // consumer touches until it advances past it.
        unsafe { self.shared.slice_mut(read, 1).first_mut() }
    }

    /// Hand `n` read slots back to the producer.
    ///
    /// # Panics
    /// If `n` exceeds [`read_space`](Self::read_space).
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.read_space(), "advance_read past the writer");
        let read = self.shared.read.load(Ordering::Relaxed);
        self.shared
            .read
            .store((read + n) & self.shared.mask, Ordering::Release);
    }

    /// Drop everything currently readable.
    ///
    /// Safe against a concurrent producer: only the read cursor moves, and
    /// slots published after the snapshot stay readable.
    pub fn discard(&mut self) -> usize {
        let skipped = self.read_space();
        self.advance_read(skipped);
        skipped
    }
}

impl<T: Default> Consumer<T> {
    /// Take the oldest value, leaving a default in its slot.
    pub fn pop(&mut self) -> Option<T> {
        let value = std::mem::take(self.front_mut()?);
        self.advance_read(1);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(RingBuffer::<u8>::with_capacity(0).capacity(), 2);
        assert_eq!(RingBuffer::<u8>::with_capacity(5).capacity(), 8);
        assert_eq!(RingBuffer::<u8>::with_capacity(8).capacity(), 8);
    }

    #[test]
    fn test_one_slot_reserved() {
        let (mut tx, mut rx) = RingBuffer::<u32>::with_capacity(8).split();
        assert_eq!(tx.write_space(), 7);
        assert_eq!(rx.read_space(), 0);

        for i in 0..7 {
            assert!(tx.push(i).is_ok());
        }
        assert_eq!(tx.write_space(), 0);
        assert_eq!(tx.push(99), Err(99));
        assert_eq!(rx.read_space(), 7);

        let drained: Vec<u32> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(drained, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_vectors_wrap() {
        let (mut tx, mut rx) = RingBuffer::<u32>::with_capacity(8).split();
        for i in 0..6 {
            tx.push(i).unwrap();
        }
        rx.advance_read(5);

        // Writer at 6, reader at 5: free slots are 6, 7, 0, 1, 2, 3.
        let (a, b) = tx.write_vector();
        assert_eq!((a.len(), b.len()), (2, 4));
        for (slot, value) in a.iter_mut().chain(b.iter_mut()).zip(10..) {
            *slot = value;
        }
        tx.advance_write(6);

        let (a, b) = rx.read_vector();
        let read: Vec<u32> = a.iter().chain(b).copied().collect();
        assert_eq!(read, vec![5, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_reset_before_split() {
        let mut ring = RingBuffer::<u8>::with_capacity(4);
        ring.shared.write.store(3, Ordering::Relaxed);
        ring.reset();
        let (tx, rx) = ring.split();
        assert_eq!(tx.write_space(), 3);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_discard_keeps_later_writes() {
        let (mut tx, mut rx) = RingBuffer::<u8>::with_capacity(8).split();
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(rx.discard(), 2);
        tx.push(3).unwrap();
        assert_eq!(rx.pop(), Some(3));
    }

    #[test]
    #[should_panic(expected = "advance_write past the reader")]
    fn test_advance_write_overflow_panics() {
        let (mut tx, _rx) = RingBuffer::<u8>::with_capacity(4).split();
        tx.advance_write(4);
    }

    #[test]
    fn test_concurrent_fifo() {
        const COUNT: u64 = 20_000;
        let (mut tx, mut rx) = RingBuffer::<u64>::with_capacity(64).split();

        let writer = thread::spawn(move || {
            let mut next = 0;
            while next < COUNT {
                if tx.push(next).is_ok() {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match rx.pop() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_space_invariant(ops in proptest::collection::vec((any::<bool>(), 0usize..6), 0..200)) {
            let (mut tx, mut rx) = RingBuffer::<u8>::with_capacity(16).split();
            for (write, n) in ops {
                if write {
                    let n = n.min(tx.write_space());
                    tx.advance_write(n);
                } else {
                    let n = n.min(rx.read_space());
                    rx.advance_read(n);
                }
                prop_assert_eq!(tx.write_space() + tx.read_space(), 15);
                prop_assert_eq!(rx.write_space() + rx.read_space(), 15);
            }
        }
    }
}
