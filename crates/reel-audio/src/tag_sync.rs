//! Tag timing: makes a tag visible when its audio becomes audible.
//!
//! The decoder queues `(tag, target_time, sequence)` events into a small
//! ring next to the chunk ring. The player surfaces an event once its own
//! elapsed time reaches `target_time`, but only for its current decode
//! generation: events from an older generation (before a seek or restart)
//! are dropped unread, events from a newer one are held back.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cmp::Ordering;

use reel_core::Tag;
use tracing::{trace, warn};

use crate::buffer::{Consumer, Producer, RingBuffer};
use crate::chunk::sequence_cmp;

/// Default number of event slots (one is reserved).
pub const TAG_EVENT_SLOTS: usize = 32;

/// A tag scheduled for a playback position.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEvent {
    pub tag: Tag,
    /// Song position in seconds at which the tag becomes current.
    pub target_time: f64,
    /// Decode generation that produced the tag.
    pub sequence: u32,
}

/// Create a connected sender/receiver pair with `capacity` slots.
pub fn tag_sync(capacity: usize) -> (TagSender, TagReceiver) {
    let (producer, consumer) = RingBuffer::<Option<TagEvent>>::with_capacity(capacity).split();
    (
        TagSender {
            producer,
            dropped: 0,
        },
        TagReceiver { consumer },
    )
}

/// Decoder side.
pub struct TagSender {
    producer: Producer<Option<TagEvent>>,
    dropped: u64,
}

impl TagSender {
    /// Queue a tag. On overflow the event is dropped: losing metadata is
    /// acceptable, stalling the decoder is not.
    pub fn send(&mut self, tag: Tag, target_time: f64, sequence: u32) -> bool {
        let event = TagEvent {
            tag,
            target_time,
            sequence,
        };
        if self.producer.push(Some(event)).is_ok() {
            return true;
        }
        self.dropped += 1;
        warn!(
            "Tag event queue full, dropping tag at {target_time:.2}s ({} dropped so far)",
            self.dropped
        );
        false
    }

    /// Number of events dropped on overflow.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Player side.
pub struct TagReceiver {
    consumer: Consumer<Option<TagEvent>>,
}

impl TagReceiver {
    /// Return the next tag due at `elapsed` for `generation`, if any.
    pub fn poll(&mut self, elapsed: f64, generation: u32) -> Option<Tag> {
        loop {
            let event = self.consumer.peek()?.as_ref()?;
            match sequence_cmp(event.sequence, generation) {
                Ordering::Less => {
                    trace!(
                        "Discarding stale tag event (generation {} < {generation})",
                        event.sequence
                    );
                    self.consumer.pop();
                }
                Ordering::Greater => return None,
                Ordering::Equal => {
                    if elapsed < event.target_time {
                        return None;
                    }
                    return self.consumer.pop().flatten().map(|e| e.tag);
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.consumer.read_space()
    }

    /// Drop every queued event.
    pub fn clear(&mut self) {
        while self.consumer.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use reel_core::TagKind;

    fn title(name: &str) -> Tag {
        Tag::new().with(TagKind::Title, name)
    }

    #[test]
    fn test_surfaces_when_time_reached() {
        let (mut tx, mut rx) = tag_sync(8);
        assert!(tx.send(title("a"), 2.0, 1));

        assert_eq!(rx.poll(1.5, 1), None);
        assert_eq!(rx.poll(2.0, 1), Some(title("a")));
        assert_eq!(rx.poll(3.0, 1), None);
    }

    #[test]
    fn test_older_generation_discarded() {
        let (mut tx, mut rx) = tag_sync(8);
        tx.send(title("before seek"), 10.0, 4);
        tx.send(title("after seek"), 30.0, 5);

        // The player seeked: it is now on generation 5.
        assert_eq!(rx.poll(30.0, 5), Some(title("after seek")));
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_newer_generation_held() {
        let (mut tx, mut rx) = tag_sync(8);
        tx.send(title("next song"), 0.0, 8);

        assert_eq!(rx.poll(100.0, 7), None);
        assert_eq!(rx.pending(), 1);
        assert_eq!(rx.poll(0.0, 8), Some(title("next song")));
    }

    #[test]
    fn test_overflow_drops() {
        let (mut tx, _rx) = tag_sync(4);
        for i in 0..3 {
            assert!(tx.send(title("x"), f64::from(i), 0));
        }
        assert!(!tx.send(title("x"), 3.0, 0));
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn test_clear() {
        let (mut tx, mut rx) = tag_sync(8);
        tx.send(title("a"), 0.0, 0);
        tx.send(title("b"), 0.0, 0);
        rx.clear();
        assert_eq!(rx.pending(), 0);
        assert_eq!(rx.poll(10.0, 0), None);
    }

    proptest! {
        #[test]
        fn prop_never_surfaces_other_generation(
            events in proptest::collection::vec((0u32..6, 0.0f64..10.0), 0..20),
            polls in proptest::collection::vec((0u32..6, 0.0f64..20.0), 0..40),
        ) {
            let (mut tx, mut rx) = tag_sync(64);
            for (i, (sequence, time)) in events.iter().enumerate() {
                let mut tag = title("t");
                tag.add(TagKind::Track, sequence.to_string());
                tag.add(TagKind::Comment, i.to_string());
                tx.send(tag, *time, *sequence);
            }
            for (generation, elapsed) in polls {
                if let Some(tag) = rx.poll(elapsed, generation) {
                    let sequence = generation.to_string();
                    prop_assert_eq!(tag.get(TagKind::Track), Some(sequence.as_str()));
                }
            }
        }
    }
}
