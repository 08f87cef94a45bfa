//! The handle decoder plugins call back into.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::io;
use std::sync::Arc;

use reel_core::{AudioFormat, Error, ReplayGainInfo, Result, Tag};
use tracing::{debug, trace};

use crate::chunk::ChunkProducer;
use crate::decoder_control::{DecoderCommand, DecoderControl};
use crate::input::InputStream;
use crate::player_control::PlayerControl;
use crate::tag_sync::TagSender;

/// Connects a running decoder plugin to the chunk ring, the tag queue and
/// the decoder control object.
///
/// Decoded audio is packed into chunks in place. A chunk is committed to
/// the player once it is full, when the format or replay gain changes, or
/// when the song ends.
pub struct DecoderClient<'a> {
    dc: &'a DecoderControl,
    pc: &'a PlayerControl,
    chunks: &'a mut ChunkProducer,
    tags: &'a mut TagSender,
    format: Option<AudioFormat>,
    sequence: u32,
    /// Song position of the next emitted frame.
    time: f64,
    replay_gain: Option<Arc<ReplayGainInfo>>,
    chunk_tag: Option<Tag>,
    /// The current ring slot holds uncommitted audio.
    partial: bool,
}

impl<'a> DecoderClient<'a> {
    pub(crate) fn new(
        dc: &'a DecoderControl,
        pc: &'a PlayerControl,
        chunks: &'a mut ChunkProducer,
        tags: &'a mut TagSender,
    ) -> Self {
        Self {
            sequence: dc.generation(),
            dc,
            pc,
            chunks,
            tags,
            format: None,
            time: 0.0,
            replay_gain: None,
            chunk_tag: None,
            partial: false,
        }
    }

    /// Whether [`report_ready`](Self::report_ready) was called.
    pub const fn is_ready(&self) -> bool {
        self.format.is_some()
    }

    /// Song position of the next emitted frame, in seconds.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// The song's audio format is known. Must precede any
    /// [`emit_chunk`](Self::emit_chunk).
    pub fn report_ready(&mut self, format: AudioFormat, seekable: bool, total_time: Option<f64>) {
        if self.format.is_some_and(|f| f != format) {
            debug!("Decoder format changed to {format}");
            self.flush();
        }
        self.format = Some(format);
        self.dc.set_ready(format, seekable, total_time);
    }

    /// The command the plugin should act on.
    ///
    /// A seek requested before the plugin is ready stays hidden until then,
    /// so the plugin performs it as its first action after
    /// [`report_ready`](Self::report_ready).
    pub fn poll_command(&self) -> DecoderCommand {
        let command = self.dc.pending_command();
        if command == DecoderCommand::Seek && !self.is_ready() {
            DecoderCommand::None
        } else {
            command
        }
    }

    /// Target of the pending seek, in seconds.
    pub fn seek_target(&self) -> f64 {
        self.dc.seek_target()
    }

    /// Acknowledge the pending command.
    ///
    /// After a seek, audio not yet committed belongs to the old position and
    /// is dropped; decoding continues at the seek target in a new generation.
    pub fn command_finished(&mut self) {
        if self.dc.pending_command() == DecoderCommand::Seek {
            self.partial = false;
            self.time = self.dc.seek_target();
        }
        self.sequence = self.dc.command_finished();
    }

    /// Acknowledge the pending seek as failed.
    pub fn report_seek_error(&mut self) {
        self.dc.seek_failed();
    }

    /// Read from `input`. Returns 0 at end of stream and when a stop or seek
    /// is pending.
    pub fn read(&mut self, input: &mut dyn InputStream, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.poll_command() != DecoderCommand::None {
                return Ok(0);
            }
            match input.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Source(format!("Read failed: {e}"))),
            }
        }
    }

    /// Queue decoded PCM in the format given to
    /// [`report_ready`](Self::report_ready). Blocks while the ring is full.
    ///
    /// Returns early with the pending command when one arrives; the rest of
    /// `data` is dropped in that case.
    pub fn emit_chunk(&mut self, data: &[u8], bit_rate: u16) -> DecoderCommand {
        assert!(self.format.is_some(), "emit_chunk called before report_ready");
        let Some(format) = self.format else {
            return DecoderCommand::Stop;
        };
        let frame_size = format.frame_size();
        let mut data = data;

        while !data.is_empty() {
            let command = self.poll_command();
            if command != DecoderCommand::None {
                return command;
            }

            if self.chunks.write_space() == 0 {
                let chunks = &*self.chunks;
                self.dc.wait_for_space(|| chunks.write_space() == 0);
                continue;
            }
            let Some(chunk) = self.chunks.current() else {
                continue;
            };

            if !self.partial {
                chunk.clear();
                chunk.sequence = self.sequence;
                chunk.time = self.time;
                chunk.format = Some(format);
                chunk.bit_rate = bit_rate;
                chunk.replay_gain.clone_from(&self.replay_gain);
                chunk.tag = self.chunk_tag.take().map(Box::new);
                self.partial = true;
            }

            let copied = chunk.append(data, frame_size);
            let full = chunk.is_full(frame_size);
            self.time += format.duration_of(copied);
            data = &data[copied..];

            if full {
                self.commit();
            } else if copied == 0 {
                trace!("Dropping {} trailing bytes (less than a frame)", data.len());
                break;
            }
        }
        self.poll_command()
    }

    /// Schedule `tag` to become current when the audio emitted next is
    /// played.
    pub fn submit_tag(&mut self, tag: Tag) -> DecoderCommand {
        self.tags.send(tag, self.time, self.sequence);
        self.poll_command()
    }

    /// Attach `tag` to the next chunk started.
    pub fn attach_tag(&mut self, tag: Tag) {
        self.chunk_tag = Some(tag);
    }

    /// Replay gain for the audio emitted from now on.
    pub fn set_replay_gain(&mut self, info: Option<ReplayGainInfo>) {
        self.flush();
        self.replay_gain = info.map(Arc::new);
    }

    /// Commit the partially filled chunk, if any.
    pub fn flush(&mut self) {
        if !self.partial {
            return;
        }
        if self.chunks.current().is_some_and(|chunk| !chunk.is_empty()) {
            self.commit();
        } else {
            self.partial = false;
        }
    }

    fn commit(&mut self) {
        self.chunks.advance_write(1);
        self.partial = false;
        self.pc.signal_async();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_ring, CHUNK_SIZE};
    use crate::tag_sync::tag_sync;
    use reel_core::{SampleFormat, Song, TagKind};

    struct Fixture {
        dc: DecoderControl,
        pc: PlayerControl,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dc: DecoderControl::new(),
                pc: PlayerControl::default(),
            }
        }
    }

    fn s16_stereo() -> AudioFormat {
        AudioFormat::new(44_100, SampleFormat::S16, 2).unwrap()
    }

    #[test]
    fn test_emit_packs_chunks() {
        let fx = Fixture::new();
        let (mut tx, mut rx) = chunk_ring(8);
        let (mut tags, _tag_rx) = tag_sync(8);
        let mut client = DecoderClient::new(&fx.dc, &fx.pc, &mut tx, &mut tags);
        client.report_ready(s16_stereo(), true, Some(10.0));

        let data = vec![7u8; CHUNK_SIZE + 400];
        assert_eq!(client.emit_chunk(&data, 128), DecoderCommand::None);
        client.flush();
        drop(client);

        assert_eq!(rx.read_space(), 2);
        let first = rx.front_mut().unwrap();
        assert_eq!(first.len(), CHUNK_SIZE);
        assert_eq!(first.bit_rate, 128);
        assert!(first.time.abs() < f64::EPSILON);
        rx.advance_read(1);
        let second = rx.front_mut().unwrap();
        assert_eq!(second.len(), 400);
        assert!((second.time - CHUNK_SIZE as f64 / 176_400.0).abs() < 1e-9);
    }

    #[test]
    fn test_tags_and_replay_gain_travel_with_chunks() {
        let fx = Fixture::new();
        let (mut tx, mut rx) = chunk_ring(8);
        let (mut tags, mut tag_rx) = tag_sync(8);
        let mut client = DecoderClient::new(&fx.dc, &fx.pc, &mut tx, &mut tags);
        client.report_ready(s16_stereo(), false, None);

        client.attach_tag(Tag::new().with(TagKind::Name, "stream"));
        client.set_replay_gain(Some(ReplayGainInfo::default()));
        client.emit_chunk(&[0; 400], 0);
        client.submit_tag(Tag::new().with(TagKind::Title, "later"));
        client.flush();
        drop(client);

        let chunk = rx.front_mut().unwrap();
        assert_eq!(chunk.tag.as_ref().unwrap().get(TagKind::Name), Some("stream"));
        assert!(chunk.replay_gain.is_some());
        assert_eq!(tag_rx.pending(), 1);
        assert_eq!(tag_rx.poll(0.0, 0), None);
        let due = 400.0 / 176_400.0;
        assert!(tag_rx.poll(due, 0).is_some());
    }

    #[test]
    fn test_pending_stop_interrupts_read_and_emit() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let fx = Arc::new(Fixture::new());
        let (mut tx, _rx) = chunk_ring(2);
        let (mut tags, _tag_rx) = tag_sync(8);

        let decoder = {
            let fx = Arc::clone(&fx);
            thread::spawn(move || {
                assert_eq!(fx.dc.next_command(), Some(DecoderCommand::Start));
                fx.dc.begin_song().unwrap();
                let mut client = DecoderClient::new(&fx.dc, &fx.pc, &mut tx, &mut tags);
                client.report_ready(AudioFormat::cd(), true, None);
                // The single usable slot fills up, then emit blocks until
                // the stop arrives.
                let command = client.emit_chunk(&vec![0; CHUNK_SIZE * 4], 0);
                assert_eq!(command, DecoderCommand::Stop);

                let mut input = crate::input::MemoryInput::new(vec![1u8; 16]);
                let mut buf = [0u8; 16];
                assert_eq!(client.read(&mut input, &mut buf).unwrap(), 0);
                drop(client);
                fx.dc.finish_song(Ok(()));
            })
        };

        fx.dc.start(Song::new("a.pcm"));
        fx.dc.wait_started().unwrap();
        thread::sleep(Duration::from_millis(20));
        fx.dc.stop();
        decoder.join().unwrap();
    }

    #[test]
    fn test_seek_drops_partial_chunk() {
        use std::sync::Arc;
        use std::thread;

        let fx = Arc::new(Fixture::new());
        let (tx, mut rx) = chunk_ring(8);
        let (tags, _tag_rx) = tag_sync(8);

        let decoder = {
            let fx = Arc::clone(&fx);
            thread::spawn(move || {
                let (mut tx, mut tags) = (tx, tags);
                assert_eq!(fx.dc.next_command(), Some(DecoderCommand::Start));
                fx.dc.begin_song().unwrap();
                let mut client = DecoderClient::new(&fx.dc, &fx.pc, &mut tx, &mut tags);
                client.report_ready(AudioFormat::cd(), true, Some(60.0));
                client.emit_chunk(&[1; 400], 0);

                while client.poll_command() != DecoderCommand::Seek {
                    thread::yield_now();
                }
                client.command_finished();
                assert!((client.time() - 30.0).abs() < f64::EPSILON);
                client.emit_chunk(&[2; 400], 0);
                client.flush();
                drop(client);
                fx.dc.finish_song(Ok(()));
            })
        };

        fx.dc.start(Song::new("a.pcm"));
        let generation = fx.dc.generation();
        fx.dc.wait_started().unwrap();
        fx.dc.seek(30.0).unwrap();
        decoder.join().unwrap();

        assert_eq!(rx.read_space(), 1);
        let chunk = rx.front_mut().unwrap();
        assert_eq!(chunk.data()[0], 2);
        assert_eq!(chunk.sequence, generation.wrapping_add(1));
        assert!((chunk.time - 30.0).abs() < f64::EPSILON);
    }
}
