//! The decode thread: runs decoder plugins on behalf of [`DecoderControl`].

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use reel_core::{Error, Result, Song};
use tracing::{debug, info};

use crate::chunk::ChunkProducer;
use crate::decoder::{DecoderClient, DecoderRegistry};
use crate::decoder_control::{DecoderCommand, DecoderControl};
use crate::input::open_input;
use crate::player_control::PlayerControl;
use crate::tag_sync::TagSender;

/// State owned by the decode thread.
pub(crate) struct DecoderThread {
    dc: Arc<DecoderControl>,
    pc: Arc<PlayerControl>,
    registry: DecoderRegistry,
    chunks: ChunkProducer,
    tags: TagSender,
}

impl DecoderThread {
    pub(crate) fn new(
        dc: Arc<DecoderControl>,
        pc: Arc<PlayerControl>,
        registry: DecoderRegistry,
        chunks: ChunkProducer,
        tags: TagSender,
    ) -> Self {
        Self {
            dc,
            pc,
            registry,
            chunks,
            tags,
        }
    }

    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("reel-decoder".to_string())
            .spawn(move || self.run())
            .map_err(|e| Error::Internal(format!("Failed to spawn decoder thread: {e}")))
    }

    fn run(mut self) {
        info!("Decoder thread started");
        while let Some(command) = self.dc.next_command() {
            match command {
                // A seek on a stopped decoder restarts the last song.
                DecoderCommand::Start | DecoderCommand::Seek => self.run_song(),
                DecoderCommand::Stop => {
                    self.dc.command_finished();
                }
                DecoderCommand::None => {}
            }
        }
        info!("Decoder thread stopped");
    }

    fn run_song(&mut self) {
        let Some(song) = self.dc.begin_song() else {
            return;
        };

        let result = {
            let mut client =
                DecoderClient::new(&self.dc, &self.pc, &mut self.chunks, &mut self.tags);
            let mut result = decode_song(&self.registry, &mut client, &song);

            let command = self.dc.pending_command();
            if result.is_ok() && !client.is_ready() && command == DecoderCommand::None {
                result = Err(Error::Decode(format!("{song}: no audio found")));
            }
            // Audio of a stopped or replaced song is never played.
            if !matches!(command, DecoderCommand::Start | DecoderCommand::Stop) {
                client.flush();
            }
            result
        };

        debug!("Decoder finished {song}: {result:?}");
        self.dc.finish_song(result);
        self.pc.signal_async();
    }
}

/// Pick a plugin for `song` and run it to the end.
fn decode_song(
    registry: &DecoderRegistry,
    client: &mut DecoderClient<'_>,
    song: &Song,
) -> Result<()> {
    if let Some(path) = song.local_path() {
        let plugin = registry
            .for_song(song, None)
            .ok_or_else(|| Error::NoDecoder(song.to_string()))?;
        debug!("Decoding {song} with {}", plugin.name());
        return plugin.file_decode(client, &path);
    }

    let mut input = open_input(song)?;
    let plugin = registry
        .for_song(song, input.mime())
        .ok_or_else(|| Error::NoDecoder(song.to_string()))?;
    debug!("Streaming {song} with {}", plugin.name());
    if let Some(tag) = input.tag() {
        client.attach_tag(tag);
    }
    plugin.stream_decode(client, &mut *input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_ring, ChunkConsumer, CHUNK_SIZE};
    use crate::decoder_control::DecoderState;
    use crate::tag_sync::tag_sync;
    use reel_core::AudioFormat;
    use std::time::{Duration, Instant};

    struct Harness {
        dc: Arc<DecoderControl>,
        rx: ChunkConsumer,
        worker: JoinHandle<()>,
    }

    impl Harness {
        fn new() -> Self {
            let dc = Arc::new(DecoderControl::new());
            let pc = Arc::new(PlayerControl::default());
            let (tx, rx) = chunk_ring(16);
            let (tags, _tag_rx) = tag_sync(8);
            let worker = DecoderThread::new(
                Arc::clone(&dc),
                pc,
                DecoderRegistry::with_builtins(),
                tx,
                tags,
            )
            .spawn()
            .unwrap();
            Self { dc, rx, worker }
        }

        fn wait_idle(&self) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !self.dc.is_idle() {
                assert!(Instant::now() < deadline, "decoder did not finish");
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn shutdown(self) {
            self.dc.quit();
            self.worker.join().unwrap();
        }
    }

    #[test]
    fn test_decodes_pcm_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.pcm");
        std::fs::write(&path, vec![3u8; CHUNK_SIZE * 3 + 400]).unwrap();

        let mut h = Harness::new();
        h.dc.start(Song::from_path(&path));
        assert_eq!(h.dc.wait_started().unwrap(), AudioFormat::cd());
        h.wait_idle();
        assert!(!h.dc.has_error());

        let mut total = 0;
        while let Some(chunk) = h.rx.front_mut() {
            assert_eq!(chunk.sequence, h.dc.generation());
            total += chunk.len();
            h.rx.advance_read(1);
        }
        assert_eq!(total, CHUNK_SIZE * 3 + 400);
        h.shutdown();
    }

    #[test]
    fn test_missing_file_sets_error() {
        let h = Harness::new();
        h.dc.start(Song::new("/nonexistent/song.pcm"));
        assert!(matches!(h.dc.wait_started(), Err(Error::Source(_))));
        assert_eq!(h.dc.state(), DecoderState::Stop);
        h.shutdown();
    }

    #[test]
    fn test_unknown_suffix_has_no_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let h = Harness::new();
        h.dc.start(Song::from_path(&path));
        assert!(matches!(h.dc.wait_started(), Err(Error::NoDecoder(_))));
        h.shutdown();
    }

    #[test]
    fn test_stop_abandons_song() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.pcm");
        // Far more than the ring holds, so the decoder blocks on a full ring.
        std::fs::write(&path, vec![0u8; CHUNK_SIZE * 64]).unwrap();

        let h = Harness::new();
        h.dc.start(Song::from_path(&path));
        h.dc.wait_started().unwrap();
        h.dc.stop();
        assert!(h.dc.is_idle());
        assert!(!h.dc.has_error());
        h.shutdown();
    }
}
