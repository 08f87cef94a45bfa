//! Playback engine coordinating the decode and player threads.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use reel_core::{Error, Result, Song, Tag};
use tracing::{error, info, warn};

use crate::chunk::chunk_ring;
use crate::config::EngineConfig;
use crate::decoder::DecoderRegistry;
use crate::decoder_control::{DecoderControl, DecoderStatus};
use crate::decoder_thread::DecoderThread;
use crate::output::{OutputDispatcher, OutputRegistry};
use crate::player::{Player, PlayerEvent};
use crate::player_control::{PlayerControl, PlayerState, PlayerStatus};
use crate::tag_sync::{tag_sync, TAG_EVENT_SLOTS};

/// Owns both control objects and both pipeline threads.
///
/// Commands block until the player thread has applied them. Progress is
/// reported through [`status`](Self::status) and the event channel.
pub struct PlaybackEngine {
    dc: Arc<DecoderControl>,
    pc: Arc<PlayerControl>,
    decoders: DecoderRegistry,
    events: Receiver<PlayerEvent>,
    decoder_thread: Option<JoinHandle<()>>,
    player_thread: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Validate `config`, allocate the buffers and start both threads.
    ///
    /// Outputs are instantiated on the player thread; failures to create
    /// them arrive as [`PlayerEvent::OutputFailed`].
    pub fn new(
        config: EngineConfig,
        decoders: DecoderRegistry,
        outputs: OutputRegistry,
    ) -> Result<Self> {
        config.validate()?;

        // One slot of the ring stays empty.
        let (chunk_tx, chunk_rx) = chunk_ring(config.buffer_chunks + 1);
        let (tag_tx, tag_rx) = tag_sync(TAG_EVENT_SLOTS);
        let (event_tx, event_rx) = unbounded();

        let dc = Arc::new(DecoderControl::new());
        let pc = Arc::new(PlayerControl::new(
            config.cross_fade_seconds,
            config.software_volume,
        ));

        let decoder_thread = DecoderThread::new(
            Arc::clone(&dc),
            Arc::clone(&pc),
            decoders.clone(),
            chunk_tx,
            tag_tx,
        )
        .spawn()?;

        let player_dc = Arc::clone(&dc);
        let player_pc = Arc::clone(&pc);
        let spawned = thread::Builder::new()
            .name("reel-player".to_string())
            .spawn(move || {
                // Device handles are not Send, so outputs live on this thread.
                let dispatcher = OutputDispatcher::from_configs(&outputs, &config.outputs);
                Player::new(
                    player_dc, player_pc, chunk_rx, tag_rx, dispatcher, event_tx, &config,
                )
                .run();
            });
        let player_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                dc.quit();
                if decoder_thread.join().is_err() {
                    error!("Decoder thread panicked");
                }
                return Err(Error::Internal(format!("Failed to spawn player thread: {e}")));
            }
        };

        info!("Playback engine started");
        Ok(Self {
            dc,
            pc,
            decoders,
            events: event_rx,
            decoder_thread: Some(decoder_thread),
            player_thread: Some(player_thread),
        })
    }

    /// Append a song to the play queue.
    pub fn enqueue(&self, song: Song) {
        self.pc.enqueue(song);
    }

    pub fn clear_queue(&self) {
        self.pc.clear_queue();
    }

    /// Play the next queued song, or resume when paused.
    pub fn play(&self) -> Result<()> {
        self.pc.play()
    }

    /// Toggle pause.
    pub fn pause(&self) -> Result<()> {
        self.pc.pause()
    }

    pub fn set_pause(&self, pause: bool) -> Result<()> {
        self.pc.set_pause(pause)
    }

    pub fn stop(&self) -> Result<()> {
        self.pc.stop()
    }

    /// Seek the current song to `seconds`.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.pc.seek(seconds)
    }

    /// Set the software volume (0.0 to 1.0).
    pub fn set_volume(&self, volume: f32) {
        self.pc.set_software_volume(volume);
    }

    pub fn set_cross_fade(&self, seconds: f32) {
        self.pc.set_cross_fade(seconds);
    }

    /// Release all outputs; playback pauses.
    pub fn close_audio(&self) -> Result<()> {
        self.pc.close_audio()
    }

    /// Keep the player from moving on to the next queued song.
    pub fn lock_queue(&self) {
        self.pc.lock_queue();
    }

    pub fn unlock_queue(&self) {
        self.pc.unlock_queue();
    }

    pub fn status(&self) -> PlayerStatus {
        self.pc.status()
    }

    pub fn decoder_status(&self) -> DecoderStatus {
        self.dc.snapshot()
    }

    pub fn player_control(&self) -> &PlayerControl {
        &self.pc
    }

    pub const fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events
    }

    /// Try to receive an event without blocking.
    pub fn try_recv_event(&self) -> Option<PlayerEvent> {
        self.events.try_recv().ok()
    }

    /// Receive an event, waiting up to `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<PlayerEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Block until the player is stopped. Returns `false` on timeout.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pc.state() == PlayerState::Stop {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pc.observer().wait_timeout(deadline - now);
        }
    }

    /// Read a local file's tag without playing it.
    pub fn tag_probe(&self, path: &Path) -> Option<Tag> {
        self.decoders.tag_probe(path)
    }

    /// Stop playback, end both threads and tear down the outputs.
    ///
    /// Later calls do nothing; commands issued afterwards fail.
    pub fn shutdown(&mut self) {
        let Some(player) = self.player_thread.take() else {
            return;
        };
        info!("Shutting down playback engine");
        if let Err(e) = self.pc.exit() {
            warn!("Player did not acknowledge exit: {e}");
        }
        if player.join().is_err() {
            error!("Player thread panicked");
        }

        self.dc.quit();
        if let Some(decoder) = self.decoder_thread.take() {
            if decoder.join().is_err() {
                error!("Decoder thread panicked");
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
