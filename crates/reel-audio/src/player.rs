//! The player thread: moves chunks from the ring to the outputs and carries
//! out [`PlayerControl`] commands.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cmp::Ordering;
use std::sync::Arc;

use crossbeam_channel::Sender;
use reel_core::{
    preamp_from_db, AudioFormat, Error, ReplayGainInfo, ReplayGainMode, Result, Song, Tag,
};
use tracing::{debug, error, info, trace, warn};

use crate::chunk::{sequence_cmp, ChunkConsumer};
use crate::config::{EngineConfig, ReplayGainConfig};
use crate::decoder_control::{DecoderControl, DATA_POLL};
use crate::output::OutputDispatcher;
use crate::player_control::{PlayerCommand, PlayerControl, PlayerError, PlayerState, QueueState};
use crate::tag_sync::TagReceiver;

/// Events published by the player thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    /// A song became audible.
    SongStarted(Song),
    /// The last chunk of a song was played.
    SongFinished(Song),
    /// Metadata that became current at the playback position.
    Tag(Tag),
    /// Playback position in seconds, about once per second.
    Elapsed(f64),
    Error {
        song: Option<Song>,
        kind: PlayerError,
        message: String,
    },
    /// One output failed; the others keep playing.
    OutputFailed { name: String, error: String },
}

/// Gain applied to a chunk: replay gain times software volume.
fn chunk_scale(config: &ReplayGainConfig, info: Option<&ReplayGainInfo>, volume: f32) -> f32 {
    let gain = match (config.mode, info) {
        (ReplayGainMode::Off, _) => 1.0,
        (mode, Some(info)) if info.is_defined() => {
            info.scale(mode, preamp_from_db(config.preamp_db))
        }
        _ => preamp_from_db(config.missing_preamp_db),
    };
    gain * volume
}

/// Releases callers blocked on a command once the player thread ends,
/// including by panic.
struct ExitGuard(Arc<PlayerControl>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.set_exited();
    }
}

/// State owned by the player thread.
pub(crate) struct Player {
    dc: Arc<DecoderControl>,
    pc: Arc<PlayerControl>,
    chunks: ChunkConsumer,
    tags: TagReceiver,
    outputs: OutputDispatcher,
    events: Sender<PlayerEvent>,
    replay_gain: ReplayGainConfig,
    /// Chunks to buffer before playback (re)starts.
    prebuffer: usize,
    state: PlayerState,
    /// Decode generation of the audio being played.
    generation: u32,
    song: Option<Song>,
    total_time: Option<f64>,
    /// Song the decoder was started on while the current one plays out.
    next_song: Option<Song>,
    buffering: bool,
    output_format: Option<AudioFormat>,
    elapsed_second: Option<u64>,
}

impl Player {
    pub(crate) fn new(
        dc: Arc<DecoderControl>,
        pc: Arc<PlayerControl>,
        chunks: ChunkConsumer,
        tags: TagReceiver,
        outputs: OutputDispatcher,
        events: Sender<PlayerEvent>,
        config: &EngineConfig,
    ) -> Self {
        // Never wait for more than the ring can hold.
        let prebuffer = config
            .prebuffer_chunks()
            .min(chunks.capacity().saturating_sub(1));
        Self {
            dc,
            pc,
            chunks,
            tags,
            outputs,
            events,
            replay_gain: config.replay_gain.clone(),
            prebuffer,
            state: PlayerState::Stop,
            generation: 0,
            song: None,
            total_time: None,
            next_song: None,
            buffering: false,
            output_format: None,
            elapsed_second: None,
        }
    }

    pub(crate) fn run(mut self) {
        info!("Player thread started");
        let _exited = ExitGuard(Arc::clone(&self.pc));
        self.report_output_failures();
        loop {
            let command = if self.state == PlayerState::Play {
                self.pc.poll_command()
            } else {
                self.pc.wait_command()
            };
            if command != PlayerCommand::None {
                if !self.handle_command(command) {
                    break;
                }
                continue;
            }
            self.play_step();
        }
        info!("Player thread stopped");
    }

    /// Apply `command` and acknowledge it. Returns `false` on exit.
    fn handle_command(&mut self, command: PlayerCommand) -> bool {
        let result = match command {
            PlayerCommand::None => return true,
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => {
                match self.state {
                    PlayerState::Play => self.set_state(PlayerState::Pause),
                    PlayerState::Pause => self.set_state(PlayerState::Play),
                    PlayerState::Stop => {}
                }
                Ok(())
            }
            PlayerCommand::Stop => {
                self.stop_playback(true);
                Ok(())
            }
            PlayerCommand::Seek => self.seek(self.pc.seek_target()),
            PlayerCommand::CloseAudio => {
                self.outputs.close_all();
                self.output_format = None;
                if self.state == PlayerState::Play {
                    self.set_state(PlayerState::Pause);
                }
                Ok(())
            }
            PlayerCommand::Exit => {
                self.stop_playback(true);
                self.outputs.finish_all();
                self.pc.finish_command(Ok(()));
                return false;
            }
        };
        if let Err(e) = &result {
            debug!("Player command {command:?} failed: {e}");
        }
        self.pc.finish_command(result);
        true
    }

    fn play(&mut self) -> Result<()> {
        match self.state {
            PlayerState::Play => Ok(()),
            PlayerState::Pause => {
                self.set_state(PlayerState::Play);
                Ok(())
            }
            PlayerState::Stop => {
                let Some(song) = self.pc.take_next_song(true) else {
                    self.report_error(&Error::EmptyQueue, None);
                    return Err(Error::EmptyQueue);
                };
                self.pc.clear_error();
                if let Err(e) = self.start_song(song.clone()) {
                    self.report_error(&e, Some(song.clone()));
                    // The song was never heard; it plays once an output works.
                    if e.is_sink_error() {
                        self.pc.requeue_front(song);
                    }
                    return Err(e);
                }
                self.set_state(PlayerState::Play);
                Ok(())
            }
        }
    }

    /// Start the decoder on `song` and open the outputs for its format.
    fn start_song(&mut self, song: Song) -> Result<()> {
        self.dc.start(song.clone());
        let format = match self.dc.wait_started() {
            Ok(format) => format,
            Err(e) => {
                self.dc.take_error();
                return Err(e);
            }
        };

        let opened = self.outputs.open_all(format);
        self.report_output_failures();
        if let Err(e) = opened {
            self.dc.stop();
            return Err(e);
        }

        self.output_format = Some(format);
        self.generation = self.dc.generation();
        self.buffering = true;
        self.pc.set_queue_state(QueueState::Decode);
        self.begin_song(song);
        Ok(())
    }

    fn begin_song(&mut self, song: Song) {
        info!("Playing {song}");
        self.total_time = self.dc.total_time().or(song.duration);
        self.pc.set_song(Some(song.clone()), self.total_time);
        self.elapsed_second = None;
        self.song = Some(song.clone());
        self.emit(PlayerEvent::SongStarted(song));
    }

    fn finish_song(&mut self) {
        if let Some(song) = self.song.take() {
            debug!("Finished {song}");
            self.emit(PlayerEvent::SongFinished(song));
        }
    }

    /// Stop and close the outputs. With `discard` the outputs drop what
    /// they buffered, otherwise it plays out first.
    fn stop_playback(&mut self, discard: bool) {
        self.dc.stop();
        let dropped = self.chunks.discard();
        if dropped > 0 {
            trace!("Discarded {dropped} buffered chunks");
        }
        self.tags.clear();
        if discard {
            self.outputs.cancel_all();
        }
        self.outputs.close_all();
        self.output_format = None;

        // A song the decoder started early was never heard.
        if let Some(next) = self.next_song.take() {
            self.pc.requeue_front(next);
        }
        self.song = None;
        self.total_time = None;
        self.buffering = false;
        self.pc.set_song(None, None);
        self.pc.set_queue_state(QueueState::Blank);
        self.set_state(PlayerState::Stop);
    }

    fn seek(&mut self, target: f64) -> Result<()> {
        let Some(song) = self.song.clone() else {
            return Err(Error::Seek("nothing is playing".to_string()));
        };
        let target = match self.total_time {
            Some(total) => target.clamp(0.0, total),
            None => target.max(0.0),
        };

        if let Some(next) = self.next_song.take() {
            // The decoder already moved on; bring the current song back.
            debug!("Restarting {song} to seek");
            self.dc.stop();
            self.pc.requeue_front(next);
            self.dc.start(song.clone());
            if let Err(e) = self.dc.wait_started() {
                self.dc.take_error();
                return Err(e);
            }
        }

        self.dc.seek(target)?;

        // Older chunks and tags are dropped by their generation.
        self.generation = self.dc.generation();
        self.outputs.cancel_all();
        self.buffering = true;
        self.elapsed_second = None;
        self.pc.set_queue_state(QueueState::Decode);
        self.pc.set_elapsed(target);
        debug!("Seeked {song} to {target:.2}s");
        Ok(())
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state == state {
            return;
        }
        debug!("Player state {:?} -> {state:?}", self.state);
        self.state = state;
        self.pc.set_state(state);
        self.emit(PlayerEvent::StateChanged(state));
    }

    /// One iteration of the playback loop.
    fn play_step(&mut self) {
        self.discard_stale();

        if self.buffering {
            if self.chunks.read_space() < self.prebuffer && !self.dc.is_idle() {
                self.pc.wait_for_data(DATA_POLL);
                return;
            }
            debug!("Prebuffered {} chunks", self.chunks.read_space());
            self.buffering = false;
            self.pc.set_queue_state(QueueState::Full);
        }

        self.prefetch_next_song();

        let Some(sequence) = self.chunks.peek().map(|chunk| chunk.sequence) else {
            self.handle_empty_ring();
            return;
        };
        if sequence_cmp(sequence, self.generation) == Ordering::Greater {
            self.song_boundary(sequence);
        }
        self.play_chunk();
    }

    /// Drop chunks from generations before the current one.
    fn discard_stale(&mut self) {
        while let Some(chunk) = self.chunks.peek() {
            if sequence_cmp(chunk.sequence, self.generation) != Ordering::Less {
                break;
            }
            self.chunks.advance_read(1);
            self.dc.signal_async();
        }
    }

    /// Start decoding the next queued song while the current one plays
    /// out, so the two join without a gap.
    fn prefetch_next_song(&mut self) {
        if self.next_song.is_some() || !self.dc.is_idle() || self.dc.has_error() {
            return;
        }
        let Some(next) = self.pc.take_next_song(false) else {
            return;
        };
        debug!("Decoder finished, starting {next} ahead");
        self.dc.start(next.clone());
        self.next_song = Some(next);
    }

    /// A chunk of a newer generation arrived: the next song begins.
    fn song_boundary(&mut self, sequence: u32) {
        self.finish_song();
        self.generation = sequence;
        if let Some(song) = self.next_song.take().or_else(|| self.dc.song()) {
            self.begin_song(song);
        }
    }

    fn handle_empty_ring(&mut self) {
        if !self.dc.is_idle() {
            if self.pc.queue_state() != QueueState::Empty {
                debug!("Buffer underrun");
                self.pc.set_queue_state(QueueState::Empty);
            }
            self.pc.wait_for_data(DATA_POLL);
            return;
        }
        // The decoder may have committed its last chunk after our check.
        if !self.chunks.is_empty() {
            return;
        }

        let error = self.dc.take_error();
        if let Some(next) = self.next_song.take() {
            // The song started ahead ended without producing audio.
            self.finish_song();
            match error {
                Some(e) => self.report_error(&e, Some(next)),
                None => {
                    self.begin_song(next);
                    self.finish_song();
                }
            }
        } else {
            if let Some(e) = error {
                self.report_error(&e, self.song.clone());
            }
            self.finish_song();
        }

        let Some(song) = self.pc.take_next_song(false) else {
            info!("Reached the end of the queue");
            self.stop_playback(false);
            return;
        };
        if let Err(e) = self.start_song(song.clone()) {
            self.report_error(&e, Some(song.clone()));
            if e.is_sink_error() {
                self.pc.requeue_front(song);
                self.set_state(PlayerState::Pause);
            }
        }
    }

    fn play_chunk(&mut self) {
        let Some(chunk) = self.chunks.front_mut() else {
            return;
        };
        let Some(format) = chunk.format else {
            warn!("Skipping chunk without audio format");
            self.chunks.advance_read(1);
            return;
        };

        let mut result = Ok(0);
        if self.output_format != Some(format) {
            match self.outputs.open_all(format) {
                Ok(()) => self.output_format = Some(format),
                Err(e) => result = Err(e),
            }
        }
        if result.is_ok() {
            let scale = chunk_scale(
                &self.replay_gain,
                chunk.replay_gain.as_deref(),
                self.pc.software_volume(),
            );
            result = self.outputs.play(chunk.data(), format, scale);
        }
        let tag = if result.is_ok() { chunk.tag.take() } else { None };
        let (time, duration, bit_rate) = (chunk.time, chunk.duration(), chunk.bit_rate);

        self.report_output_failures();
        if let Err(e) = result {
            error!("No output accepted audio: {e}");
            self.output_format = None;
            self.report_error(&e, self.song.clone());
            self.set_state(PlayerState::Pause);
            return;
        }

        self.chunks.advance_read(1);
        self.dc.signal_async();

        if let Some(tag) = tag {
            self.emit(PlayerEvent::Tag(*tag));
        }
        let elapsed = time + duration;
        self.pc.update_progress(elapsed, duration, bit_rate, Some(format));
        while let Some(tag) = self.tags.poll(elapsed, self.generation) {
            self.emit(PlayerEvent::Tag(tag));
        }
        if self.pc.queue_state() == QueueState::Empty {
            self.pc.set_queue_state(QueueState::Full);
        }

        let second = elapsed as u64;
        if self.elapsed_second != Some(second) {
            self.elapsed_second = Some(second);
            self.emit(PlayerEvent::Elapsed(elapsed));
        }
    }

    fn report_output_failures(&mut self) {
        for (name, error) in self.outputs.take_failures() {
            warn!("Output {name:?} failed: {error}");
            self.emit(PlayerEvent::OutputFailed {
                name,
                error: error.to_string(),
            });
        }
    }

    fn report_error(&self, error: &Error, song: Option<Song>) {
        match &song {
            Some(song) => error!("Playback error on {song}: {error}"),
            None => error!("Playback error: {error}"),
        }
        self.pc.set_error(error.duplicate(), song.clone());
        self.emit(PlayerEvent::Error {
            song,
            kind: PlayerError::classify(error),
            message: error.to_string(),
        });
    }

    fn emit(&self, event: PlayerEvent) {
        let wake = !matches!(event, PlayerEvent::Elapsed(_));
        if self.events.send(event).is_err() {
            trace!("No event listener");
        }
        if wake {
            self.pc.observer().wake();
        }
    }
}
