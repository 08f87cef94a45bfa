//! Decoder-side control object.
//!
//! The player thread issues commands (start, stop, seek) and blocks until
//! the decoder thread acknowledges them; the decoder thread publishes its
//! state, the negotiated audio format and errors. All fields live behind
//! one [`Notify`] so related fields change together.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::time::Duration;

use reel_core::{AudioFormat, Error, Result, Song};
use tracing::{debug, error};

use crate::sync::{Notify, NotifyGuard};

/// How long the decoder sleeps on a full chunk ring before re-checking.
/// Covers wake-ups dropped by [`Notify::signal_async`].
pub(crate) const DATA_POLL: Duration = Duration::from_millis(50);

/// Decoder thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// Idle, or finished with the last song.
    #[default]
    Stop,
    /// Opening a song; the audio format is not known yet.
    Start,
    /// Producing chunks.
    Decode,
}

/// Command pending for the decoder thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderCommand {
    #[default]
    None,
    Start,
    Stop,
    Seek,
}

#[derive(Debug, Default)]
struct DecoderShared {
    state: DecoderState,
    command: DecoderCommand,
    quit: bool,
    error: Option<Error>,
    song: Option<Song>,
    seek_where: f64,
    seek_error: bool,
    format: Option<AudioFormat>,
    seekable: bool,
    total_time: Option<f64>,
    generation: u32,
}

/// Snapshot of the decoder control fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderStatus {
    pub state: DecoderState,
    pub command: DecoderCommand,
    pub song: Option<Song>,
    pub format: Option<AudioFormat>,
    pub seekable: bool,
    pub total_time: Option<f64>,
    pub generation: u32,
    pub error: Option<String>,
}

/// Shared between the player thread (issuer) and the decoder thread.
#[derive(Debug, Default)]
pub struct DecoderControl {
    notify: Notify<DecoderShared>,
}

impl DecoderControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `command` and block until the decoder thread has finished it.
    fn command_locked(shared: &mut NotifyGuard<'_, DecoderShared>, command: DecoderCommand) {
        assert_eq!(
            shared.command,
            DecoderCommand::None,
            "decoder command issued while another is pending"
        );
        shared.command = command;
        shared.signal();
        while shared.command != DecoderCommand::None && !shared.quit {
            shared.wait();
        }
    }

    // ---- Issuer side --------------------------------------------------

    /// Start decoding `song`. Returns once the decoder thread accepted it;
    /// use [`wait_started`](Self::wait_started) to learn the outcome.
    pub fn start(&self, song: Song) {
        let mut shared = self.notify.enter();
        debug!("Decoder start: {song}");
        shared.song = Some(song);
        shared.error = None;
        Self::command_locked(&mut shared, DecoderCommand::Start);
    }

    /// Stop decoding, discarding the rest of the song.
    pub fn stop(&self) {
        let mut shared = self.notify.enter();
        if shared.state != DecoderState::Stop {
            debug!("Decoder stop");
            Self::command_locked(&mut shared, DecoderCommand::Stop);
        }
    }

    /// Seek the current song to `seconds`.
    ///
    /// If the decoder already finished the song it is restarted and then
    /// positioned. Failure is reported through the return value once the
    /// decoder thread has handled the command.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let mut shared = self.notify.enter();
        match shared.state {
            DecoderState::Start => {
                return Err(Error::Seek("decoder is still starting".to_string()));
            }
            DecoderState::Stop if shared.song.is_none() => {
                return Err(Error::Seek("no song to seek in".to_string()));
            }
            _ => {}
        }
        if !shared.seekable {
            return Err(Error::Seek("song is not seekable".to_string()));
        }

        debug!("Decoder seek to {seconds:.2}s");
        shared.seek_where = seconds.max(0.0);
        shared.seek_error = false;
        Self::command_locked(&mut shared, DecoderCommand::Seek);

        if shared.seek_error {
            Err(Error::Seek(format!("decoder failed to seek to {seconds:.2}s")))
        } else {
            Ok(())
        }
    }

    /// Block until the decoder left [`DecoderState::Start`], returning the
    /// negotiated format or the error that stopped it.
    pub fn wait_started(&self) -> Result<AudioFormat> {
        let mut shared = self.notify.enter();
        while shared.state == DecoderState::Start && !shared.quit {
            shared.wait();
        }
        match shared.format {
            Some(format) => Ok(format),
            None => Err(shared.error.as_ref().map_or_else(
                || Error::Decode("decoder stopped before producing audio".to_string()),
                Error::duplicate,
            )),
        }
    }

    /// Ask the decoder thread to exit.
    pub fn quit(&self) {
        let mut shared = self.notify.enter();
        shared.quit = true;
        shared.signal();
    }

    // ---- Decoder side -------------------------------------------------

    /// Block until a command is pending. Returns `None` on quit.
    pub fn next_command(&self) -> Option<DecoderCommand> {
        let mut shared = self.notify.enter();
        while shared.command == DecoderCommand::None && !shared.quit {
            shared.wait();
        }
        (!shared.quit).then_some(shared.command)
    }

    /// Pending command without blocking; quitting reads as [`DecoderCommand::Stop`].
    pub fn pending_command(&self) -> DecoderCommand {
        let shared = self.notify.enter();
        if shared.quit {
            DecoderCommand::Stop
        } else {
            shared.command
        }
    }

    /// Enter [`DecoderState::Start`] for the pending `Start` or `Seek`.
    ///
    /// A `Start` is acknowledged right away. A `Seek` on a stopped decoder
    /// stays pending so the plugin performs it as soon as it is ready.
    pub fn begin_song(&self) -> Option<Song> {
        let mut shared = self.notify.enter();
        shared.error = None;
        shared.format = None;
        shared.seekable = false;
        shared.total_time = None;

        let Some(song) = shared.song.clone() else {
            if shared.command == DecoderCommand::Seek {
                shared.seek_error = true;
            }
            shared.command = DecoderCommand::None;
            shared.signal();
            return None;
        };

        shared.state = DecoderState::Start;
        if shared.command == DecoderCommand::Start {
            shared.command = DecoderCommand::None;
            shared.generation = shared.generation.wrapping_add(1);
        }
        shared.signal();
        Some(song)
    }

    /// Acknowledge the pending command. `Start` and successful `Seek` begin
    /// a new generation. Returns the current generation.
    pub fn command_finished(&self) -> u32 {
        let mut shared = self.notify.enter();
        match shared.command {
            DecoderCommand::Start => shared.generation = shared.generation.wrapping_add(1),
            DecoderCommand::Seek if !shared.seek_error => {
                shared.generation = shared.generation.wrapping_add(1);
            }
            _ => {}
        }
        shared.command = DecoderCommand::None;
        shared.signal();
        shared.generation
    }

    /// Acknowledge the pending seek as failed.
    pub fn seek_failed(&self) {
        self.notify.enter().seek_error = true;
        self.command_finished();
    }

    /// The decoder knows the song's audio format; enter [`DecoderState::Decode`].
    pub fn set_ready(&self, format: AudioFormat, seekable: bool, total_time: Option<f64>) {
        let mut shared = self.notify.enter();
        debug!("Decoder ready: {format}, seekable={seekable}, total={total_time:?}");
        shared.state = DecoderState::Decode;
        shared.format = Some(format);
        shared.seekable = seekable;
        shared.total_time = total_time;
        shared.signal();
    }

    /// The song ended (or failed); return to [`DecoderState::Stop`].
    ///
    /// A stop that was pending is acknowledged; a seek that the plugin never
    /// performed is acknowledged as failed.
    pub fn finish_song(&self, result: Result<()>) {
        let mut shared = self.notify.enter();
        shared.state = DecoderState::Stop;
        if let Err(e) = result {
            error!("Decoder error: {e}");
            shared.error = Some(e);
        }
        match shared.command {
            DecoderCommand::Seek => {
                shared.seek_error = true;
                shared.command = DecoderCommand::None;
            }
            DecoderCommand::Stop => shared.command = DecoderCommand::None,
            DecoderCommand::Start | DecoderCommand::None => {}
        }
        shared.signal();
    }

    /// Record an error without a running song.
    pub fn set_error(&self, error: Error) {
        self.finish_song(Err(error));
    }

    pub fn seek_target(&self) -> f64 {
        self.notify.enter().seek_where
    }

    /// Sleep while `full()` holds and no command is pending.
    pub(crate) fn wait_for_space(&self, full: impl Fn() -> bool) {
        let mut shared = self.notify.enter();
        if shared.command == DecoderCommand::None && !shared.quit && full() {
            shared.timed_wait(DATA_POLL);
        }
    }

    /// Wake the decoder if it is waiting for ring space. Never blocks.
    pub fn signal_async(&self) {
        // Busy means the decoder is awake and will re-check on its own.
        let _ = self.notify.signal_async();
    }

    // ---- Queries ------------------------------------------------------

    pub fn state(&self) -> DecoderState {
        self.notify.enter().state
    }

    /// Stopped with no command pending.
    pub fn is_idle(&self) -> bool {
        let shared = self.notify.enter();
        shared.state == DecoderState::Stop && shared.command == DecoderCommand::None
    }

    pub fn has_error(&self) -> bool {
        self.notify.enter().error.is_some()
    }

    pub fn take_error(&self) -> Option<Error> {
        self.notify.enter().error.take()
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.notify.enter().format
    }

    pub fn total_time(&self) -> Option<f64> {
        self.notify.enter().total_time
    }

    pub fn song(&self) -> Option<Song> {
        self.notify.enter().song.clone()
    }

    pub fn generation(&self) -> u32 {
        self.notify.enter().generation
    }

    pub fn snapshot(&self) -> DecoderStatus {
        let shared = self.notify.enter();
        DecoderStatus {
            state: shared.state,
            command: shared.command,
            song: shared.song.clone(),
            format: shared.format,
            seekable: shared.seekable,
            total_time: shared.total_time,
            generation: shared.generation,
            error: shared.error.as_ref().map(ToString::to_string),
        }
    }
}
