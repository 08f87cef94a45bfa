//! Player-side control object.
//!
//! Callers issue commands and block until the player thread has applied
//! them; the player thread publishes playback status. Non-command settings
//! (volume, cross-fade, the queue and its lock) are plain writes under the
//! same lock.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;
use std::time::Duration;

use reel_core::{AudioFormat, Error, Result, Song};
use tracing::debug;

use crate::sync::{Notify, NotifyGuard, WakePipe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stop,
    Pause,
    Play,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerCommand {
    #[default]
    None,
    Play,
    Stop,
    Pause,
    Seek,
    CloseAudio,
    Exit,
}

/// Buffering progress of the chunk ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    /// Nothing queued yet.
    #[default]
    Blank,
    /// The decoder is filling the ring before playback starts.
    Decode,
    /// The prebuffer threshold was reached; audio is flowing.
    Full,
    /// The player caught up with the decoder (underrun).
    Empty,
}

/// While locked, the player does not advance to the next queued song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueLock {
    #[default]
    Unlocked,
    Locked,
}

/// Kind of the last playback error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerError {
    EmptyQueue,
    Decoder,
    Output,
    Seek,
}

impl PlayerError {
    pub const fn classify(error: &Error) -> Self {
        match error {
            Error::EmptyQueue => Self::EmptyQueue,
            Error::Output(_) | Error::NoOutputs => Self::Output,
            Error::Seek(_) => Self::Seek,
            _ => Self::Decoder,
        }
    }
}

#[derive(Debug, Default)]
struct PlayerShared {
    state: PlayerState,
    command: PlayerCommand,
    reply: Option<Error>,
    exited: bool,
    queue_state: QueueState,
    queue_lock: QueueLock,
    queue: VecDeque<Song>,
    cross_fade: f32,
    software_volume: f32,
    song: Option<Song>,
    errored_song: Option<Song>,
    elapsed: f64,
    total_time: Option<f64>,
    bit_rate: u16,
    format: Option<AudioFormat>,
    total_play_time: f64,
    error: Option<Error>,
    seek_where: f64,
}

/// Snapshot of the player status.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub queue_state: QueueState,
    pub queue_lock: QueueLock,
    pub song: Option<Song>,
    pub errored_song: Option<Song>,
    pub next_song: Option<Song>,
    pub queued: usize,
    pub elapsed: f64,
    pub total_time: Option<f64>,
    pub bit_rate: u16,
    pub format: Option<AudioFormat>,
    pub total_play_time: f64,
    pub cross_fade: f32,
    pub software_volume: f32,
    pub error: Option<PlayerError>,
    pub error_message: Option<String>,
}

/// Shared between callers and the player thread.
#[derive(Debug)]
pub struct PlayerControl {
    notify: Notify<PlayerShared>,
    observer: WakePipe,
}

impl Default for PlayerControl {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

impl PlayerControl {
    pub fn new(cross_fade: f32, software_volume: f32) -> Self {
        Self {
            notify: Notify::new(PlayerShared {
                cross_fade: cross_fade.max(0.0),
                software_volume: software_volume.clamp(0.0, 1.0),
                ..PlayerShared::default()
            }),
            observer: WakePipe::new(),
        }
    }

    fn command_locked(shared: &mut NotifyGuard<'_, PlayerShared>, command: PlayerCommand) -> Result<()> {
        assert_eq!(
            shared.command,
            PlayerCommand::None,
            "player command issued while another is pending"
        );
        if shared.exited {
            return Err(Error::Internal("player thread has exited".to_string()));
        }
        shared.command = command;
        shared.reply = None;
        shared.signal();
        while shared.command != PlayerCommand::None && !shared.exited {
            shared.wait();
        }
        if shared.command != PlayerCommand::None {
            shared.command = PlayerCommand::None;
            return Err(Error::Internal("player thread has exited".to_string()));
        }
        shared.reply.take().map_or(Ok(()), Err)
    }

    fn command(&self, command: PlayerCommand) -> Result<()> {
        debug!("Player command: {command:?}");
        Self::command_locked(&mut self.notify.enter(), command)
    }

    // ---- Caller side --------------------------------------------------

    /// Start playing the next queued song, or resume when paused.
    ///
    /// With nothing queued the state stays [`PlayerState::Stop`] and
    /// [`Error::EmptyQueue`] is returned (and recorded).
    pub fn play(&self) -> Result<()> {
        self.command(PlayerCommand::Play)
    }

    /// Toggle between play and pause.
    pub fn pause(&self) -> Result<()> {
        self.command(PlayerCommand::Pause)
    }

    pub fn set_pause(&self, pause: bool) -> Result<()> {
        let mut shared = self.notify.enter();
        let toggle = matches!(
            (shared.state, pause),
            (PlayerState::Play, true) | (PlayerState::Pause, false)
        );
        if toggle {
            Self::command_locked(&mut shared, PlayerCommand::Pause)
        } else {
            Ok(())
        }
    }

    pub fn stop(&self) -> Result<()> {
        self.command(PlayerCommand::Stop)
    }

    /// Seek the current song. Resolves once the decoder has repositioned.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let mut shared = self.notify.enter();
        shared.seek_where = seconds;
        Self::command_locked(&mut shared, PlayerCommand::Seek)
    }

    /// Close all outputs; playback pauses if it was running.
    pub fn close_audio(&self) -> Result<()> {
        self.command(PlayerCommand::CloseAudio)
    }

    /// Stop playback, release outputs and end the player thread.
    pub fn exit(&self) -> Result<()> {
        self.command(PlayerCommand::Exit)
    }

    /// Append a song to the play queue.
    pub fn enqueue(&self, song: Song) {
        let mut shared = self.notify.enter();
        shared.queue.push_back(song);
        shared.signal();
    }

    pub fn clear_queue(&self) {
        self.notify.enter().queue.clear();
    }

    pub fn set_cross_fade(&self, seconds: f32) {
        self.notify.enter().cross_fade = seconds.max(0.0);
    }

    pub fn cross_fade(&self) -> f32 {
        self.notify.enter().cross_fade
    }

    pub fn set_software_volume(&self, volume: f32) {
        self.notify.enter().software_volume = volume.clamp(0.0, 1.0);
    }

    pub fn software_volume(&self) -> f32 {
        self.notify.enter().software_volume
    }

    pub fn lock_queue(&self) {
        self.notify.enter().queue_lock = QueueLock::Locked;
    }

    pub fn unlock_queue(&self) {
        let mut shared = self.notify.enter();
        shared.queue_lock = QueueLock::Unlocked;
        shared.signal();
    }

    pub fn clear_error(&self) {
        let mut shared = self.notify.enter();
        shared.error = None;
        shared.errored_song = None;
    }

    pub fn error(&self) -> Option<PlayerError> {
        self.notify.enter().error.as_ref().map(PlayerError::classify)
    }

    pub fn state(&self) -> PlayerState {
        self.notify.enter().state
    }

    pub fn status(&self) -> PlayerStatus {
        let shared = self.notify.enter();
        PlayerStatus {
            state: shared.state,
            queue_state: shared.queue_state,
            queue_lock: shared.queue_lock,
            song: shared.song.clone(),
            errored_song: shared.errored_song.clone(),
            next_song: shared.queue.front().cloned(),
            queued: shared.queue.len(),
            elapsed: shared.elapsed,
            total_time: shared.total_time,
            bit_rate: shared.bit_rate,
            format: shared.format,
            total_play_time: shared.total_play_time,
            cross_fade: shared.cross_fade,
            software_volume: shared.software_volume,
            error: shared.error.as_ref().map(PlayerError::classify),
            error_message: shared.error.as_ref().map(ToString::to_string),
        }
    }

    /// Woken by the player thread whenever the status changed in a way
    /// observers care about (song change, state change, error).
    pub const fn observer(&self) -> &WakePipe {
        &self.observer
    }

    /// Wake the player if it waits for chunks. Never blocks.
    pub fn signal_async(&self) {
        // Busy means the player is awake and will re-check on its own.
        let _ = self.notify.signal_async();
    }

    // ---- Player thread side -------------------------------------------

    pub fn poll_command(&self) -> PlayerCommand {
        self.notify.enter().command
    }

    /// Block until a command is pending.
    pub fn wait_command(&self) -> PlayerCommand {
        let mut shared = self.notify.enter();
        while shared.command == PlayerCommand::None {
            shared.wait();
        }
        shared.command
    }

    /// Sleep up to `timeout` unless a command is pending.
    pub fn wait_for_data(&self, timeout: Duration) {
        let mut shared = self.notify.enter();
        if shared.command == PlayerCommand::None {
            shared.timed_wait(timeout);
        }
    }

    /// Acknowledge the pending command with its outcome.
    pub fn finish_command(&self, result: Result<()>) {
        let mut shared = self.notify.enter();
        shared.reply = result.err();
        shared.command = PlayerCommand::None;
        shared.signal();
    }

    /// The player thread is gone; release any waiting caller.
    pub fn set_exited(&self) {
        let mut shared = self.notify.enter();
        shared.exited = true;
        shared.signal();
    }

    pub fn seek_target(&self) -> f64 {
        self.notify.enter().seek_where
    }

    /// Set the state. Returns whether it changed.
    pub fn set_state(&self, state: PlayerState) -> bool {
        let mut shared = self.notify.enter();
        let changed = shared.state != state;
        shared.state = state;
        changed
    }

    pub fn set_queue_state(&self, queue_state: QueueState) {
        self.notify.enter().queue_state = queue_state;
    }

    pub fn queue_state(&self) -> QueueState {
        self.notify.enter().queue_state
    }

    /// A song became current (or none, on stop).
    pub fn set_song(&self, song: Option<Song>, total_time: Option<f64>) {
        let mut shared = self.notify.enter();
        shared.song = song;
        shared.total_time = total_time;
        shared.elapsed = 0.0;
        shared.bit_rate = 0;
    }

    pub fn set_elapsed(&self, elapsed: f64) {
        self.notify.enter().elapsed = elapsed;
    }

    /// Account for one played chunk.
    pub fn update_progress(
        &self,
        elapsed: f64,
        played: f64,
        bit_rate: u16,
        format: Option<AudioFormat>,
    ) {
        let mut shared = self.notify.enter();
        shared.elapsed = elapsed;
        shared.total_play_time += played;
        shared.bit_rate = bit_rate;
        if format.is_some() {
            shared.format = format;
        }
    }

    /// Record a playback error and the song it belongs to.
    pub fn set_error(&self, error: Error, song: Option<Song>) {
        let mut shared = self.notify.enter();
        shared.error = Some(error);
        if song.is_some() {
            shared.errored_song = song;
        }
    }

    /// Remove and return the next queued song. Honors the queue lock unless
    /// `force` is set (an explicit play request).
    pub fn take_next_song(&self, force: bool) -> Option<Song> {
        let mut shared = self.notify.enter();
        if !force && shared.queue_lock == QueueLock::Locked {
            return None;
        }
        shared.queue.pop_front()
    }

    /// The next queued song, unless the queue is locked.
    pub fn peek_next_song(&self) -> Option<Song> {
        let shared = self.notify.enter();
        if shared.queue_lock == QueueLock::Locked {
            return None;
        }
        shared.queue.front().cloned()
    }

    /// Put a song back at the head of the queue.
    pub fn requeue_front(&self, song: Song) {
        self.notify.enter().queue.push_front(song);
    }
}
