//! # reel-audio
//!
//! Background playback pipeline for Reel.
//!
//! Two threads cooperate through shared control objects:
//! - the decode thread runs a [`DecoderPlugin`] and fills the chunk ring
//! - the player thread drains the ring into every configured output
//!
//! [`PlaybackEngine`] owns both threads and exposes the command API.

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod decoder;
pub mod decoder_control;
mod decoder_thread;
pub mod engine;
pub mod input;
pub mod output;
pub mod pcm;
mod player;
pub mod player_control;
pub mod sync;
pub mod tag_sync;

pub use config::{EngineConfig, OutputConfig, ReplayGainConfig};
pub use decoder::{DecoderClient, DecoderPlugin, DecoderRegistry};
pub use decoder_control::{DecoderCommand, DecoderState, DecoderStatus};
pub use engine::PlaybackEngine;
pub use output::{OutputPlugin, OutputRegistry};
pub use player::PlayerEvent;
pub use player_control::{PlayerError, PlayerState, PlayerStatus};
