//! # reel-core
//!
//! Core types and error handling for the Reel playback engine: audio
//! formats, tags, replay gain and song identity.

pub mod error;
pub mod types;

pub use error::{Error, FormatError, Result};
pub use types::*;
