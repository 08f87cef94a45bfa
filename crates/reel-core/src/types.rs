//! Core domain types for Reel.

pub mod format;
pub mod replay_gain;
pub mod song;
pub mod tag;

pub use format::{AudioFormat, FormatMask, SampleFormat, MAX_CHANNELS, MAX_SAMPLE_RATE};
pub use replay_gain::{preamp_from_db, ReplayGainInfo, ReplayGainMode, ReplayGainTuple};
pub use song::Song;
pub use tag::{CueSheetProbe, Tag, TagBuilder, TagHandler, TagItem, TagKind};
