//! Error types for Reel.

use thiserror::Error;

use crate::types::SampleFormat;

/// Result type alias using Reel's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Reel.
#[derive(Error, Debug)]
pub enum Error {
    // Source errors
    #[error("Input source error: {0}")]
    Source(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("No decoder plugin for {0}")]
    NoDecoder(String),

    // Format errors
    #[error("Invalid audio format: {0}")]
    InvalidFormat(#[from] FormatError),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("PCM conversion failed: {0}")]
    Conversion(String),

    // Sink errors
    #[error("Audio output error: {0}")]
    Output(String),

    #[error("No audio output available")]
    NoOutputs,

    // Seek errors
    #[error("Seek failed: {0}")]
    Seek(String),

    // Player errors
    #[error("No song queued")]
    EmptyQueue,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons an audio format is rejected at construction time.
///
/// Each variant names the offending field.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid sample rate {0}")]
    SampleRate(u32),

    #[error("unsupported sample format {0}")]
    SampleFormat(SampleFormat),

    #[error("invalid channel count {0}")]
    Channels(u8),
}

impl Error {
    /// Returns true if this error ends the current song but not the process.
    pub const fn is_fatal_to_song(&self) -> bool {
        matches!(
            self,
            Self::Source(_)
                | Self::Decode(_)
                | Self::NoDecoder(_)
                | Self::InvalidFormat(_)
                | Self::UnsupportedFormat(_)
                | Self::Io(_)
        )
    }

    /// Returns true if this error came from an output sink.
    pub const fn is_sink_error(&self) -> bool {
        matches!(self, Self::Output(_) | Self::NoOutputs)
    }

    /// Copy of this error suitable for storing in shared status.
    ///
    /// `io::Error` and `serde_json::Error` are not `Clone`, so those are
    /// flattened into their message.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Source(s) => Self::Source(s.clone()),
            Self::Decode(s) => Self::Decode(s.clone()),
            Self::NoDecoder(s) => Self::NoDecoder(s.clone()),
            Self::InvalidFormat(e) => Self::InvalidFormat(*e),
            Self::UnsupportedFormat(s) => Self::UnsupportedFormat(s.clone()),
            Self::Conversion(s) => Self::Conversion(s.clone()),
            Self::Output(s) => Self::Output(s.clone()),
            Self::NoOutputs => Self::NoOutputs,
            Self::Seek(s) => Self::Seek(s.clone()),
            Self::EmptyQueue => Self::EmptyQueue,
            Self::Config(s) => Self::Config(s.clone()),
            Self::Io(e) => Self::Source(e.to_string()),
            Self::Json(e) => Self::Config(e.to_string()),
            Self::Cancelled => Self::Cancelled,
            Self::Internal(s) => Self::Internal(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Source("gone".into()).is_fatal_to_song());
        assert!(Error::InvalidFormat(FormatError::Channels(0)).is_fatal_to_song());
        assert!(!Error::Output("alsa".into()).is_fatal_to_song());
        assert!(Error::Output("alsa".into()).is_sink_error());
        assert!(!Error::EmptyQueue.is_sink_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidFormat(FormatError::SampleRate(0));
        assert_eq!(err.to_string(), "Invalid audio format: invalid sample rate 0");
    }

    #[test]
    fn test_duplicate_flattens_io() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert!(matches!(err.duplicate(), Error::Source(msg) if msg == "missing"));
    }
}
