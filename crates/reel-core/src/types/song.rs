//! Song identity as seen by the playback pipeline.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A song to be played.
///
/// Cheap to clone; the URI is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    uri: Arc<str>,
    /// Total duration in seconds, when known ahead of decoding.
    pub duration: Option<f64>,
}

impl Song {
    pub fn new(uri: impl AsRef<str>) -> Self {
        Self {
            uri: Arc::from(uri.as_ref()),
            duration: None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::new(path.as_ref().to_string_lossy())
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether the URI points to the local file system.
    pub fn is_file(&self) -> bool {
        !self.uri.contains("://") || self.uri.starts_with("file://")
    }

    /// Local file path, if this is a file song.
    pub fn local_path(&self) -> Option<PathBuf> {
        if !self.is_file() {
            return None;
        }
        let path = self.uri.strip_prefix("file://").unwrap_or(&self.uri);
        Some(PathBuf::from(path))
    }

    /// Lower-cased file name suffix, used to pick a decoder plugin.
    pub fn suffix(&self) -> Option<String> {
        let name = self.uri.rsplit('/').next()?;
        let name = name.split(['?', '#']).next()?;
        let (_, suffix) = name.rsplit_once('.')?;
        (!suffix.is_empty()).then(|| suffix.to_ascii_lowercase())
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix() {
        assert_eq!(Song::new("music/a.FLAC").suffix().as_deref(), Some("flac"));
        assert_eq!(
            Song::new("http://host/x.ogg?sid=1").suffix().as_deref(),
            Some("ogg")
        );
        assert_eq!(Song::new("music/noext").suffix(), None);
        assert_eq!(Song::new("dir.d/file").suffix(), None);
    }

    #[test]
    fn test_local_path() {
        assert_eq!(
            Song::new("file:///tmp/a.pcm").local_path(),
            Some(PathBuf::from("/tmp/a.pcm"))
        );
        assert_eq!(
            Song::new("/tmp/a.pcm").local_path(),
            Some(PathBuf::from("/tmp/a.pcm"))
        );
        assert!(Song::new("http://radio/stream").local_path().is_none());
    }

    #[test]
    fn test_serde() {
        let song = Song {
            duration: Some(12.5),
            ..Song::new("music/a.flac")
        };
        let json = serde_json::to_string(&song).unwrap();
        let back: Song = serde_json::from_str(&json).unwrap();
        assert_eq!(back, song);
        assert_eq!(back.uri(), "music/a.flac");
    }
}
