//! Decoder plugins.
//!
//! A [`DecoderPlugin`] turns a byte stream into PCM by calling back into a
//! [`DecoderClient`]. The [`DecoderRegistry`] picks a plugin for a song by
//! file suffix or MIME type.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

mod client;
mod media;
mod pcm;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use reel_core::{CueSheetProbe, Result, Song, Tag, TagBuilder, TagHandler};
use tracing::debug;

pub use self::client::DecoderClient;
pub use self::media::SymphoniaDecoder;
pub use self::pcm::PcmDecoder;

use crate::input::{FileInput, InputStream};

/// A format-specific decoder.
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case file suffixes this plugin handles.
    fn suffixes(&self) -> &[&str];

    fn mime_types(&self) -> &[&str] {
        &[]
    }

    /// Decode `input` until it ends or the client reports a stop.
    ///
    /// The plugin calls [`DecoderClient::report_ready`] once the format is
    /// known, then feeds PCM through [`DecoderClient::emit_chunk`] and
    /// handles seeks announced by [`DecoderClient::poll_command`].
    fn stream_decode(&self, client: &mut DecoderClient<'_>, input: &mut dyn InputStream)
        -> Result<()>;

    /// Decode a local file. The default opens it as a stream.
    fn file_decode(&self, client: &mut DecoderClient<'_>, path: &Path) -> Result<()> {
        let mut input = FileInput::open(path)?;
        self.stream_decode(client, &mut input)
    }

    /// Report the file's metadata to `handler`. Returns `false` when the
    /// plugin cannot read metadata from this file.
    fn scan_tags(&self, _path: &Path, _handler: &mut dyn TagHandler) -> Result<bool> {
        Ok(false)
    }

    /// Read the file's tag without decoding audio.
    fn tag_probe(&self, path: &Path) -> Option<Tag> {
        let mut builder = TagBuilder::new();
        match self.scan_tags(path, &mut builder) {
            Ok(true) => Some(builder.into_tag()),
            Ok(false) => None,
            Err(e) => {
                debug!("{}: tag probe of {} failed: {e}", self.name(), path.display());
                None
            }
        }
    }
}

/// Decoder plugins in lookup order.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    plugins: Vec<Arc<dyn DecoderPlugin>>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl DecoderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw PCM first, then symphonia for everything else.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PcmDecoder::new());
        registry.register(SymphoniaDecoder::new());
        registry
    }

    pub fn register(&mut self, plugin: impl DecoderPlugin + 'static) {
        self.plugins.push(Arc::new(plugin));
    }

    pub fn register_arc(&mut self, plugin: Arc<dyn DecoderPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn by_suffix(&self, suffix: &str) -> Option<Arc<dyn DecoderPlugin>> {
        let suffix = suffix.to_ascii_lowercase();
        self.plugins
            .iter()
            .find(|p| p.suffixes().contains(&suffix.as_str()))
            .cloned()
    }

    pub fn by_mime(&self, mime: &str) -> Option<Arc<dyn DecoderPlugin>> {
        let mime = mime.split(';').next().unwrap_or(mime).trim();
        self.plugins
            .iter()
            .find(|p| p.mime_types().iter().any(|m| m.eq_ignore_ascii_case(mime)))
            .cloned()
    }

    /// Plugin for `song`: by suffix, then by the stream's MIME type.
    pub fn for_song(&self, song: &Song, mime: Option<&str>) -> Option<Arc<dyn DecoderPlugin>> {
        song.suffix()
            .and_then(|suffix| self.by_suffix(&suffix))
            .or_else(|| mime.and_then(|m| self.by_mime(m)))
    }

    /// Read the tag of a local file with the plugin its suffix selects.
    pub fn tag_probe(&self, path: &Path) -> Option<Tag> {
        let song = Song::from_path(path);
        self.for_song(&song, None)?.tag_probe(path)
    }

    /// Whether the file carries an embedded cue sheet.
    pub fn has_cue_sheet(&self, path: &Path) -> bool {
        let song = Song::from_path(path);
        let Some(plugin) = self.for_song(&song, None) else {
            return false;
        };
        let mut probe = CueSheetProbe::default();
        plugin.scan_tags(path, &mut probe).unwrap_or(false) && probe.found()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let registry = DecoderRegistry::with_builtins();
        assert_eq!(registry.by_suffix("PCM").unwrap().name(), "pcm");
        assert_eq!(registry.by_suffix("flac").unwrap().name(), "symphonia");
        assert_eq!(registry.by_mime("audio/mpeg").unwrap().name(), "symphonia");
        assert_eq!(
            registry.by_mime("audio/L16; rate=44100").unwrap().name(),
            "pcm"
        );
        assert!(registry.by_suffix("xyz").is_none());
    }

    #[test]
    fn test_for_song_falls_back_to_mime() {
        let registry = DecoderRegistry::with_builtins();
        let song = Song::new("http://radio/stream");
        assert!(registry.for_song(&song, None).is_none());
        assert_eq!(
            registry.for_song(&song, Some("audio/ogg")).unwrap().name(),
            "symphonia"
        );
    }

    #[test]
    fn test_tag_probe_unknown_file() {
        let registry = DecoderRegistry::with_builtins();
        assert!(registry.tag_probe(Path::new("/nonexistent/a.xyz")).is_none());
        assert!(!registry.has_cue_sheet(Path::new("/nonexistent/a.flac")));
    }
}
