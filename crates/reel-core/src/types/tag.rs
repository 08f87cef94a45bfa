//! Song metadata and the tag handler callbacks used by metadata parsers.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::replay_gain::{ReplayGainInfo, ReplayGainTuple};

/// Kind of a single tag item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Artist,
    AlbumArtist,
    Album,
    Title,
    Track,
    Name,
    Genre,
    Date,
    Composer,
    Performer,
    Comment,
    Disc,
}

impl TagKind {
    /// Parse a (case-insensitive) Vorbis-comment style field name.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "artist" => Self::Artist,
            "albumartist" | "album artist" | "album_artist" => Self::AlbumArtist,
            "album" => Self::Album,
            "title" => Self::Title,
            "track" | "tracknumber" => Self::Track,
            "name" => Self::Name,
            "genre" => Self::Genre,
            "date" | "year" => Self::Date,
            "composer" => Self::Composer,
            "performer" => Self::Performer,
            "comment" => Self::Comment,
            "disc" | "discnumber" => Self::Disc,
            _ => return None,
        };
        Some(kind)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Artist => "Artist",
            Self::AlbumArtist => "AlbumArtist",
            Self::Album => "Album",
            Self::Title => "Title",
            Self::Track => "Track",
            Self::Name => "Name",
            Self::Genre => "Genre",
            Self::Date => "Date",
            Self::Composer => "Composer",
            Self::Performer => "Performer",
            Self::Comment => "Comment",
            Self::Disc => "Disc",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `kind = value` metadata item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagItem {
    pub kind: TagKind,
    pub value: Arc<str>,
}

/// Items stored inline before spilling to the heap.
const INLINE_ITEMS: usize = 8;

/// A set of metadata items plus an optional duration.
///
/// Most tags carry only a handful of items, so they are kept inline and
/// only spill to a heap allocation past [`INLINE_ITEMS`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    /// Duration in seconds, if known.
    pub duration: Option<f64>,
    items: SmallVec<[TagItem; INLINE_ITEMS]>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item. Empty values are ignored.
    pub fn add(&mut self, kind: TagKind, value: impl AsRef<str>) {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return;
        }
        self.items.push(TagItem {
            kind,
            value: Arc::from(value),
        });
    }

    /// Builder-style [`Tag::add`].
    pub fn with(mut self, kind: TagKind, value: impl AsRef<str>) -> Self {
        self.add(kind, value);
        self
    }

    /// First value of `kind`.
    pub fn get(&self, kind: TagKind) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.kind == kind)
            .map(|item| &*item.value)
    }

    pub fn items(&self) -> &[TagItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the items have spilled out of the inline storage.
    pub fn spilled(&self) -> bool {
        self.items.spilled()
    }

    /// Merge two tags: kinds present in `add` replace those of `base`.
    pub fn merge(base: &Self, add: &Self) -> Self {
        let mut merged = Self {
            duration: add.duration.or(base.duration),
            items: SmallVec::new(),
        };
        merged.items.extend(
            base.items
                .iter()
                .filter(|item| !add.items.iter().any(|a| a.kind == item.kind))
                .cloned(),
        );
        merged.items.extend(add.items.iter().cloned());
        merged
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.get(TagKind::Artist), self.get(TagKind::Title)) {
            (Some(artist), Some(title)) => write!(f, "{artist} - {title}"),
            (None, Some(title)) => f.write_str(title),
            _ => match self.get(TagKind::Name) {
                Some(name) => f.write_str(name),
                None => f.write_str("(untitled)"),
            },
        }
    }
}

/// Callbacks invoked by metadata parsers.
///
/// Every method has a no-op default so handlers only implement what they
/// care about.
pub trait TagHandler {
    /// The song duration in seconds was determined.
    fn on_duration(&mut self, _seconds: f64) {}

    /// A recognized tag item was found.
    fn on_tag(&mut self, _kind: TagKind, _value: &str) {}

    /// An arbitrary `name = value` pair was found.
    fn on_pair(&mut self, _name: &str, _value: &str) {}
}

/// Accumulates parser callbacks into a [`Tag`] and replay gain values.
#[derive(Debug, Default)]
pub struct TagBuilder {
    tag: Tag,
    track: ReplayGainTuple,
    album: ReplayGainTuple,
    has_replay_gain: bool,
}

impl TagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_tag(self) -> Tag {
        self.tag
    }

    /// Finish, returning the tag and replay gain info (if any pair set it).
    pub fn finish(self) -> (Tag, Option<ReplayGainInfo>) {
        let rg = self
            .has_replay_gain
            .then(|| ReplayGainInfo::new(self.track, self.album));
        (self.tag, rg)
    }
}

/// Parse values like `-6.20 dB` or `0.988`.
fn parse_gain_value(value: &str) -> Option<f32> {
    let value = value.trim();
    let number = value
        .strip_suffix("dB")
        .or_else(|| value.strip_suffix("db"))
        .unwrap_or(value)
        .trim();
    number.parse().ok()
}

impl TagHandler for TagBuilder {
    fn on_duration(&mut self, seconds: f64) {
        self.tag.duration = Some(seconds);
    }

    fn on_tag(&mut self, kind: TagKind, value: &str) {
        self.tag.add(kind, value);
    }

    fn on_pair(&mut self, name: &str, value: &str) {
        let Some(parsed) = parse_gain_value(value) else {
            return;
        };
        let slot = match name.to_ascii_lowercase().as_str() {
            "replaygain_track_gain" => &mut self.track.gain,
            "replaygain_track_peak" => &mut self.track.peak,
            "replaygain_album_gain" => &mut self.album.gain,
            "replaygain_album_peak" => &mut self.album.peak,
            _ => return,
        };
        *slot = parsed;
        self.has_replay_gain = true;
    }
}

/// Detects whether a file carries an embedded cue sheet.
#[derive(Debug, Default)]
pub struct CueSheetProbe {
    found: bool,
}

impl CueSheetProbe {
    pub const fn found(&self) -> bool {
        self.found
    }
}

impl TagHandler for CueSheetProbe {
    fn on_pair(&mut self, name: &str, _value: &str) {
        if name.eq_ignore_ascii_case("cuesheet") {
            self.found = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let tag = Tag::new()
            .with(TagKind::Artist, "Nina Simone")
            .with(TagKind::Title, "  Sinnerman ")
            .with(TagKind::Genre, "");
        assert_eq!(tag.get(TagKind::Artist), Some("Nina Simone"));
        assert_eq!(tag.get(TagKind::Title), Some("Sinnerman"));
        assert_eq!(tag.get(TagKind::Genre), None);
        assert_eq!(tag.len(), 2);
        assert_eq!(tag.to_string(), "Nina Simone - Sinnerman");
    }

    #[test]
    fn test_inline_then_spill() {
        let mut tag = Tag::new();
        for i in 0..INLINE_ITEMS {
            tag.add(TagKind::Comment, format!("c{i}"));
        }
        assert!(!tag.spilled());
        tag.add(TagKind::Comment, "one more");
        assert!(tag.spilled());
        assert_eq!(tag.len(), INLINE_ITEMS + 1);
    }

    #[test]
    fn test_merge_replaces_kinds() {
        let mut base = Tag::new()
            .with(TagKind::Artist, "Radio FM")
            .with(TagKind::Name, "Station");
        base.duration = Some(12.0);
        let add = Tag::new().with(TagKind::Artist, "Live Act");

        let merged = Tag::merge(&base, &add);
        assert_eq!(merged.get(TagKind::Artist), Some("Live Act"));
        assert_eq!(merged.get(TagKind::Name), Some("Station"));
        assert_eq!(merged.duration, Some(12.0));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_builder_collects_replay_gain() {
        let mut builder = TagBuilder::new();
        builder.on_duration(180.5);
        builder.on_tag(TagKind::Title, "Song");
        builder.on_pair("REPLAYGAIN_TRACK_GAIN", "-6.5 dB");
        builder.on_pair("replaygain_track_peak", "0.95");
        builder.on_pair("unrelated", "x");

        let (tag, rg) = builder.finish();
        assert_eq!(tag.duration, Some(180.5));
        assert_eq!(tag.get(TagKind::Title), Some("Song"));
        let rg = rg.unwrap();
        assert!((rg.track.gain + 6.5).abs() < f32::EPSILON);
        assert!((rg.track.peak - 0.95).abs() < f32::EPSILON);
        assert!(!rg.album.is_defined());
    }

    #[test]
    fn test_builder_without_replay_gain() {
        let mut builder = TagBuilder::new();
        builder.on_tag(TagKind::Album, "A");
        assert!(builder.finish().1.is_none());
    }

    #[test]
    fn test_cue_sheet_probe() {
        let mut probe = CueSheetProbe::default();
        probe.on_tag(TagKind::Title, "x");
        assert!(!probe.found());
        probe.on_pair("CUESHEET", "FILE ...");
        assert!(probe.found());
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(TagKind::from_name("TRACKNUMBER"), Some(TagKind::Track));
        assert_eq!(TagKind::from_name("Album Artist"), Some(TagKind::AlbumArtist));
        assert_eq!(TagKind::from_name("bpm"), None);
    }
}
