//! Replay gain metadata and scale computation.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Upper bound for any replay gain scale factor.
pub const MAX_SCALE: f32 = 15.0;

/// Which replay gain tuple the player applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayGainMode {
    /// No replay gain scaling.
    #[default]
    Off,
    /// Per-track normalization.
    Track,
    /// Per-album normalization.
    Album,
    /// Album gain when present, otherwise track gain.
    Auto,
}

/// Convert a preamp in dB into a linear factor.
pub fn preamp_from_db(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// A `{gain, peak}` pair for one scope (track or album).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplayGainTuple {
    /// Gain in dB.
    pub gain: f32,
    /// Sample peak as a linear amplitude (1.0 = full scale), 0 if unknown.
    pub peak: f32,
}

impl ReplayGainTuple {
    pub const fn new(gain: f32, peak: f32) -> Self {
        Self { gain, peak }
    }

    /// A tuple is defined when it carries any gain or peak information.
    pub fn is_defined(&self) -> bool {
        self.gain != 0.0 || self.peak != 0.0
    }

    /// Linear scale factor for this tuple.
    ///
    /// A gain of exactly 0 dB yields exactly 1.0. Otherwise the scale is
    /// `10^(gain/20) * preamp`, capped at [`MAX_SCALE`] and lowered so that
    /// `scale * peak` never exceeds full scale.
    pub fn scale(&self, preamp: f32) -> f32 {
        if self.gain == 0.0 {
            return 1.0;
        }

        let mut scale = (10.0_f32.powf(self.gain / 20.0) * preamp).min(MAX_SCALE);
        if self.peak > 0.0 && scale * self.peak > 1.0 {
            scale = 1.0 / self.peak;
        }
        scale
    }
}

/// Track and album replay gain values attached to a song.
///
/// The scale factor is computed lazily, once, and cached; after that the
/// value is immutable.
#[derive(Debug, Default)]
pub struct ReplayGainInfo {
    pub track: ReplayGainTuple,
    pub album: ReplayGainTuple,
    scale: OnceCell<f32>,
}

impl ReplayGainInfo {
    pub fn new(track: ReplayGainTuple, album: ReplayGainTuple) -> Self {
        Self {
            track,
            album,
            scale: OnceCell::new(),
        }
    }

    pub fn is_defined(&self) -> bool {
        self.track.is_defined() || self.album.is_defined()
    }

    /// The tuple selected by `mode`, if any.
    pub fn tuple(&self, mode: ReplayGainMode) -> Option<&ReplayGainTuple> {
        match mode {
            ReplayGainMode::Off => None,
            ReplayGainMode::Track => Some(&self.track),
            ReplayGainMode::Album => Some(&self.album),
            ReplayGainMode::Auto => {
                if self.album.is_defined() {
                    Some(&self.album)
                } else {
                    Some(&self.track)
                }
            }
        }
    }

    /// Cached scale factor for `mode` and `preamp`.
    ///
    /// The first call computes and stores the value; later calls return the
    /// stored value. The engine's mode and preamp are fixed for its lifetime.
    pub fn scale(&self, mode: ReplayGainMode, preamp: f32) -> f32 {
        *self
            .scale
            .get_or_init(|| self.tuple(mode).map_or(1.0, |t| t.scale(preamp)))
    }

    /// Whether the scale has been computed yet.
    pub fn is_scale_cached(&self) -> bool {
        self.scale.get().is_some()
    }
}

impl Clone for ReplayGainInfo {
    /// Clones the tuples; the cached scale is recomputed on demand.
    fn clone(&self) -> Self {
        Self::new(self.track, self.album)
    }
}

impl PartialEq for ReplayGainInfo {
    fn eq(&self, other: &Self) -> bool {
        self.track == other.track && self.album == other.album
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_zero_gain_fast_path() {
        assert_eq!(ReplayGainTuple::new(0.0, 0.9).scale(2.0), 1.0);
        assert_eq!(ReplayGainTuple::new(0.0, 0.0).scale(1.0), 1.0);
    }

    #[test]
    fn test_positive_gain_clamped_by_peak() {
        let t = ReplayGainTuple::new(6.0, 0.8);
        let scale = t.scale(1.0);
        assert!((scale - 1.25).abs() < 1e-6);
        assert!(scale * t.peak <= 1.0 + 1e-6);
    }

    #[test]
    fn test_negative_gain() {
        let scale = ReplayGainTuple::new(-6.0, 0.5).scale(1.0);
        assert!((scale - 0.501_187).abs() < 1e-4);
    }

    #[test]
    fn test_max_scale() {
        let scale = ReplayGainTuple::new(40.0, 0.0).scale(1.0);
        assert!((scale - MAX_SCALE).abs() < f32::EPSILON);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_info_caches_scale() {
        let info = ReplayGainInfo::new(
            ReplayGainTuple::new(-3.0, 0.5),
            ReplayGainTuple::default(),
        );
        assert!(!info.is_scale_cached());
        let first = info.scale(ReplayGainMode::Track, 1.0);
        assert!(info.is_scale_cached());
        // Subsequent calls return the cached value regardless of arguments.
        assert_eq!(info.scale(ReplayGainMode::Track, 4.0), first);
    }

    #[test]
    fn test_auto_prefers_album() {
        let info = ReplayGainInfo::new(
            ReplayGainTuple::new(-3.0, 0.5),
            ReplayGainTuple::new(-5.0, 0.7),
        );
        assert_eq!(info.tuple(ReplayGainMode::Auto), Some(&info.album));

        let track_only = ReplayGainInfo::new(
            ReplayGainTuple::new(-3.0, 0.5),
            ReplayGainTuple::default(),
        );
        assert_eq!(
            track_only.tuple(ReplayGainMode::Auto),
            Some(&track_only.track)
        );
        assert_eq!(track_only.tuple(ReplayGainMode::Off), None);
    }

    #[test]
    fn test_preamp_from_db() {
        assert!((preamp_from_db(0.0) - 1.0).abs() < f32::EPSILON);
        assert!((preamp_from_db(20.0) - 10.0).abs() < 1e-4);
    }

    proptest! {
        #[test]
        fn prop_scale_never_clips(gain in -60.0f32..60.0, peak in 0.01f32..1.0, preamp in 0.1f32..4.0) {
            let scale = ReplayGainTuple::new(gain, peak).scale(preamp);
            prop_assert!(scale * peak <= 1.0 + 1e-5);
            prop_assert!(scale <= MAX_SCALE);
            prop_assert!(scale > 0.0);
        }
    }
}
