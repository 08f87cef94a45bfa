//! PCM audio format description and validation.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Maximum number of channels the pipeline handles.
pub const MAX_CHANNELS: u8 = 8;

/// Highest accepted sample rate (exclusive).
pub const MAX_SAMPLE_RATE: u32 = 1 << 30;

/// Sample representation of interleaved PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 8 bit.
    S8,
    /// Signed 16 bit.
    S16,
    /// Signed 24 bit, stored in the low bits of a 32 bit integer.
    S24P32,
    /// Signed 32 bit.
    S32,
    /// 32 bit float in the range -1.0..=1.0.
    Float,
    /// Direct Stream Digital; decoders may report it but the pipeline
    /// cannot convert it.
    Dsd,
}

impl SampleFormat {
    /// Size in bytes of one sample.
    pub const fn sample_size(self) -> usize {
        match self {
            Self::S8 | Self::Dsd => 1,
            Self::S16 => 2,
            Self::S24P32 | Self::S32 | Self::Float => 4,
        }
    }

    /// Whether the pipeline can carry and convert this format.
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Dsd)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::S8 => "8",
            Self::S16 => "16",
            Self::S24P32 => "24",
            Self::S32 => "32",
            Self::Float => "f",
            Self::Dsd => "dsd",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "8" => Ok(Self::S8),
            "16" => Ok(Self::S16),
            "24" => Ok(Self::S24P32),
            "32" => Ok(Self::S32),
            "f" => Ok(Self::Float),
            "dsd" => Ok(Self::Dsd),
            other => Err(format!("unknown sample format {other:?}")),
        }
    }
}

/// Check a (rate, format, channels) triple against the supported domain.
///
/// The error names the first offending field.
pub const fn validate(
    sample_rate: u32,
    format: SampleFormat,
    channels: u8,
) -> Result<(), FormatError> {
    if sample_rate == 0 || sample_rate >= MAX_SAMPLE_RATE {
        return Err(FormatError::SampleRate(sample_rate));
    }
    if !format.is_supported() {
        return Err(FormatError::SampleFormat(format));
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(FormatError::Channels(channels));
    }
    Ok(())
}

/// A validated PCM audio format.
///
/// Values can only be obtained through [`AudioFormat::new`] (or parsing),
/// so every instance inside the pipeline is known to be valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AudioFormat {
    sample_rate: u32,
    format: SampleFormat,
    channels: u8,
}

impl AudioFormat {
    /// Create a new audio format, validating every field.
    pub const fn new(
        sample_rate: u32,
        format: SampleFormat,
        channels: u8,
    ) -> Result<Self, FormatError> {
        match validate(sample_rate, format, channels) {
            Ok(()) => Ok(Self {
                sample_rate,
                format,
                channels,
            }),
            Err(e) => Err(e),
        }
    }

    /// CD quality: 44.1 kHz, 16 bit, stereo.
    pub const fn cd() -> Self {
        Self {
            sample_rate: 44_100,
            format: SampleFormat::S16,
            channels: 2,
        }
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn format(&self) -> SampleFormat {
        self.format
    }

    pub const fn channels(&self) -> u8 {
        self.channels
    }

    /// Size in bytes of one sample.
    pub const fn sample_size(&self) -> usize {
        self.format.sample_size()
    }

    /// Size in bytes of one frame (one sample per channel).
    pub const fn frame_size(&self) -> usize {
        self.format.sample_size() * self.channels as usize
    }

    /// Number of bytes per second of audio.
    pub fn time_to_size(&self) -> f64 {
        f64::from(self.sample_rate) * self.frame_size() as f64
    }

    /// Playback duration in seconds of `bytes` bytes of audio.
    pub fn duration_of(&self, bytes: usize) -> f64 {
        bytes as f64 / self.time_to_size()
    }

    /// Apply a partially specified mask; unset fields keep this format's value.
    pub fn apply_mask(&self, mask: &FormatMask) -> Result<Self, FormatError> {
        Self::new(
            mask.sample_rate.unwrap_or(self.sample_rate),
            mask.format.unwrap_or(self.format),
            mask.channels.unwrap_or(self.channels),
        )
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sample_rate, self.format, self.channels)
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mask: FormatMask = s.parse()?;
        match (mask.sample_rate, mask.format, mask.channels) {
            (Some(rate), Some(format), Some(channels)) => {
                Self::new(rate, format, channels).map_err(|e| e.to_string())
            }
            _ => Err(format!("audio format {s:?} must not contain wildcards")),
        }
    }
}

impl TryFrom<String> for AudioFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AudioFormat> for String {
    fn from(value: AudioFormat) -> Self {
        value.to_string()
    }
}

/// Partially specified audio format, e.g. `44100:16:*`.
///
/// Used to force a sink's output format; `*` keeps the input value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormatMask {
    pub sample_rate: Option<u32>,
    pub format: Option<SampleFormat>,
    pub channels: Option<u8>,
}

impl FormatMask {
    pub const fn is_empty(&self) -> bool {
        self.sample_rate.is_none() && self.format.is_none() && self.channels.is_none()
    }
}

impl FromStr for FormatMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let [rate, format, channels] = parts.as_slice() else {
            return Err(format!("audio format {s:?} is not rate:bits:channels"));
        };

        let sample_rate = match *rate {
            "*" => None,
            r => Some(r.parse().map_err(|_| format!("bad sample rate {r:?}"))?),
        };
        let format = match *format {
            "*" => None,
            f => Some(f.parse()?),
        };
        let channels = match *channels {
            "*" => None,
            c => Some(c.parse().map_err(|_| format!("bad channel count {c:?}"))?),
        };

        let mask = Self {
            sample_rate,
            format,
            channels,
        };
        // Validate the fields that are set against a known-good base.
        AudioFormat::cd().apply_mask(&mask).map_err(|e| e.to_string())?;
        Ok(mask)
    }
}

impl fmt::Display for FormatMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sample_rate {
            Some(r) => write!(f, "{r}:")?,
            None => f.write_str("*:")?,
        }
        match self.format {
            Some(sf) => write!(f, "{sf}:")?,
            None => f.write_str("*:")?,
        }
        match self.channels {
            Some(c) => write!(f, "{c}"),
            None => f.write_str("*"),
        }
    }
}

impl TryFrom<String> for FormatMask {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FormatMask> for String {
    fn from(value: FormatMask) -> Self {
        value.to_string()
    }
}
