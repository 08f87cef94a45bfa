//! Engine configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::{HashMap, HashSet};
use std::path::Path;

use reel_core::{Error, FormatMask, ReplayGainMode, Result};
use serde::{Deserialize, Serialize};

/// Settings for the playback pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of chunk slots in the decode buffer.
    pub buffer_chunks: usize,
    /// Fraction of the buffer that must be filled before playback starts.
    pub buffered_before_play: f32,
    pub replay_gain: ReplayGainConfig,
    pub software_volume: f32,
    pub cross_fade_seconds: f32,
    pub outputs: Vec<OutputConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: 256,
            buffered_before_play: 0.1,
            replay_gain: ReplayGainConfig::default(),
            software_volume: 1.0,
            cross_fade_seconds: 0.0,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayGainConfig {
    pub mode: ReplayGainMode,
    /// Extra gain in dB applied on top of the stored gain.
    pub preamp_db: f32,
    /// Gain in dB for songs without replay gain information.
    pub missing_preamp_db: f32,
}

/// One configured sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Unique name, used in logs and status.
    pub name: String,
    /// Registered output plugin, e.g. `null` or `file`.
    pub plugin: String,
    /// Force the sink's format, e.g. `"44100:16:*"`.
    pub format: Option<FormatMask>,
    /// Plugin specific options.
    pub options: HashMap<String, String>,
}

impl OutputConfig {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

impl EngineConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_chunks < 2 {
            return Err(Error::Config(format!(
                "buffer_chunks must be at least 2, got {}",
                self.buffer_chunks
            )));
        }
        if !(0.0..1.0).contains(&self.buffered_before_play) {
            return Err(Error::Config(format!(
                "buffered_before_play must be in [0, 1), got {}",
                self.buffered_before_play
            )));
        }
        if !(0.0..=1.0).contains(&self.software_volume) {
            return Err(Error::Config(format!(
                "software_volume must be in [0, 1], got {}",
                self.software_volume
            )));
        }
        if self.cross_fade_seconds < 0.0 {
            return Err(Error::Config("cross_fade_seconds must not be negative".to_string()));
        }

        let mut names = HashSet::new();
        for output in &self.outputs {
            if output.name.is_empty() || output.plugin.is_empty() {
                return Err(Error::Config("every output needs a name and a plugin".to_string()));
            }
            if !names.insert(output.name.as_str()) {
                return Err(Error::Config(format!("duplicate output name {:?}", output.name)));
            }
        }
        Ok(())
    }

    /// Chunks that must be buffered before playback starts.
    pub fn prebuffer_chunks(&self) -> usize {
        (self.buffer_chunks as f32 * self.buffered_before_play) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::SampleFormat;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.prebuffer_chunks(), 25);
        assert_eq!(config.replay_gain.mode, ReplayGainMode::Off);
    }

    #[test]
    fn test_from_json() {
        let config = EngineConfig::from_json(
            r#"{
                "buffer_chunks": 64,
                "replay_gain": { "mode": "album", "preamp_db": 3.0 },
                "outputs": [
                    { "name": "dump", "plugin": "file", "format": "44100:16:*",
                      "options": { "path": "/tmp/out.pcm" } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.buffer_chunks, 64);
        assert_eq!(config.replay_gain.mode, ReplayGainMode::Album);
        let mask = config.outputs[0].format.unwrap();
        assert_eq!(mask.sample_rate, Some(44_100));
        assert_eq!(mask.format, Some(SampleFormat::S16));
        assert_eq!(mask.channels, None);
        assert_eq!(config.outputs[0].option("path"), Some("/tmp/out.pcm"));
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(EngineConfig::from_json(r#"{"buffer_chunks": 0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"buffered_before_play": 1.0}"#).is_err());
        assert!(EngineConfig::from_json(
            r#"{"outputs": [{"name": "a", "plugin": "null"}, {"name": "a", "plugin": "null"}]}"#
        )
        .is_err());
        assert!(matches!(
            EngineConfig::from_json(r#"{"outputs": [{"name": "a", "plugin": "null", "format": "1:2"}]}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reel.json");
        let config = EngineConfig {
            outputs: vec![OutputConfig::new("null", "null")],
            ..EngineConfig::default()
        };
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }
}
