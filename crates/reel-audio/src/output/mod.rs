//! Audio outputs.
//!
//! An [`OutputPlugin`] drives one physical or virtual destination. The
//! [`OutputDispatcher`] fans a chunk stream out to every configured sink,
//! converting the audio into each sink's format and isolating failures.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

mod dispatcher;
mod file;
mod null;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "cpal")]
mod cpal;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reel_core::{AudioFormat, Error, Result};

pub use dispatcher::OutputDispatcher;
pub use file::FileOutput;
pub use null::NullOutput;
pub use sink::{OutputSink, SinkState};

#[cfg(feature = "cpal")]
pub use self::cpal::{list_output_devices, CpalOutput};

use crate::config::OutputConfig;

/// A playback destination.
///
/// Plugins live on the player thread and are never shared, so they need
/// not be `Send`.
pub trait OutputPlugin {
    fn name(&self) -> &str;

    /// Open the device for `format`. The plugin may return a different
    /// format it can actually handle; the pipeline converts to it.
    fn open(&mut self, format: AudioFormat) -> Result<AudioFormat>;

    /// Play a chunk of audio in the format returned by [`open`](Self::open).
    fn play(&mut self, data: &[u8]) -> Result<()>;

    /// Drop audio buffered inside the plugin without closing.
    fn cancel(&mut self) {}

    fn close(&mut self);

    /// Final teardown. Called once per plugin lifetime.
    fn finish(&mut self) {}
}

/// Creates an output plugin from its configuration.
pub type OutputFactory = Arc<dyn Fn(&OutputConfig) -> Result<Box<dyn OutputPlugin>> + Send + Sync>;

/// Output plugins by name.
#[derive(Clone)]
pub struct OutputRegistry {
    factories: BTreeMap<String, OutputFactory>,
}

impl fmt::Debug for OutputRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputRegistry")
            .field("plugins", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl OutputRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in plugins: `null`, `file` and, when built
    /// with the `cpal` feature, `device`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("null", |config| Ok(Box::new(NullOutput::from_config(config)?)));
        registry.register("file", |config| Ok(Box::new(FileOutput::from_config(config)?)));
        #[cfg(feature = "cpal")]
        registry.register("device", |config| Ok(Box::new(CpalOutput::from_config(config)?)));
        registry
    }

    pub fn register<F>(&mut self, plugin: impl Into<String>, factory: F)
    where
        F: Fn(&OutputConfig) -> Result<Box<dyn OutputPlugin>> + Send + Sync + 'static,
    {
        self.factories.insert(plugin.into(), Arc::new(factory));
    }

    pub fn contains(&self, plugin: &str) -> bool {
        self.factories.contains_key(plugin)
    }

    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the plugin named by `config.plugin`.
    pub fn create(&self, config: &OutputConfig) -> Result<Box<dyn OutputPlugin>> {
        let factory = self.factories.get(&config.plugin).ok_or_else(|| {
            Error::Config(format!(
                "output {:?}: unknown plugin {:?}",
                config.name, config.plugin
            ))
        })?;
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = OutputRegistry::with_builtins();
        assert!(registry.contains("null"));
        assert!(registry.contains("file"));
        assert!(!registry.contains("alsa"));
    }

    #[test]
    fn test_create_unknown_plugin() {
        let registry = OutputRegistry::with_builtins();
        let result = registry.create(&OutputConfig::new("x", "alsa"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_create_null() {
        let registry = OutputRegistry::with_builtins();
        let mut plugin = registry.create(&OutputConfig::new("quiet", "null")).unwrap();
        assert_eq!(plugin.name(), "quiet");
        let format = plugin.open(AudioFormat::cd()).unwrap();
        assert_eq!(format, AudioFormat::cd());
        plugin.play(&[0; 4]).unwrap();
        plugin.close();
    }
}
