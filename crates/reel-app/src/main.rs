//! # Reel
//!
//! Plays a list of songs through the background playback engine and logs
//! what the player reports.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use reel_audio::{
    DecoderRegistry, EngineConfig, OutputConfig, OutputRegistry, PlaybackEngine, PlayerEvent,
    PlayerState,
};
use reel_core::{Song, TagKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for an event before checking the player state.
const EVENT_POLL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine config file (JSON). Defaults to `config.json` in the user
    /// config directory.
    #[arg(short, long, value_name = "FILE", env = "REEL_CONFIG")]
    config: Option<PathBuf>,

    /// Add an output, e.g. `speakers=device` or `dump=file:/tmp/out.pcm`.
    /// Replaces the outputs from the config file.
    #[arg(short, long = "output", value_name = "NAME=PLUGIN[:ARG]")]
    outputs: Vec<String>,

    /// Start the first song at this position, in seconds
    #[arg(short, long, value_name = "SECONDS")]
    seek: Option<f64>,

    /// Software volume, 0 to 100
    #[arg(short, long, value_name = "PERCENT")]
    volume: Option<f32>,

    /// Print the tags of local files instead of playing them
    #[arg(long)]
    probe: bool,

    /// Print the effective config as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Local paths or URIs to play in order
    #[arg(required_unless_present = "print_config")]
    songs: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel=info,reel_app=info,reel_audio=info".into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting Reel v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    if cli.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let decoders = DecoderRegistry::with_builtins();
    if cli.probe {
        probe(&decoders, &cli.songs);
        return Ok(());
    }

    let mut engine = PlaybackEngine::new(config, decoders, OutputRegistry::with_builtins())?;
    let result = play(&engine, &cli);
    engine.shutdown();
    result
}

/// Resolve the engine config: explicit file, then the user config
/// directory, then defaults. Outputs given on the command line win.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let path = cli.config.clone().or_else(|| {
        ProjectDirs::from("com", "reel", "Reel")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .filter(|path| path.exists())
    });

    let mut config = match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            EngineConfig::load(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    if !cli.outputs.is_empty() {
        config.outputs = cli
            .outputs
            .iter()
            .map(|spec| parse_output(spec))
            .collect::<Result<_>>()?;
    }
    if config.outputs.is_empty() {
        config.outputs.push(default_output());
    }
    if let Some(percent) = cli.volume {
        config.software_volume = (percent / 100.0).clamp(0.0, 1.0);
    }
    config.validate()?;
    Ok(config)
}

/// Parse `NAME=PLUGIN[:ARG]`. The argument maps to the plugin's main
/// option: the path for `file`, the device for `device`, sync for `null`.
fn parse_output(spec: &str) -> Result<OutputConfig> {
    let Some((name, rest)) = spec.split_once('=') else {
        bail!("output {spec:?} is not NAME=PLUGIN[:ARG]");
    };
    let (plugin, arg) = match rest.split_once(':') {
        Some((plugin, arg)) => (plugin, Some(arg)),
        None => (rest, None),
    };
    if name.is_empty() || plugin.is_empty() {
        bail!("output {spec:?} needs a name and a plugin");
    }

    let config = OutputConfig::new(name, plugin);
    let Some(arg) = arg else {
        return Ok(config);
    };
    let key = match plugin {
        "file" => "path",
        "device" => "device",
        "null" => "sync",
        other => bail!("output plugin {other:?} takes no argument"),
    };
    Ok(config.with_option(key, arg))
}

#[cfg(feature = "cpal")]
fn default_output() -> OutputConfig {
    OutputConfig::new("default", "device")
}

/// Without a sound card backend, play in real time into nothing.
#[cfg(not(feature = "cpal"))]
fn default_output() -> OutputConfig {
    OutputConfig::new("default", "null").with_option("sync", "true")
}

fn probe(decoders: &DecoderRegistry, songs: &[String]) {
    for uri in songs {
        let path = Path::new(uri);
        let Some(tag) = decoders.tag_probe(path) else {
            warn!("{uri}: no tags");
            continue;
        };
        println!("{uri}");
        if let Some(duration) = tag.duration {
            println!("  Time: {duration:.3}");
        }
        for item in tag.items() {
            println!("  {}: {}", item.kind, item.value);
        }
        if decoders.has_cue_sheet(path) {
            println!("  (embedded cue sheet)");
        }
    }
}

/// Queue every song, start playing and log events until the player stops.
fn play(engine: &PlaybackEngine, cli: &Cli) -> Result<()> {
    for uri in &cli.songs {
        engine.enqueue(Song::new(uri));
    }
    engine.play().context("failed to start playback")?;

    if let Some(seconds) = cli.seek {
        if let Err(e) = engine.seek(seconds) {
            warn!("Seek to {seconds}s failed: {e}");
        }
    }

    loop {
        let Some(event) = engine.recv_event_timeout(EVENT_POLL) else {
            if engine.status().state == PlayerState::Stop {
                break;
            }
            continue;
        };
        match event {
            PlayerEvent::StateChanged(PlayerState::Stop) => break,
            // Nothing here pauses, so a pause means every output failed.
            PlayerEvent::StateChanged(PlayerState::Pause) => {
                bail!("playback paused: no output is working");
            }
            PlayerEvent::StateChanged(PlayerState::Play) => {}
            PlayerEvent::SongStarted(song) => info!("Playing {song}"),
            PlayerEvent::SongFinished(song) => debug!("Finished {song}"),
            PlayerEvent::Tag(tag) => {
                let artist = tag.get(TagKind::Artist).unwrap_or("unknown artist");
                if let Some(title) = tag.get(TagKind::Title) {
                    info!("Now playing: {artist} - {title}");
                }
            }
            PlayerEvent::Elapsed(seconds) => debug!("Elapsed {seconds:.0}s"),
            PlayerEvent::Error {
                song,
                kind,
                message,
            } => match song {
                Some(song) => error!("{kind:?} error on {song}: {message}"),
                None => error!("{kind:?} error: {message}"),
            },
            PlayerEvent::OutputFailed { name, error } => warn!("Output {name} failed: {error}"),
        }
    }

    let status = engine.status();
    info!("Played {:.1}s of audio", status.total_play_time);
    Ok(())
}
