//! General purpose decoder using symphonia.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use reel_core::{
    AudioFormat, Error, ReplayGainInfo, Result, SampleFormat, Tag, TagBuilder, TagHandler, TagKind,
    MAX_CHANNELS,
};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions},
    meta::{MetadataOptions, MetadataRevision, StandardTagKey},
    probe::{Hint, ProbeResult},
    units::Time,
};
use tracing::{debug, error, warn};

use super::{DecoderClient, DecoderPlugin};
use crate::decoder_control::DecoderCommand;
use crate::input::InputStream;

const SUFFIXES: &[&str] = &[
    "mp3", "mp2", "flac", "ogg", "oga", "wav", "wave", "m4a", "mp4", "aac", "alac", "webm",
    "mka", "mkv", "aif", "aiff", "caf",
];

const MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/flac",
    "audio/x-flac",
    "audio/ogg",
    "audio/vorbis",
    "audio/wav",
    "audio/x-wav",
    "audio/mp4",
    "audio/aac",
    "audio/webm",
    "audio/x-matroska",
    "audio/aiff",
];

/// Decodes every container and codec symphonia supports. Output is always
/// 32 bit float at the track's rate and channel count.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub const fn new() -> Self {
        Self
    }
}

impl DecoderPlugin for SymphoniaDecoder {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn suffixes(&self) -> &[&str] {
        SUFFIXES
    }

    fn mime_types(&self) -> &[&str] {
        MIME_TYPES
    }

    /// Symphonia needs a seekable source, so the stream is read completely
    /// first.
    fn stream_decode(
        &self,
        client: &mut DecoderClient<'_>,
        input: &mut dyn InputStream,
    ) -> Result<()> {
        let mut data = Vec::with_capacity(input.size().unwrap_or(0) as usize);
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = client.read(input, &mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        if matches!(
            client.poll_command(),
            DecoderCommand::Start | DecoderCommand::Stop
        ) {
            return Ok(());
        }

        let mut hint = Hint::new();
        if let Some(mime) = input.mime() {
            hint.mime_type(mime);
        }
        decode(client, Box::new(Cursor::new(data)), &hint)
    }

    fn file_decode(&self, client: &mut DecoderClient<'_>, path: &Path) -> Result<()> {
        let file = File::open(path)
            .map_err(|e| Error::Source(format!("Failed to open {}: {e}", path.display())))?;
        decode(client, Box::new(file), &path_hint(path))
    }

    fn scan_tags(&self, path: &Path, handler: &mut dyn TagHandler) -> Result<bool> {
        let file = File::open(path)
            .map_err(|e| Error::Source(format!("Failed to open {}: {e}", path.display())))?;
        let mut probed = probe(Box::new(file), &path_hint(path))?;

        if let Some(track) = default_track(&*probed.format) {
            if let Some(seconds) = track_duration(&track.codec_params) {
                handler.on_duration(seconds);
            }
        }
        if let Some(rev) = probed.format.metadata().current() {
            visit_revision(rev, handler);
        } else if let Some(rev) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            visit_revision(rev, handler);
        }
        Ok(true)
    }
}

fn path_hint(path: &Path) -> Hint {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    hint
}

fn probe(source: Box<dyn MediaSource>, hint: &Hint) -> Result<ProbeResult> {
    let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());
    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };
    symphonia::default::get_probe()
        .format(hint, mss, &format_opts, &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe format: {e}")))
}

fn default_track(format: &dyn FormatReader) -> Option<&symphonia::core::formats::Track> {
    format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
}

fn track_duration(params: &CodecParameters) -> Option<f64> {
    let time_base = params.time_base?;
    let n_frames = params.n_frames?;
    let time = time_base.calc_time(n_frames);
    Some(time.seconds as f64 + time.frac)
}

/// Feed one metadata revision to a tag handler.
fn visit_revision(rev: &MetadataRevision, handler: &mut dyn TagHandler) {
    for tag in rev.tags() {
        let value = tag.value.to_string();
        let kind = match tag.std_key {
            Some(StandardTagKey::Artist) => Some(TagKind::Artist),
            Some(StandardTagKey::AlbumArtist) => Some(TagKind::AlbumArtist),
            Some(StandardTagKey::Album) => Some(TagKind::Album),
            Some(StandardTagKey::TrackTitle) => Some(TagKind::Title),
            Some(StandardTagKey::TrackNumber) => Some(TagKind::Track),
            Some(StandardTagKey::Genre) => Some(TagKind::Genre),
            Some(StandardTagKey::Date) => Some(TagKind::Date),
            Some(StandardTagKey::Composer) => Some(TagKind::Composer),
            Some(StandardTagKey::Performer) => Some(TagKind::Performer),
            Some(StandardTagKey::Comment) => Some(TagKind::Comment),
            Some(StandardTagKey::DiscNumber) => Some(TagKind::Disc),
            Some(StandardTagKey::ReplayGainTrackGain) => {
                handler.on_pair("replaygain_track_gain", &value);
                None
            }
            Some(StandardTagKey::ReplayGainTrackPeak) => {
                handler.on_pair("replaygain_track_peak", &value);
                None
            }
            Some(StandardTagKey::ReplayGainAlbumGain) => {
                handler.on_pair("replaygain_album_gain", &value);
                None
            }
            Some(StandardTagKey::ReplayGainAlbumPeak) => {
                handler.on_pair("replaygain_album_peak", &value);
                None
            }
            _ => {
                handler.on_pair(&tag.key, &value);
                None
            }
        };
        if let Some(kind) = kind {
            handler.on_tag(kind, &value);
        }
    }
}

fn revision_tag(rev: &MetadataRevision) -> (Tag, Option<ReplayGainInfo>) {
    let mut builder = TagBuilder::new();
    visit_revision(rev, &mut builder);
    builder.finish()
}

fn float_format(sample_rate: u32, channels: usize) -> Result<AudioFormat> {
    let channels = u8::try_from(channels)
        .ok()
        .filter(|&c| c <= MAX_CHANNELS)
        .ok_or_else(|| Error::UnsupportedFormat(format!("{channels} channels")))?;
    Ok(AudioFormat::new(sample_rate, SampleFormat::Float, channels)?)
}

fn decode(client: &mut DecoderClient<'_>, source: Box<dyn MediaSource>, hint: &Hint) -> Result<()> {
    let mut probed = probe(source, hint)?;

    let track = default_track(&*probed.format)
        .ok_or_else(|| Error::Decode("No audio tracks found".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| Error::Decode("Unknown sample rate".to_string()))?;
    let channels = params.channels.map_or(2, |c| c.count());
    let total_time = track_duration(&params);

    debug!("Audio track: id={track_id}, sample_rate={sample_rate}, channels={channels}");

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {e}")))?;

    let initial = probed
        .format
        .metadata()
        .current()
        .map(revision_tag)
        .or_else(|| {
            probed
                .metadata
                .get()
                .as_ref()
                .and_then(|m| m.current())
                .map(revision_tag)
        });
    if let Some((mut tag, replay_gain)) = initial {
        tag.duration = total_time;
        client.set_replay_gain(replay_gain);
        if !tag.is_empty() {
            client.attach_tag(tag);
        }
    }

    let mut format = probed.format;
    let mut audio_format = float_format(sample_rate, channels)?;
    client.report_ready(audio_format, true, total_time);

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut bytes: Vec<u8> = Vec::new();

    loop {
        match client.poll_command() {
            DecoderCommand::None => {}
            DecoderCommand::Seek => {
                let target = client.seek_target();
                let seek_to = SeekTo::Time {
                    time: Time::from(target),
                    track_id: Some(track_id),
                };
                match format.seek(SeekMode::Accurate, seek_to) {
                    Ok(_) => {
                        decoder.reset();
                        client.command_finished();
                    }
                    Err(e) => {
                        warn!("Seek to {target:.2}s failed: {e}");
                        client.report_seek_error();
                    }
                }
                continue;
            }
            DecoderCommand::Start | DecoderCommand::Stop => return Ok(()),
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(Error::Decode(format!("Failed to read packet: {e}"))),
        };

        // Metadata changed mid-stream (e.g. chained Ogg streams).
        let update = {
            let mut metadata = format.metadata();
            if metadata.is_latest() {
                None
            } else {
                metadata.skip_to_latest().map(revision_tag)
            }
        };
        if let Some((tag, replay_gain)) = update {
            if replay_gain.is_some() {
                client.set_replay_gain(replay_gain);
            }
            client.submit_tag(tag);
        }

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Log and skip corrupt frames
                error!("Decode error (skipping): {e}");
                continue;
            }
            Err(e) => return Err(Error::Decode(format!("Decode failed: {e}"))),
        };

        let spec = *decoded.spec();
        if spec.rate != audio_format.sample_rate()
            || spec.channels.count() != usize::from(audio_format.channels())
        {
            audio_format = float_format(spec.rate, spec.channels.count())?;
            client.report_ready(audio_format, true, total_time);
        }

        let needed = decoded.capacity() * spec.channels.count();
        if !matches!(&sample_buf, Some(b) if b.capacity() >= needed) {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        bytes.clear();
        for sample in buf.samples() {
            bytes.extend_from_slice(&sample.to_ne_bytes());
        }

        let bit_rate = if packet.dur > 0 {
            (packet.buf().len() as u64 * 8 * u64::from(spec.rate) / packet.dur / 1000)
                .min(u64::from(u16::MAX)) as u16
        } else {
            0
        };

        let command = client.emit_chunk(&bytes, bit_rate);
        if matches!(command, DecoderCommand::Start | DecoderCommand::Stop) {
            return Ok(());
        }
    }
    Ok(())
}
