//! Raw 16 bit PCM decoder.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::Path;

use reel_core::{AudioFormat, Result, TagHandler};
use tracing::{debug, warn};

use super::{DecoderClient, DecoderPlugin};
use crate::decoder_control::DecoderCommand;
use crate::input::{FileInput, InputStream};

const READ_SIZE: usize = 4096;

/// CD audio bit rate in kbit/s.
const CD_BIT_RATE: u16 = 1411;

/// Headerless 44.1 kHz stereo 16 bit audio.
///
/// Little-endian by default; streams announced as `audio/L16` are
/// big-endian. Seeking is by byte offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmDecoder;

impl PcmDecoder {
    pub const fn new() -> Self {
        Self
    }
}

fn to_native(data: &mut [u8], big_endian: bool) {
    for sample in data.chunks_exact_mut(2) {
        let bytes = [sample[0], sample[1]];
        let value = if big_endian {
            i16::from_be_bytes(bytes)
        } else {
            i16::from_le_bytes(bytes)
        };
        sample.copy_from_slice(&value.to_ne_bytes());
    }
}

impl DecoderPlugin for PcmDecoder {
    fn name(&self) -> &str {
        "pcm"
    }

    fn suffixes(&self) -> &[&str] {
        &["pcm", "raw", "cdda"]
    }

    fn mime_types(&self) -> &[&str] {
        &["audio/L16", "audio/x-pcm"]
    }

    fn stream_decode(
        &self,
        client: &mut DecoderClient<'_>,
        input: &mut dyn InputStream,
    ) -> Result<()> {
        let format = AudioFormat::cd();
        let frame_size = format.frame_size();
        let big_endian = input
            .mime()
            .is_some_and(|m| m.to_ascii_lowercase().starts_with("audio/l16"));
        let total_time = input.size().map(|size| format.duration_of(size as usize));

        client.report_ready(format, input.seekable(), total_time);

        let mut buffer = vec![0u8; READ_SIZE];
        let mut carried = 0;
        loop {
            match client.poll_command() {
                DecoderCommand::None => {}
                DecoderCommand::Seek => {
                    let frame = (client.seek_target() * f64::from(format.sample_rate())) as u64;
                    match input.seek(frame * frame_size as u64) {
                        Ok(()) => {
                            carried = 0;
                            client.command_finished();
                        }
                        Err(e) => {
                            warn!("PCM seek failed: {e}");
                            client.report_seek_error();
                        }
                    }
                    continue;
                }
                DecoderCommand::Start | DecoderCommand::Stop => return Ok(()),
            }

            let n = client.read(input, &mut buffer[carried..])?;
            if n == 0 {
                if client.poll_command() == DecoderCommand::None {
                    break;
                }
                continue;
            }

            let len = carried + n;
            let whole = len - len % frame_size;
            to_native(&mut buffer[..whole], big_endian);
            let command = client.emit_chunk(&buffer[..whole], CD_BIT_RATE);
            buffer.copy_within(whole..len, 0);
            carried = len - whole;

            if matches!(command, DecoderCommand::Start | DecoderCommand::Stop) {
                return Ok(());
            }
        }

        if carried > 0 {
            debug!("Ignoring {carried} trailing bytes");
        }
        Ok(())
    }

    fn scan_tags(&self, path: &Path, handler: &mut dyn TagHandler) -> Result<bool> {
        let input = FileInput::open(path)?;
        if let Some(size) = input.size() {
            handler.on_duration(AudioFormat::cd().duration_of(size as usize));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::TagKind;

    #[test]
    fn test_to_native() {
        let mut le = vec![0x34, 0x12];
        to_native(&mut le, false);
        assert_eq!(i16::from_ne_bytes([le[0], le[1]]), 0x1234);

        let mut be = vec![0x12, 0x34];
        to_native(&mut be, true);
        assert_eq!(i16::from_ne_bytes([be[0], be[1]]), 0x1234);
    }

    #[test]
    fn test_tag_probe_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one-second.pcm");
        std::fs::write(&path, vec![0u8; 176_400]).unwrap();

        let tag = PcmDecoder::new().tag_probe(&path).unwrap();
        assert_eq!(tag.duration, Some(1.0));
        assert_eq!(tag.get(TagKind::Title), None);
    }
}
