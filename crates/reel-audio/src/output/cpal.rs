//! Sound card output using cpal.

use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat as CpalSampleFormat, Stream, StreamConfig,
};
use reel_core::{AudioFormat, Error, Result, SampleFormat, MAX_CHANNELS};
use tracing::{debug, error, info, trace};

use super::OutputPlugin;
use crate::buffer::{sample_ring, SampleReader, SampleWriter};
use crate::config::OutputConfig;
use crate::pcm::sample;

/// Seconds of audio buffered between the player and the device callback.
const BUFFER_SECONDS: f64 = 0.5;

/// How long `play` waits for the device to drain before giving up.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Plays through a cpal device (the default one unless `device` names
/// another). The device's own mix format is used; the pipeline converts to
/// it.
pub struct CpalOutput {
    name: String,
    device_name: Option<String>,
    stream: Option<Stream>,
    writer: Option<SampleWriter>,
    samples: Vec<f32>,
}

impl CpalOutput {
    pub fn new(name: impl Into<String>, device_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            device_name,
            stream: None,
            writer: None,
            samples: Vec::new(),
        }
    }

    /// Options: `device` (output device name, default device otherwise).
    pub fn from_config(config: &OutputConfig) -> Result<Self> {
        Ok(Self::new(
            config.name.clone(),
            config.option("device").map(str::to_string),
        ))
    }

    fn find_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Output("No output device found".to_string())),
            Some(wanted) => host
                .output_devices()
                .map_err(|e| Error::Output(format!("Failed to list devices: {e}")))?
                .find(|d| d.name().is_ok_and(|n| &n == wanted))
                .ok_or_else(|| Error::Output(format!("Output device {wanted:?} not found"))),
        }
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        mut reader: SampleReader,
    ) -> Result<Stream> {
        let mut temp_buffer: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if temp_buffer.len() < data.len() {
                        temp_buffer.resize(data.len(), 0.0);
                    }
                    let samples_read = reader.read(&mut temp_buffer[..data.len()]);

                    for (i, sample) in data.iter_mut().enumerate() {
                        if i < samples_read {
                            let s = temp_buffer[i];
                            // Soft clipping using tanh for smooth limiting
                            let limited = if s.abs() > 0.9 { s.tanh() } else { s };
                            *sample = T::from_sample(limited);
                        } else {
                            *sample = T::from_sample(0.0f32);
                        }
                    }

                    if samples_read < data.len() && samples_read > 0 {
                        trace!("Device underrun: needed {}, got {samples_read}", data.len());
                    }
                },
                |err| error!("Audio stream error: {err}"),
                None,
            )
            .map_err(|e| Error::Output(format!("Failed to build stream: {e}")))
    }
}

impl OutputPlugin for CpalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, _format: AudioFormat) -> Result<AudioFormat> {
        let device = self.find_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let supported = device
            .default_output_config()
            .map_err(|e| Error::Output(format!("Failed to get output config: {e}")))?;
        debug!("Supported output config: {supported:?}");

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let channels = config.channels.min(u16::from(MAX_CHANNELS)) as u8;
        let actual = AudioFormat::new(config.sample_rate.0, SampleFormat::Float, channels)?;
        let config = StreamConfig {
            channels: u16::from(channels),
            ..config
        };

        let capacity = (f64::from(actual.sample_rate()) * BUFFER_SECONDS) as usize
            * usize::from(channels);
        let (writer, reader) = sample_ring(capacity);

        let stream = match sample_format {
            CpalSampleFormat::F32 => Self::build_stream::<f32>(&device, &config, reader)?,
            CpalSampleFormat::I16 => Self::build_stream::<i16>(&device, &config, reader)?,
            CpalSampleFormat::U16 => Self::build_stream::<u16>(&device, &config, reader)?,
            other => {
                return Err(Error::Output(format!("Unsupported sample format: {other:?}")));
            }
        };
        stream
            .play()
            .map_err(|e| Error::Output(format!("Failed to start stream: {e}")))?;

        self.stream = Some(stream);
        self.writer = Some(writer);
        Ok(actual)
    }

    fn play(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Output(format!("{} is not open", self.name)))?;

        self.samples.clear();
        sample::decode(SampleFormat::Float, data, &mut self.samples)?;

        let mut offset = 0;
        let mut last_progress = Instant::now();
        while offset < self.samples.len() {
            let written = writer.write(&self.samples[offset..]);
            if written > 0 {
                offset += written;
                last_progress = Instant::now();
                continue;
            }
            if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(Error::Output(format!("{}: device stopped consuming", self.name)));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(writer) = &self.writer {
            writer.request_clear();
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.writer = None;
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| Error::Output(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(devices)
}
