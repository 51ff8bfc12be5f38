//! Host audio backend using cpal
//!
//! Opens an output stream at the device's sample rate in stereo and feeds it
//! from a [`MonitorSink`]. Each callback asks the sink for exactly the bytes
//! the host wants, as signed 16-bit little-endian PCM, then converts to the
//! stream's native sample format.

use crate::config::{BYTES_PER_SAMPLE, CHANNELS};
use crate::error::{Error, Result};
use crate::pipeline::sink::MonitorSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Output stream driving the drain side of the FIFO
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl AudioOutput {
    /// Names of the available output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device
    ///
    /// A named device that cannot be found falls back to the default device.
    /// `buffer_frames` requests a fixed host buffer of that many sample frames.
    pub fn open(device_name: Option<&str>, sample_rate: u32, buffer_frames: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };

        let (mut config, sample_format) = Self::get_best_config(&device, sample_rate)?;
        config.buffer_size = cpal::BufferSize::Fixed(buffer_frames);

        info!(
            "Audio device {}: {} Hz, {} channels, {:?}, buffer {} frames",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format,
            buffer_frames
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Stereo at `sample_rate`, preferring formats that need the least conversion
    fn get_best_config(device: &Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .filter(|c| {
                c.channels() as usize == CHANNELS
                    && c.min_sample_rate().0 <= sample_rate
                    && c.max_sample_rate().0 >= sample_rate
            })
            .collect();

        for format in [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16] {
            if let Some(c) = supported.iter().find(|c| c.sample_format() == format) {
                let config = c.clone().with_sample_rate(cpal::SampleRate(sample_rate)).config();
                return Ok((config, format));
            }
        }

        Err(Error::AudioOutput(format!(
            "Device has no stereo output configuration at {} Hz",
            sample_rate
        )))
    }

    /// Start the stream, draining from `sink`
    pub fn start(&mut self, sink: MonitorSink) -> Result<()> {
        let stream = match self.sample_format {
            SampleFormat::I16 => self.build_stream::<i16>(sink)?,
            SampleFormat::F32 => self.build_stream::<f32>(sink)?,
            SampleFormat::U16 => self.build_stream::<u16>(sink)?,
            sample_format => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);

        info!("Audio stream started");
        Ok(())
    }

    fn build_stream<T>(&self, sink: MonitorSink) -> Result<Stream>
    where
        T: SizedSample + FromSample<i16> + Send + 'static,
    {
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);
        let mut scratch = vec![0u8; self.buffer_bytes()];

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let needed = data.len() * BYTES_PER_SAMPLE;
                    if scratch.len() < needed {
                        scratch.resize(needed, 0);
                    }
                    let pcm = &mut scratch[..needed];
                    sink.fill(pcm);
                    write_pcm(data, pcm);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
        }
        Ok(())
    }

    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "Unknown".to_string())
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Host buffer size in sample frames
    pub fn buffer_frames(&self) -> Option<u32> {
        match self.config.buffer_size {
            cpal::BufferSize::Fixed(size) => Some(size),
            cpal::BufferSize::Default => None,
        }
    }

    /// Host buffer size in bytes of 16-bit stereo PCM
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_frames().unwrap_or(0) as usize * CHANNELS * BYTES_PER_SAMPLE
    }

    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Convert little-endian i16 PCM into the stream's sample type
pub(crate) fn write_pcm<T>(dst: &mut [T], pcm: &[u8])
where
    T: SizedSample + FromSample<i16>,
{
    for (out, bytes) in dst.iter_mut().zip(pcm.chunks_exact(BYTES_PER_SAMPLE)) {
        *out = T::from_sample(i16::from_le_bytes([bytes[0], bytes[1]]));
    }
}
