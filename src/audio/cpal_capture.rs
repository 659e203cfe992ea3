//! cpal-backed sample source
//!
//! cpal::Stream is not Send, so the stream lives on its own thread and
//! forwards converted blocks over a bounded channel. The device is mixed to
//! mono and resampled to the configured rate before framing.

use super::SampleSource;
use crate::config::AudioConfig;
use crate::error::AudioError;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long `read_block` waits for the device before giving up
const READ_TIMEOUT_SECS: u32 = 2;

/// How long `open` waits for the stream thread to report in
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocks buffered between the stream callback and the reader
const CHANNEL_DEPTH: usize = 64;

/// An input device as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub name: String,
    pub is_default: bool,
}

/// List input devices on the default host
pub fn list_input_devices() -> Result<Vec<InputDevice>, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .map(|name| InputDevice {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect();

    Ok(devices)
}

/// Find an input device by name.
///
/// Tries an exact match, then a case-insensitive match, then a
/// case-insensitive substring match, so "analog-stereo" finds
/// "alsa_input.pci-0000_00_1f.3.analog-stereo".
fn find_audio_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let mut devices: Vec<(String, cpal::Device)> = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?
        .filter_map(|d| d.name().ok().map(|name| (name, d)))
        .collect();

    let best = devices
        .iter()
        .enumerate()
        .filter_map(|(index, (name, _))| match_rank(name, device_name).map(|rank| (rank, index)))
        .min();

    if let Some((rank, index)) = best {
        let (name, device) = devices.swap_remove(index);
        tracing::debug!(
            "Found audio device by {} match: {} (searched for: {})",
            ["exact", "case-insensitive", "substring"][rank as usize],
            name,
            device_name
        );
        return Ok(device);
    }

    let available = if devices.is_empty() {
        "No audio input devices found.".to_string()
    } else {
        format!(
            "Available devices:\n{}",
            devices
                .iter()
                .map(|(name, _)| format!("  - {}", name))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    Err(AudioError::DeviceNotFoundWithList {
        requested: device_name.to_string(),
        available,
    })
}

/// 0 for an exact match, 1 ignoring case, 2 for a substring
fn match_rank(name: &str, wanted: &str) -> Option<u8> {
    if name == wanted {
        Some(0)
    } else if name.to_lowercase() == wanted.to_lowercase() {
        Some(1)
    } else if name.to_lowercase().contains(&wanted.to_lowercase()) {
        Some(2)
    } else {
        None
    }
}

/// Microphone input as mono i16 blocks at the configured rate
pub struct CpalSource {
    blocks: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    sample_rate: u32,
    device_name: String,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSource {
    /// Open the configured device and start streaming
    pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = if config.device == "default" {
            host.default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()))?
        } else {
            find_audio_device(&host, &config.device)?
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Using audio device: {}", device_name);

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::Connection(e.to_string()))?;

        let sample_format = supported.sample_format();
        let stream_config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let conversion = Conversion {
            source_rate: supported.sample_rate().0,
            target_rate: config.sample_rate,
            source_channels: supported.channels().max(1) as usize,
        };

        tracing::debug!(
            "Device config: {} Hz, {} channel(s), format: {:?}; capturing at {} Hz mono",
            conversion.source_rate,
            conversion.source_channels,
            sample_format,
            conversion.target_rate
        );

        let (block_tx, block_rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread = thread::Builder::new()
            .name("voxconv-cpal".to_string())
            .spawn(move || {
                let err_fn = |err| tracing::error!("Audio stream error: {}", err);

                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &stream_config, conversion, block_tx, err_fn)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &stream_config, conversion, block_tx, err_fn)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&device, &stream_config, conversion, block_tx, err_fn)
                    }
                    format => Err(AudioError::StreamError(format!(
                        "Unsupported sample format: {:?}",
                        format
                    ))),
                };

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                tracing::debug!("Audio stream thread started");

                // Runs until a stop is sent or the source is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("Audio stream thread stopped");
            })
            .map_err(|e| AudioError::StreamError(format!("Failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = stop_tx.send(());
                return Err(AudioError::Connection(
                    "Audio stream did not start".to_string(),
                ));
            }
        }

        Ok(Self {
            blocks: block_rx,
            pending: VecDeque::new(),
            sample_rate: config.sample_rate,
            device_name,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl SampleSource for CpalSource {
    fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            match self
                .blocks
                .recv_timeout(Duration::from_secs(READ_TIMEOUT_SECS as u64))
            {
                Ok(block) => self.pending.extend(block),
                Err(RecvTimeoutError::Timeout) => return Err(AudioError::Timeout(READ_TIMEOUT_SECS)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::StreamError("Audio stream closed".to_string()))
                }
            }
        }
        // Pick up whatever else has already arrived without waiting
        while self.pending.len() < buf.len() {
            match self.blocks.try_recv() {
                Ok(block) => self.pending.extend(block),
                Err(_) => break,
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        1
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Device format to capture format
#[derive(Debug, Clone, Copy)]
struct Conversion {
    source_rate: u32,
    target_rate: u32,
    source_channels: usize,
}

/// Build an input stream for a specific sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    conversion: Conversion,
    tx: SyncSender<Vec<i16>>,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    let Conversion {
        source_rate,
        target_rate,
        source_channels,
    } = conversion;

    let mut resampler = Resampler::new(source_rate, target_rate);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(source_channels)
                    .map(|frame| {
                        let sum: f32 = frame
                            .iter()
                            .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                            .sum();
                        sum / source_channels as f32
                    })
                    .collect();

                let block = to_i16(&resampler.process(&mono));

                if let Err(TrySendError::Full(block)) = tx.try_send(block) {
                    tracing::warn!(
                        "Capture reader stalled, dropped {} samples of audio",
                        block.len()
                    );
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Scale [-1.0, 1.0] floats to 16-bit PCM
fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
        .collect()
}

/// Linear interpolation resampler that keeps its phase across callbacks
///
/// Output positions are tracked relative to the start of the next input
/// block, so block boundaries neither add samples nor break interpolation.
#[derive(Debug, Clone)]
struct Resampler {
    /// Input samples per output sample
    step: f64,
    /// Position of the next output sample; -1.0..0.0 refers to `last`
    pos: f64,
    /// Final sample of the previous block
    last: f32,
}

impl Resampler {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate.max(1) as f64,
            pos: 0.0,
            last: 0.0,
        }
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.step == 1.0 || input.is_empty() {
            return input.to_vec();
        }

        let last = self.last;
        let at = |i: isize| if i < 0 { last } else { input[i as usize] };
        let end = (input.len() - 1) as f64;
        let mut out = Vec::with_capacity((input.len() as f64 / self.step).ceil() as usize + 1);

        let mut pos = self.pos;
        while pos < end {
            let idx = pos.floor();
            let frac = (pos - idx) as f32;
            let idx = idx as isize;
            out.push(at(idx) * (1.0 - frac) + at(idx + 1) * frac);
            pos += self.step;
        }

        self.pos = pos - input.len() as f64;
        self.last = input[input.len() - 1];
        out
    }
}
