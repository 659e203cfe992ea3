//! WAV framing for captured PCM
//!
//! Builds the canonical 44-byte RIFF/WAVE header up front with zeroed size
//! fields, appends 16-bit samples as they arrive, and patches the two size
//! fields in place once capture stops.
//!
//! ```text
//!  0  "RIFF"           20  format (1)       36  "data"
//!  4  total size  *    22  channels         40  payload size  *
//!  8  "WAVE"           24  sample rate      44  payload ...
//! 12  "fmt "           28  byte rate
//! 16  fmt size (16)    32  block align
//!                      34  bits per sample
//! ```
//! Fields marked `*` are zero until [`PcmFramer::finalize`].

use crate::error::FramerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of the canonical PCM WAV header
pub const HEADER_LEN: usize = 44;

const TOTAL_SIZE_OFFSET: usize = 4;
const DATA_SIZE_OFFSET: usize = 40;
const FMT_CHUNK_SIZE: u32 = 16;
const FORMAT_PCM: u16 = 1;

/// What the RIFF total-size field (bytes 4..8) counts
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiffSizeConvention {
    /// Whole file length, header included (44 + payload)
    #[default]
    FileLength,
    /// Standard RIFF chunk size: everything after the size field (36 + payload)
    Riff,
}

impl RiffSizeConvention {
    fn total_size(self, payload_len: u64) -> u64 {
        match self {
            RiffSizeConvention::FileLength => HEADER_LEN as u64 + payload_len,
            RiffSizeConvention::Riff => HEADER_LEN as u64 - 8 + payload_len,
        }
    }
}

/// Container parameters fixed at the start of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub riff_size: RiffSizeConvention,
}

impl WavSpec {
    /// Mono, 16-bit linear PCM
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            riff_size: RiffSizeConvention::default(),
        }
    }

    pub fn validate(&self) -> Result<(), FramerError> {
        if self.channels == 0 {
            return Err(FramerError::InvalidSpec(
                "channel count must be at least 1".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(FramerError::InvalidSpec(
                "sample rate must be greater than zero".into(),
            ));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 || self.bits_per_sample > 32 {
            return Err(FramerError::InvalidSpec(format!(
                "bits per sample must be 8, 16, 24 or 32, got {}",
                self.bits_per_sample
            )));
        }
        if u16::try_from(self.block_align_wide()).is_err() {
            return Err(FramerError::InvalidSpec(format!(
                "{} channels do not fit the block-align field",
                self.channels
            )));
        }
        if u32::try_from(self.byte_rate_wide()).is_err() {
            return Err(FramerError::InvalidSpec(format!(
                "byte rate for {} Hz x {} channels overflows the header",
                self.sample_rate, self.channels
            )));
        }
        Ok(())
    }

    fn block_align_wide(&self) -> u32 {
        self.channels as u32 * (self.bits_per_sample as u32 / 8)
    }

    fn byte_rate_wide(&self) -> u64 {
        self.sample_rate as u64 * self.block_align_wide() as u64
    }

    /// Bytes per frame (all channels of one sample instant)
    pub fn block_align(&self) -> u16 {
        self.block_align_wide() as u16
    }

    /// Payload bytes per second of playback
    pub fn byte_rate(&self) -> u32 {
        self.byte_rate_wide() as u32
    }

    /// Header with both size fields zeroed
    pub fn header(&self) -> Result<[u8; HEADER_LEN], FramerError> {
        self.validate()?;

        let mut header = [0u8; HEADER_LEN];
        put(&mut header, 0, b"RIFF");
        put(&mut header, TOTAL_SIZE_OFFSET, &0u32.to_le_bytes());
        put(&mut header, 8, b"WAVE");
        put(&mut header, 12, b"fmt ");
        put(&mut header, 16, &FMT_CHUNK_SIZE.to_le_bytes());
        put(&mut header, 20, &FORMAT_PCM.to_le_bytes());
        put(&mut header, 22, &self.channels.to_le_bytes());
        put(&mut header, 24, &self.sample_rate.to_le_bytes());
        put(&mut header, 28, &self.byte_rate().to_le_bytes());
        put(&mut header, 32, &self.block_align().to_le_bytes());
        put(&mut header, 34, &self.bits_per_sample.to_le_bytes());
        put(&mut header, 36, b"data");
        put(&mut header, DATA_SIZE_OFFSET, &0u32.to_le_bytes());
        Ok(header)
    }
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// An in-progress capture: header followed by the payload gathered so far
///
/// `finalize` consumes the framer, so appending after finalize (or
/// finalizing twice) does not compile.
#[derive(Debug)]
pub struct PcmFramer {
    spec: WavSpec,
    buffer: Vec<u8>,
}

impl PcmFramer {
    /// Start a capture. Invalid parameters are rejected before any byte is
    /// produced.
    pub fn begin(spec: WavSpec) -> Result<Self, FramerError> {
        let header = spec.header()?;
        let mut buffer = Vec::with_capacity(HEADER_LEN + spec.byte_rate() as usize);
        buffer.extend_from_slice(&header);
        Ok(Self { spec, buffer })
    }

    pub fn spec(&self) -> &WavSpec {
        &self.spec
    }

    /// Append one block of samples, low byte first, in order
    pub fn append_samples(&mut self, block: &[i16]) -> Result<(), FramerError> {
        if self.spec.bits_per_sample != 16 {
            return Err(FramerError::SampleWidth {
                actual: self.spec.bits_per_sample,
            });
        }

        self.buffer.reserve(block.len() * 2);
        for &sample in block {
            // [sample & 0xFF, (sample >> 8) & 0xFF]
            self.buffer.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    pub fn payload_len(&self) -> usize {
        self.buffer.len() - HEADER_LEN
    }

    /// Samples appended so far, across all channels
    pub fn sample_count(&self) -> u64 {
        (self.payload_len() / (self.spec.bits_per_sample as usize / 8)) as u64
    }

    /// Playback length of the payload gathered so far
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.payload_len() as f64 / self.spec.byte_rate() as f64)
    }

    /// Patch both size fields and hand back header and payload
    pub fn finalize(mut self) -> Result<Vec<u8>, FramerError> {
        let payload_len = self.payload_len() as u64;
        let total_size = self.spec.riff_size.total_size(payload_len);

        let total_field = u32::try_from(total_size).map_err(|_| FramerError::TooLarge(payload_len))?;
        let data_field = u32::try_from(payload_len).map_err(|_| FramerError::TooLarge(payload_len))?;

        put(&mut self.buffer, TOTAL_SIZE_OFFSET, &total_field.to_le_bytes());
        put(&mut self.buffer, DATA_SIZE_OFFSET, &data_field.to_le_bytes());

        tracing::trace!(
            "Finalized WAV: {} payload bytes, total-size field {}",
            payload_len,
            total_field
        );

        Ok(self.buffer)
    }
}
