//! Audio capture, framing and playback
//!
//! Samples come from a [`SampleSource`] (the microphone via cpal, or
//! anything else that yields 16-bit PCM), are framed as WAV by the capture
//! worker, and may be compressed before they reach the library.

pub mod compress;
pub mod cpal_capture;
pub mod framer;
pub mod player;
pub mod session;
pub mod worker;

pub use compress::{create_compressor, AudioFileFormat, Compressor, FfmpegCompressor};
pub use framer::{PcmFramer, RiffSizeConvention, WavSpec, HEADER_LEN};
pub use session::CaptureSession;
pub use worker::{CaptureHandle, CaptureOptions, CaptureWorker, FinishedCapture};

use crate::config::AudioConfig;
use crate::error::AudioError;

/// A blocking producer of interleaved 16-bit samples
pub trait SampleSource: Send {
    /// Fill up to `buf.len()` samples and return how many were written.
    /// `Ok(0)` means the source is exhausted.
    fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, AudioError>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;
}

/// Factory function to open the configured input device
pub fn create_source(config: &AudioConfig) -> Result<Box<dyn SampleSource>, AudioError> {
    Ok(Box::new(cpal_capture::CpalSource::open(config)?))
}
