//! Runtime-checked capture session
//!
//! Wraps [`PcmFramer`] in an enum for callers that keep a session alive
//! across calls and cannot rely on the framer being consumed. Out-of-order
//! calls fail with [`FramerError::InvalidState`] and never produce bytes.

use super::framer::{PcmFramer, WavSpec};
use crate::error::FramerError;

#[derive(Debug, Default)]
pub enum CaptureSession {
    #[default]
    Idle,
    Capturing(PcmFramer),
    Finalized,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            CaptureSession::Idle => "idle",
            CaptureSession::Capturing(_) => "capturing",
            CaptureSession::Finalized => "finalized",
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, CaptureSession::Capturing(_))
    }

    /// Start a capture. Allowed from Idle and from Finalized (a fresh capture).
    pub fn begin(&mut self, spec: WavSpec) -> Result<(), FramerError> {
        if self.is_capturing() {
            return Err(self.invalid("begin"));
        }
        *self = CaptureSession::Capturing(PcmFramer::begin(spec)?);
        Ok(())
    }

    pub fn append_samples(&mut self, block: &[i16]) -> Result<(), FramerError> {
        match self {
            CaptureSession::Capturing(framer) => framer.append_samples(block),
            _ => Err(self.invalid("append samples")),
        }
    }

    /// Finish the capture and return the complete WAV bytes
    pub fn finalize(&mut self) -> Result<Vec<u8>, FramerError> {
        match std::mem::replace(self, CaptureSession::Finalized) {
            CaptureSession::Capturing(framer) => framer.finalize(),
            previous => {
                *self = previous;
                Err(self.invalid("finalize"))
            }
        }
    }

    fn invalid(&self, operation: &'static str) -> FramerError {
        FramerError::InvalidState {
            operation,
            state: self.state_name(),
        }
    }
}
