//! Error types for voxconv
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the voxconv application
#[derive(Error, Debug)]
pub enum VoxconvError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WAV framing error: {0}")]
    Framer(#[from] FramerError),

    #[error("Audio capture error: {0}")]
    Audio(#[from] AudioError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Library error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Invalid operation: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building a WAV container around captured PCM
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramerError {
    #[error("Invalid capture parameters: {0}")]
    InvalidSpec(String),

    #[error("Cannot {operation} while capture is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Samples are 16-bit but the container declares {actual} bits per sample")]
    SampleWidth { actual: u16 },

    #[error("Payload of {0} bytes does not fit a 32-bit WAV size field")]
    TooLarge(u64),
}

/// Errors related to audio capture
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio device not found: '{0}'. List devices with: voxconv devices")]
    DeviceNotFound(String),

    #[error("Audio device not found: '{requested}'\n{available}")]
    DeviceNotFoundWithList { requested: String, available: String },

    #[error("No audio received from the device for {0} seconds")]
    Timeout(u32),

    #[error("No audio was captured. Check your microphone.")]
    EmptyRecording,

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Source delivers {source_rate} Hz / {source_channels} ch but capture expects {rate} Hz / {channels} ch")]
    FormatMismatch {
        source_rate: u32,
        source_channels: u16,
        rate: u32,
        channels: u16,
    },

    #[error("Capture thread panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Framer(#[from] FramerError),

    #[error("Playback error: {0}")]
    Playback(String),
}

/// Errors from the external compression boundary
///
/// An encoder failure is never reported as an empty or truncated buffer.
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Encoder unavailable: {0}")]
    Unavailable(String),

    #[error("Encoding failed: {0}")]
    Failed(String),

    #[error("Encoder produced no output")]
    EmptyOutput,
}

/// Errors related to the recordings library
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No recording with id {0}")]
    NotFound(i64),

    #[error("A recording named '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid recording name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Corrupt library entry: {0}")]
    Corrupt(String),

    #[error("Cannot read WAV data: {0}")]
    Wav(#[from] hound::Error),
}

/// Errors from the remote voice-conversion service
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Bad response from server: {0}")]
    BadResponse(String),
}

/// Result type alias using VoxconvError
pub type Result<T> = std::result::Result<T, VoxconvError>;
