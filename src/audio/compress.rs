//! Output formats and the external compression boundary
//!
//! WAV bytes from the framer are stored as-is or handed to an encoder.
//! FLAC encoding shells out to ffmpeg; voxconv carries no codec of its own.

use crate::config::EncoderConfig;
use crate::error::EncoderError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// File format of a stored recording
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFileFormat {
    #[default]
    Wav,
    Flac,
}

impl AudioFileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFileFormat::Wav => "wav",
            AudioFileFormat::Flac => "flac",
        }
    }

    /// Name used in conversion requests
    pub fn wire_name(self) -> &'static str {
        match self {
            AudioFileFormat::Wav => "WAV",
            AudioFileFormat::Flac => "FLAC",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFileFormat::Wav => "audio/wav",
            AudioFileFormat::Flac => "audio/flac",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Some(AudioFileFormat::Wav),
            "flac" => Some(AudioFileFormat::Flac),
            _ => None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl std::fmt::Display for AudioFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for AudioFileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim())
            .ok_or_else(|| format!("unknown audio format '{}' (expected wav or flac)", s))
    }
}

/// Turns a complete WAV file into another container
pub trait Compressor: Send + Sync {
    /// Encode `wav`. Failure is always an error, never a short buffer.
    fn compress(&self, wav: &[u8]) -> Result<Vec<u8>, EncoderError>;

    fn name(&self) -> &str;

    fn format(&self) -> AudioFileFormat;
}

/// FLAC encoding through an ffmpeg subprocess
#[derive(Debug, Clone)]
pub struct FfmpegCompressor {
    binary: PathBuf,
}

impl FfmpegCompressor {
    /// Use the configured ffmpeg, or the one on PATH
    pub fn new(config: &EncoderConfig) -> Result<Self, EncoderError> {
        let binary = match &config.ffmpeg_path {
            Some(path) if path.exists() => path.clone(),
            Some(path) => {
                return Err(EncoderError::Unavailable(format!(
                    "Configured ffmpeg path not found: {}",
                    path.display()
                )))
            }
            None => which::which("ffmpeg").map_err(|_| {
                EncoderError::Unavailable(
                    "ffmpeg not found. Install ffmpeg or set encoder.ffmpeg_path in config."
                        .to_string(),
                )
            })?,
        };

        tracing::debug!("Using ffmpeg at {}", binary.display());
        Ok(Self { binary })
    }

    /// Use a specific binary without checking that it exists
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Compressor for FfmpegCompressor {
    fn compress(&self, wav: &[u8]) -> Result<Vec<u8>, EncoderError> {
        let mut child = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "wav", "-i", "pipe:0"])
            .args(["-f", "flac", "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EncoderError::Unavailable(format!(
                    "Failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Failed("ffmpeg stdin not available".to_string()))?;

        // Feed stdin from a separate thread so a full stdout pipe cannot deadlock us
        let input = wav.to_vec();
        let writer = std::thread::spawn(move || {
            if let Err(e) = stdin.write_all(&input) {
                tracing::debug!("ffmpeg closed stdin early: {}", e);
            }
        });

        let output = child
            .wait_with_output()
            .map_err(|e| EncoderError::Failed(format!("Failed to wait for ffmpeg: {}", e)))?;
        let _ = writer.join();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncoderError::Failed(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(EncoderError::EmptyOutput);
        }

        tracing::debug!(
            "Compressed {} WAV bytes to {} FLAC bytes",
            wav.len(),
            output.stdout.len()
        );
        Ok(output.stdout)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn format(&self) -> AudioFileFormat {
        AudioFileFormat::Flac
    }
}

/// Build the compressor for `format`; WAV needs none
pub fn create_compressor(
    format: AudioFileFormat,
    config: &EncoderConfig,
) -> Result<Option<Box<dyn Compressor>>, EncoderError> {
    match format {
        AudioFileFormat::Wav => Ok(None),
        AudioFileFormat::Flac => Ok(Some(Box::new(FfmpegCompressor::new(config)?))),
    }
}
