//! Voice conversion
//!
//! Recordings are converted by a remote service: the complete audio file
//! goes up as JSON together with the wanted speaker class, and the converted
//! file comes back in the same shape.

pub mod remote;

pub use remote::RemoteConverter;

use crate::audio::AudioFileFormat;
use crate::error::ConversionError;
use crate::library::SpeakerClass;
use serde::{Deserialize, Serialize};

/// JSON body exchanged with the conversion service, in both directions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    /// Speaker class name ("A", "B", "C")
    pub target_speaker: String,
    /// "WAV" or "FLAC"
    pub audio_format: String,
    /// Sample rate of the source audio in Hz
    pub sample_rate: u32,
    /// Complete audio file, headers included
    pub audio_data: Vec<u8>,
}

/// The service answers with the same structure it was sent
pub type ConversionResponse = ConversionRequest;

impl ConversionRequest {
    pub fn new(
        target: SpeakerClass,
        format: AudioFileFormat,
        sample_rate: u32,
        audio_data: Vec<u8>,
    ) -> Self {
        Self {
            target_speaker: target.to_string(),
            audio_format: format.wire_name().to_string(),
            sample_rate,
            audio_data,
        }
    }

    /// Validate a response against the class that was asked for
    pub fn into_audio(self, expected: SpeakerClass) -> Result<ConvertedAudio, ConversionError> {
        if self.audio_data.is_empty() {
            return Err(ConversionError::BadResponse(
                "response carries no audio data".to_string(),
            ));
        }

        let speaker: SpeakerClass = self
            .target_speaker
            .parse()
            .map_err(ConversionError::BadResponse)?;
        if speaker.is_original() {
            return Err(ConversionError::BadResponse(
                "response is labelled as an original recording".to_string(),
            ));
        }
        if speaker != expected {
            return Err(ConversionError::BadResponse(format!(
                "asked for speaker {} but received {}",
                expected, speaker
            )));
        }

        let format = AudioFileFormat::from_extension(&self.audio_format).ok_or_else(|| {
            ConversionError::BadResponse(format!("unknown audio format '{}'", self.audio_format))
        })?;

        Ok(ConvertedAudio {
            speaker,
            format,
            sample_rate: self.sample_rate,
            audio: self.audio_data,
        })
    }
}

/// A validated conversion result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedAudio {
    pub speaker: SpeakerClass,
    pub format: AudioFileFormat,
    pub sample_rate: u32,
    pub audio: Vec<u8>,
}

/// Anything that can turn a recording into another speaker's voice
pub trait Converter: Send + Sync {
    fn convert(&self, request: &ConversionRequest) -> Result<ConversionResponse, ConversionError>;
}
