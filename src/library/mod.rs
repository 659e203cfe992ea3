//! Recordings library
//!
//! Original microphone captures and the voice-converted copies received
//! from the conversion service, kept as plain audio files under one
//! directory per speaker class with a SQLite index beside them.

pub mod storage;

pub use storage::RecordingLibrary;

use crate::audio::AudioFileFormat;
use crate::error::StorageError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

/// Storage format for `recorded_at`
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Timestamp format used in generated filenames
pub const FILE_DATETIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Whose voice a recording carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeakerClass {
    /// Captured from the microphone
    #[serde(rename = "original")]
    Original,
    A,
    B,
    C,
}

impl SpeakerClass {
    pub const ALL: [SpeakerClass; 4] = [
        SpeakerClass::Original,
        SpeakerClass::A,
        SpeakerClass::B,
        SpeakerClass::C,
    ];

    /// Classes a recording can be converted into
    pub fn targets() -> &'static [SpeakerClass] {
        &Self::ALL[1..]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpeakerClass::Original => "original",
            SpeakerClass::A => "A",
            SpeakerClass::B => "B",
            SpeakerClass::C => "C",
        }
    }

    pub fn is_original(self) -> bool {
        self == SpeakerClass::Original
    }
}

impl std::fmt::Display for SpeakerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SpeakerClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "unknown speaker class '{}' (expected one of: original, A, B, C)",
                    s
                )
            })
    }
}

/// One entry in the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recording {
    pub id: i64,
    pub recorded_at: NaiveDateTime,
    pub speaker_class: SpeakerClass,
    pub filename: String,
}

impl Recording {
    /// Audio format, judged by file extension
    pub fn format(&self) -> Option<AudioFileFormat> {
        AudioFileFormat::from_path(&self.filename)
    }

    /// Human-friendly timestamp for listings
    pub fn readable_time(&self) -> String {
        self.recorded_at.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Playback length of an in-memory WAV file
pub fn wav_duration(bytes: &[u8]) -> Result<Duration, StorageError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return Err(StorageError::Corrupt("WAV header has a zero sample rate".to_string()));
    }
    Ok(Duration::from_secs_f64(reader.duration() as f64 / rate as f64))
}
