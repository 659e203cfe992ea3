//! Playback of library recordings through rodio

use super::compress::AudioFileFormat;
use crate::error::AudioError;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Plays one file at a time on the default output device
pub struct Player {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    sink: Option<Sink>,
    loaded: Option<PathBuf>,
    length: Option<Duration>,
}

impl Player {
    /// Open the default output device
    pub fn new() -> Result<Self, AudioError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| AudioError::Playback(format!("Failed to open audio output: {}", e)))?;

        Ok(Self {
            _stream: stream,
            stream_handle,
            sink: None,
            loaded: None,
            length: None,
        })
    }

    /// Load a file, paused at the start
    pub fn load(&mut self, path: &Path) -> Result<(), AudioError> {
        let data = std::fs::read(path).map_err(|e| {
            AudioError::Playback(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let source = Decoder::new(Cursor::new(data))
            .map_err(|e| AudioError::Playback(format!("Failed to decode audio: {}", e)))?;

        let length = source.total_duration();
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| AudioError::Playback(format!("Failed to create audio sink: {}", e)))?;
        sink.pause();
        sink.append(source);

        if let Some(old) = self.sink.replace(sink) {
            old.stop();
        }
        self.loaded = Some(path.to_path_buf());
        self.length = length;

        tracing::debug!("Loaded {} ({:?})", path.display(), length);
        Ok(())
    }

    fn sink(&self) -> Result<&Sink, AudioError> {
        self.sink
            .as_ref()
            .ok_or_else(|| AudioError::Playback("Nothing loaded".to_string()))
    }

    pub fn play(&self) -> Result<(), AudioError> {
        self.sink()?.play();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), AudioError> {
        self.sink()?.pause();
        Ok(())
    }

    /// Stop and reload the current file at position zero
    pub fn reset(&mut self) -> Result<(), AudioError> {
        let path = self
            .loaded
            .clone()
            .ok_or_else(|| AudioError::Playback("Nothing loaded".to_string()))?;
        self.load(&path)
    }

    pub fn seek(&self, position_ms: u64) -> Result<(), AudioError> {
        self.sink()?
            .try_seek(Duration::from_millis(position_ms))
            .map_err(|e| AudioError::Playback(format!("Seek failed: {}", e)))
    }

    pub fn position(&self) -> Duration {
        self.sink.as_ref().map(Sink::get_pos).unwrap_or_default()
    }

    /// Length of the loaded file, when the decoder knows it
    pub fn length(&self) -> Option<Duration> {
        self.length
    }

    pub fn is_finished(&self) -> bool {
        self.sink.as_ref().map_or(true, Sink::empty)
    }

    /// Block until playback ends
    pub fn wait(&self) {
        if let Some(sink) = &self.sink {
            sink.sleep_until_end();
        }
    }
}

/// Duration of an audio file without opening an output device
pub fn media_length(path: &Path) -> Result<Option<Duration>, AudioError> {
    match AudioFileFormat::from_path(path) {
        Some(AudioFileFormat::Wav) => {
            let reader = hound::WavReader::open(path).map_err(|e| {
                AudioError::Playback(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let rate = reader.spec().sample_rate;
            if rate == 0 {
                return Ok(None);
            }
            Ok(Some(Duration::from_secs_f64(
                reader.duration() as f64 / rate as f64,
            )))
        }
        _ => {
            let data = std::fs::read(path).map_err(|e| {
                AudioError::Playback(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let source = Decoder::new(Cursor::new(data))
                .map_err(|e| AudioError::Playback(format!("Failed to decode audio: {}", e)))?;
            Ok(source.total_duration())
        }
    }
}
