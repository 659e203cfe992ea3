//! Application controller
//!
//! Ties capture, the recordings library, compression and the conversion
//! service together, and keeps the state file in step with what is
//! happening.

use crate::audio::{
    AudioFileFormat, CaptureHandle, CaptureOptions, CaptureWorker, Compressor, FinishedCapture,
    SampleSource,
};
use crate::config::Config;
use crate::convert::{ConversionRequest, Converter};
use crate::error::{AudioError, Result, StorageError, VoxconvError};
use crate::library::{wav_duration, Recording, RecordingLibrary, SpeakerClass};
use crate::state::State;
use chrono::{Local, NaiveDateTime, Timelike};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Write state to file for external integrations (e.g., status bars)
fn write_state_file(path: &Path, state: &str) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create state file directory: {}", e);
            return;
        }
    }

    if let Err(e) = std::fs::write(path, state) {
        tracing::warn!("Failed to write state file: {}", e);
    } else {
        tracing::trace!("State file updated: {}", state);
    }
}

/// A capture in flight, with the wall-clock time it began
struct ActiveCapture {
    handle: CaptureHandle,
    started: NaiveDateTime,
}

pub struct AppController {
    config: Config,
    library: RecordingLibrary,
    converter: Option<Box<dyn Converter>>,
    compressor: Option<Box<dyn Compressor>>,
    state: State,
    capture: Option<ActiveCapture>,
    state_file_path: Option<PathBuf>,
}

impl AppController {
    pub fn new(config: Config, library: RecordingLibrary) -> Self {
        let state_file_path = config.resolve_state_file();
        Self {
            config,
            library,
            converter: None,
            compressor: None,
            state: State::Idle,
            capture: None,
            state_file_path,
        }
    }

    /// Use `converter` for `convert`
    pub fn with_converter(mut self, converter: Box<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Compress new recordings with `compressor` before they are stored
    pub fn with_compressor(mut self, compressor: Box<dyn Compressor>) -> Self {
        tracing::debug!("New recordings will be compressed with {}", compressor.name());
        self.compressor = Some(compressor);
        self
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn library(&self) -> &RecordingLibrary {
        &self.library
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn set_state(&mut self, state: State) {
        tracing::debug!("State: {} -> {}", self.state, state);
        self.state = state;
        if let Some(ref path) = self.state_file_path {
            write_state_file(path, self.state.name());
        }
    }

    fn require_idle(&self, operation: &str) -> Result<()> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(VoxconvError::InvalidState(format!(
                "cannot {} while {}",
                operation,
                self.state.name()
            )))
        }
    }

    /// Begin capturing from `source`
    pub fn start_recording(&mut self, source: Box<dyn SampleSource>) -> Result<()> {
        self.require_idle("start recording")?;

        let spec = self.config.audio.wav_spec();
        let options = CaptureOptions::from_config(&self.config.audio);
        let handle = CaptureWorker::spawn(source, spec, options)?;

        let now = Local::now().naive_local();
        self.capture = Some(ActiveCapture {
            handle,
            started: now.with_nanosecond(0).unwrap_or(now),
        });
        self.set_state(State::Recording {
            started_at: Instant::now(),
        });

        tracing::info!("Recording started");
        Ok(())
    }

    /// True when the capture ended on its own (limit reached or source closed)
    pub fn capture_finished(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| capture.handle.is_finished())
    }

    pub fn recording_elapsed(&self) -> Option<Duration> {
        self.capture.as_ref().map(|capture| capture.handle.elapsed())
    }

    fn stop_capture(&mut self) -> Result<(FinishedCapture, NaiveDateTime)> {
        let capture = self.capture.take().ok_or_else(|| {
            VoxconvError::InvalidState("cannot stop: not recording".to_string())
        })?;

        let finished = capture.handle.stop();
        self.set_state(State::Idle);
        Ok((finished?, capture.started))
    }

    /// Stop capturing and store the result as an original recording
    pub fn stop_and_save(&mut self) -> Result<Recording> {
        let (finished, started) = self.stop_capture()?;
        if finished.is_empty() {
            return Err(AudioError::EmptyRecording.into());
        }

        let (bytes, format) = match &self.compressor {
            Some(compressor) => (compressor.compress(&finished.bytes)?, compressor.format()),
            None => (finished.bytes, AudioFileFormat::Wav),
        };

        let recording = self.library.add_original(&bytes, started, format)?;
        tracing::info!(
            "Recording saved: {} ({:.1}s)",
            recording.filename,
            finished.duration.as_secs_f32()
        );
        Ok(recording)
    }

    /// Stop capturing and throw the audio away
    pub fn stop_and_discard(&mut self) -> Result<Duration> {
        let (finished, _) = self.stop_capture()?;
        tracing::info!(
            "Recording discarded ({:.1}s)",
            finished.duration.as_secs_f32()
        );
        Ok(finished.duration)
    }

    /// Recordings of one class, or every recording, newest first
    pub fn recordings(&self, speaker: Option<SpeakerClass>) -> Result<Vec<Recording>> {
        Ok(match speaker {
            Some(class) => self.library.list_by_speaker(class)?,
            None => self.library.list_all()?,
        })
    }

    pub fn recording(&self, id: i64) -> Result<Recording> {
        Ok(self.library.get(id)?)
    }

    pub fn rename(&self, id: i64, new_name: &str) -> Result<Recording> {
        Ok(self.library.rename(id, new_name)?)
    }

    pub fn delete(&self, id: i64) -> Result<Recording> {
        Ok(self.library.delete(id)?)
    }

    /// Send an original recording to the conversion service and store the
    /// converted audio under `target`
    pub fn convert(&mut self, id: i64, target: SpeakerClass) -> Result<Recording> {
        self.require_idle("convert")?;

        if target.is_original() {
            return Err(VoxconvError::InvalidState(format!(
                "conversion target must be one of {}",
                SpeakerClass::targets()
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let recording = self.library.get(id)?;
        if !recording.speaker_class.is_original() {
            return Err(VoxconvError::InvalidState(format!(
                "recording {} is already a conversion (speaker {}); convert an original instead",
                id, recording.speaker_class
            )));
        }

        let format = recording.format().ok_or_else(|| {
            StorageError::Corrupt(format!(
                "cannot tell the audio format of {}",
                recording.filename
            ))
        })?;
        let audio = self.library.read(&recording)?;
        let sample_rate = wav_sample_rate(&audio).unwrap_or(self.config.audio.sample_rate);
        let request = ConversionRequest::new(target, format, sample_rate, audio);

        tracing::info!(
            "Converting {} to speaker {}...",
            recording.filename,
            target
        );
        // Held outside `self` for the call so the state can change around it
        let converter = self.converter.take().ok_or_else(|| {
            VoxconvError::Config("no conversion service configured".to_string())
        })?;
        self.set_state(State::Converting {
            recording_id: id,
            target,
        });
        let response = converter.convert(&request);
        self.converter = Some(converter);
        self.set_state(State::Idle);

        let converted = response?.into_audio(target)?;
        if converted.format == AudioFileFormat::Wav {
            match wav_duration(&converted.audio) {
                Ok(length) => tracing::info!(
                    "Received {:.1}s of audio for speaker {}",
                    length.as_secs_f32(),
                    target
                ),
                Err(e) => tracing::warn!("Received audio is not a readable WAV: {}", e),
            }
        }
        Ok(self
            .library
            .add_received(&converted.audio, converted.speaker, converted.format)?)
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        if let Some(ref path) = self.state_file_path {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!("Failed to remove state file: {}", e);
                }
            }
        }
    }
}

/// Sample rate from a WAV header; None for anything hound cannot read
fn wav_sample_rate(bytes: &[u8]) -> Option<u32> {
    hound::WavReader::new(Cursor::new(bytes))
        .ok()
        .map(|reader| reader.spec().sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConversionResponse;
    use crate::error::{ConversionError, EncoderError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct FiniteSource(Vec<i16>);

    impl SampleSource for FiniteSource {
        fn read_block(&mut self, buf: &mut [i16]) -> std::result::Result<usize, AudioError> {
            let n = buf.len().min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn channels(&self) -> u16 {
            1
        }
    }

    /// Echoes the request back, relabelled as the target speaker
    struct EchoConverter {
        seen: Arc<Mutex<Vec<ConversionRequest>>>,
    }

    impl Converter for EchoConverter {
        fn convert(
            &self,
            request: &ConversionRequest,
        ) -> std::result::Result<ConversionResponse, ConversionError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(request.clone())
        }
    }

    struct FailingConverter;

    impl Converter for FailingConverter {
        fn convert(
            &self,
            _request: &ConversionRequest,
        ) -> std::result::Result<ConversionResponse, ConversionError> {
            Err(ConversionError::Server {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    /// Fails the first request, echoes every later one
    struct FlakyConverter {
        calls: AtomicUsize,
    }

    impl Converter for FlakyConverter {
        fn convert(
            &self,
            request: &ConversionRequest,
        ) -> std::result::Result<ConversionResponse, ConversionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ConversionError::Network("connection reset".to_string()))
            } else {
                Ok(request.clone())
            }
        }
    }

    struct TaggingCompressor;

    impl Compressor for TaggingCompressor {
        fn compress(&self, wav: &[u8]) -> std::result::Result<Vec<u8>, EncoderError> {
            let mut out = b"fLaC".to_vec();
            out.extend_from_slice(&wav[..4]);
            Ok(out)
        }

        fn name(&self) -> &str {
            "tagging"
        }

        fn format(&self) -> AudioFileFormat {
            AudioFileFormat::Flac
        }
    }

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.audio.sample_rate = 16000;
        config.state_file = Some(dir.join("state").to_string_lossy().to_string());
        config
    }

    fn create_controller() -> (AppController, TempDir) {
        let temp = TempDir::new().unwrap();
        let library = RecordingLibrary::open(temp.path().join("library")).unwrap();
        let controller = AppController::new(test_config(temp.path()), library);
        (controller, temp)
    }

    fn record(controller: &mut AppController, samples: Vec<i16>) -> Result<Recording> {
        controller.start_recording(Box::new(FiniteSource(samples)))?;
        while !controller.capture_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        controller.stop_and_save()
    }

    #[test]
    fn test_record_and_save() {
        let (mut controller, temp) = create_controller();

        controller
            .start_recording(Box::new(FiniteSource(vec![1; 1600])))
            .unwrap();
        assert!(controller.state().is_recording());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("state")).unwrap(),
            "recording"
        );

        while !controller.capture_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let recording = controller.stop_and_save().unwrap();

        assert!(controller.state().is_idle());
        assert_eq!(recording.speaker_class, SpeakerClass::Original);
        assert!(recording.filename.starts_with("rec-"));
        assert_eq!(recording.format(), Some(AudioFileFormat::Wav));

        let bytes = controller.library().read(&recording).unwrap();
        assert_eq!(bytes.len(), 44 + 3200);
        assert_eq!(wav_sample_rate(&bytes), Some(16000));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("state")).unwrap(),
            "idle"
        );
    }

    #[test]
    fn test_empty_capture_is_rejected() {
        let (mut controller, _temp) = create_controller();
        let result = record(&mut controller, vec![]);
        assert!(matches!(
            result,
            Err(VoxconvError::Audio(AudioError::EmptyRecording))
        ));
        assert!(controller.state().is_idle());
        assert!(controller.recordings(None).unwrap().is_empty());
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut controller, _temp) = create_controller();
        controller
            .start_recording(Box::new(FiniteSource(vec![0; 10])))
            .unwrap();
        assert!(matches!(
            controller.start_recording(Box::new(FiniteSource(vec![0; 10]))),
            Err(VoxconvError::InvalidState(_))
        ));
        controller.stop_and_discard().unwrap();
    }

    #[test]
    fn test_stop_without_recording_fails() {
        let (mut controller, _temp) = create_controller();
        assert!(matches!(
            controller.stop_and_save(),
            Err(VoxconvError::InvalidState(_))
        ));
    }

    #[test]
    fn test_discard_stores_nothing() {
        let (mut controller, _temp) = create_controller();
        controller
            .start_recording(Box::new(FiniteSource(vec![5; 800])))
            .unwrap();
        while !controller.capture_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let duration = controller.stop_and_discard().unwrap();
        assert_eq!(duration, Duration::from_millis(50));
        assert!(controller.recordings(None).unwrap().is_empty());
        assert!(controller.state().is_idle());
    }

    #[test]
    fn test_compressor_applied_on_save() {
        let (controller, _temp) = create_controller();
        let mut controller = controller.with_compressor(Box::new(TaggingCompressor));

        let recording = record(&mut controller, vec![1; 100]).unwrap();
        assert!(recording.filename.ends_with(".flac"));
        assert_eq!(controller.library().read(&recording).unwrap(), b"fLaCRIFF");
    }

    #[test]
    fn test_convert_stores_received_recording() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (controller, _temp) = create_controller();
        let mut controller = controller.with_converter(Box::new(EchoConverter {
            seen: seen.clone(),
        }));

        let original = record(&mut controller, vec![3; 400]).unwrap();
        let converted = controller.convert(original.id, SpeakerClass::B).unwrap();

        assert_eq!(converted.speaker_class, SpeakerClass::B);
        assert!(converted.filename.ends_with("-B.wav"));
        assert!(controller.state().is_idle());

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target_speaker, "B");
        assert_eq!(requests[0].audio_format, "WAV");
        assert_eq!(requests[0].sample_rate, 16000);
        assert_eq!(
            requests[0].audio_data,
            controller.library().read(&original).unwrap()
        );

        assert_eq!(
            controller.recordings(Some(SpeakerClass::B)).unwrap(),
            vec![converted]
        );
    }

    #[test]
    fn test_convert_rejects_original_target_and_converted_source() {
        let (controller, _temp) = create_controller();
        let mut controller = controller.with_converter(Box::new(EchoConverter {
            seen: Arc::new(Mutex::new(Vec::new())),
        }));

        let original = record(&mut controller, vec![3; 100]).unwrap();
        assert!(matches!(
            controller.convert(original.id, SpeakerClass::Original),
            Err(VoxconvError::InvalidState(_))
        ));

        let converted = controller.convert(original.id, SpeakerClass::A).unwrap();
        assert!(matches!(
            controller.convert(converted.id, SpeakerClass::C),
            Err(VoxconvError::InvalidState(_))
        ));
    }

    #[test]
    fn test_convert_without_converter() {
        let (mut controller, _temp) = create_controller();
        let original = record(&mut controller, vec![3; 100]).unwrap();
        assert!(matches!(
            controller.convert(original.id, SpeakerClass::A),
            Err(VoxconvError::Config(_))
        ));
    }

    #[test]
    fn test_convert_server_error_returns_to_idle() {
        let (controller, _temp) = create_controller();
        let mut controller = controller.with_converter(Box::new(FailingConverter));
        let original = record(&mut controller, vec![3; 100]).unwrap();

        let result = controller.convert(original.id, SpeakerClass::A);
        assert!(matches!(
            result,
            Err(VoxconvError::Conversion(ConversionError::Server { status: 500, .. }))
        ));
        assert!(controller.state().is_idle());
        assert!(controller
            .recordings(Some(SpeakerClass::A))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_convert_keeps_converter_after_failure() {
        let (controller, _temp) = create_controller();
        let mut controller = controller.with_converter(Box::new(FlakyConverter {
            calls: AtomicUsize::new(0),
        }));
        let original = record(&mut controller, vec![5; 200]).unwrap();

        assert!(matches!(
            controller.convert(original.id, SpeakerClass::C),
            Err(VoxconvError::Conversion(ConversionError::Network(_)))
        ));
        assert!(controller.state().is_idle());

        let converted = controller.convert(original.id, SpeakerClass::C).unwrap();
        assert_eq!(converted.speaker_class, SpeakerClass::C);
    }

    #[test]
    fn test_convert_unknown_id() {
        let (controller, _temp) = create_controller();
        let mut controller = controller.with_converter(Box::new(FailingConverter));
        assert!(matches!(
            controller.convert(99, SpeakerClass::A),
            Err(VoxconvError::Storage(StorageError::NotFound(99)))
        ));
    }

    #[test]
    fn test_rename_and_delete_pass_through() {
        let (mut controller, _temp) = create_controller();
        let recording = record(&mut controller, vec![1; 10]).unwrap();

        let renamed = controller.rename(recording.id, "hello").unwrap();
        assert_eq!(renamed.filename, "hello.wav");
        assert_eq!(controller.recording(recording.id).unwrap(), renamed);

        controller.delete(recording.id).unwrap();
        assert!(controller.recording(recording.id).is_err());
    }

    #[test]
    fn test_drop_removes_state_file() {
        let (mut controller, temp) = create_controller();
        controller
            .start_recording(Box::new(FiniteSource(vec![0; 10])))
            .unwrap();
        assert!(temp.path().join("state").exists());
        drop(controller);
        assert!(!temp.path().join("state").exists());
    }
}
