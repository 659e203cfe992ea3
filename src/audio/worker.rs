//! Background capture worker
//!
//! A single thread owns the [`PcmFramer`] for the whole capture. It reads
//! blocks from a [`SampleSource`] and appends them until it is told to stop,
//! the source runs dry, or the sample limit is reached. The finished bytes
//! come back through the thread's join handle, so nothing else ever touches
//! the buffer while samples are still being appended.

use super::framer::{PcmFramer, WavSpec};
use super::SampleSource;
use crate::config::AudioConfig;
use crate::error::AudioError;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Knobs for a single capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Samples requested per read
    pub block_size: usize,
    /// Stop once this many samples (all channels) have been appended
    pub max_samples: Option<u64>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            block_size: 1024,
            max_samples: None,
        }
    }
}

impl CaptureOptions {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            block_size: config.block_size,
            ..Self::default()
        }
        .with_max_duration(
            Duration::from_secs(config.max_duration_secs as u64),
            &config.wav_spec(),
        )
    }

    /// Limit the capture to `duration` of audio at the given spec.
    /// A zero duration means no limit.
    pub fn with_max_duration(mut self, duration: Duration, spec: &WavSpec) -> Self {
        self.max_samples = if duration.is_zero() {
            None
        } else {
            let frames = (duration.as_secs_f64() * spec.sample_rate as f64).round() as u64;
            Some(frames * spec.channels as u64)
        };
        self
    }
}

/// Result of a completed capture
#[derive(Debug, Clone)]
pub struct FinishedCapture {
    /// Complete WAV file: header followed by payload
    pub bytes: Vec<u8>,
    pub sample_count: u64,
    pub duration: Duration,
    /// True when the capture ended because it reached `max_samples`
    pub hit_limit: bool,
}

impl FinishedCapture {
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

pub struct CaptureWorker;

impl CaptureWorker {
    /// Start capturing from `source` on a new thread.
    ///
    /// The spec is validated and checked against the source format before
    /// the thread starts.
    pub fn spawn(
        source: Box<dyn SampleSource>,
        spec: WavSpec,
        options: CaptureOptions,
    ) -> Result<CaptureHandle, AudioError> {
        let framer = PcmFramer::begin(spec)?;

        if source.sample_rate() != spec.sample_rate || source.channels() != spec.channels {
            return Err(AudioError::FormatMismatch {
                source_rate: source.sample_rate(),
                source_channels: source.channels(),
                rate: spec.sample_rate,
                channels: spec.channels,
            });
        }

        let block_size = options.block_size.max(1);
        let (stop_tx, stop_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("voxconv-capture".to_string())
            .spawn(move || run_capture(source, framer, stop_rx, block_size, options.max_samples))
            .map_err(|e| AudioError::StreamError(format!("Failed to spawn capture thread: {}", e)))?;

        tracing::debug!(
            "Capture worker started ({} Hz, {} ch, {} samples per block)",
            spec.sample_rate,
            spec.channels,
            block_size
        );

        Ok(CaptureHandle {
            stop_tx,
            thread,
            started_at: Instant::now(),
        })
    }
}

fn run_capture(
    mut source: Box<dyn SampleSource>,
    mut framer: PcmFramer,
    stop_rx: Receiver<()>,
    block_size: usize,
    max_samples: Option<u64>,
) -> Result<FinishedCapture, AudioError> {
    let mut block = vec![0i16; block_size];
    let mut hit_limit = false;

    loop {
        // A dropped handle counts as a stop request
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let wanted = match max_samples {
            Some(max) => {
                let remaining = max.saturating_sub(framer.sample_count());
                if remaining == 0 {
                    hit_limit = true;
                    break;
                }
                block_size.min(remaining as usize)
            }
            None => block_size,
        };

        let read = match source.read_block(&mut block[..wanted]) {
            Ok(n) => n.min(wanted),
            Err(e) => {
                tracing::error!("Capture read failed: {}", e);
                return Err(e);
            }
        };
        if read == 0 {
            tracing::debug!("Sample source exhausted");
            break;
        }

        framer.append_samples(&block[..read])?;
    }

    let sample_count = framer.sample_count();
    let duration = framer.duration();
    if hit_limit {
        tracing::info!("Maximum recording duration reached ({:.1}s)", duration.as_secs_f32());
    }

    let bytes = framer.finalize()?;
    tracing::debug!(
        "Capture finished: {} samples ({:.2}s), {} bytes",
        sample_count,
        duration.as_secs_f32(),
        bytes.len()
    );

    Ok(FinishedCapture {
        bytes,
        sample_count,
        duration,
        hit_limit,
    })
}

/// Handle to a running capture
///
/// Dropping the handle stops the worker and discards its output.
pub struct CaptureHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<Result<FinishedCapture, AudioError>>,
    started_at: Instant,
}

impl CaptureHandle {
    /// Signal the worker, wait for it, and take the finished capture.
    ///
    /// Takes effect before the next read; a block already being read is
    /// still appended.
    pub fn stop(self) -> Result<FinishedCapture, AudioError> {
        // Fails only when the worker already exited on its own
        let _ = self.stop_tx.send(());
        self.thread.join().map_err(|_| AudioError::WorkerPanicked)?
    }

    /// True once the worker has exited (limit reached, source exhausted or error)
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Counts upward, one value per sample, forever
    struct CountingSource {
        next: i16,
        reads: Arc<Mutex<usize>>,
    }

    impl SampleSource for CountingSource {
        fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
            for sample in buf.iter_mut() {
                *sample = self.next;
                self.next = self.next.wrapping_add(1);
            }
            *self.reads.lock().unwrap() += 1;
            thread::sleep(Duration::from_millis(1));
            Ok(buf.len())
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn channels(&self) -> u16 {
            1
        }
    }

    struct FiniteSource(Vec<i16>);

    impl SampleSource for FiniteSource {
        fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
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

    struct FailingSource;

    impl SampleSource for FailingSource {
        fn read_block(&mut self, _buf: &mut [i16]) -> Result<usize, AudioError> {
            Err(AudioError::Timeout(2))
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn channels(&self) -> u16 {
            1
        }
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes[44..]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_stop_returns_contiguous_samples() {
        let reads = Arc::new(Mutex::new(0));
        let source = CountingSource {
            next: 0,
            reads: reads.clone(),
        };
        let options = CaptureOptions {
            block_size: 64,
            max_samples: None,
        };
        let handle =
            CaptureWorker::spawn(Box::new(source), WavSpec::pcm16_mono(16000), options).unwrap();
        thread::sleep(Duration::from_millis(30));
        let finished = handle.stop().unwrap();

        let decoded = samples(&finished.bytes);
        assert_eq!(decoded.len() as u64, finished.sample_count);
        assert_eq!(decoded.len(), *reads.lock().unwrap() * 64);
        for (i, sample) in decoded.iter().enumerate() {
            assert_eq!(*sample, i as i16);
        }
        assert!(!finished.hit_limit);
    }

    #[test]
    fn test_source_exhaustion_ends_capture() {
        let source = FiniteSource((0..100).collect());
        let options = CaptureOptions {
            block_size: 30,
            max_samples: None,
        };
        let handle =
            CaptureWorker::spawn(Box::new(source), WavSpec::pcm16_mono(16000), options).unwrap();
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        let finished = handle.stop().unwrap();
        assert_eq!(samples(&finished.bytes), (0..100).collect::<Vec<i16>>());
        assert_eq!(finished.duration, Duration::from_micros(6250));
    }

    #[test]
    fn test_max_samples_truncates_last_block() {
        let source = FiniteSource(vec![3; 1000]);
        let options = CaptureOptions {
            block_size: 64,
            max_samples: Some(100),
        };
        let handle =
            CaptureWorker::spawn(Box::new(source), WavSpec::pcm16_mono(16000), options).unwrap();
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        let finished = handle.stop().unwrap();
        assert_eq!(finished.sample_count, 100);
        assert_eq!(finished.bytes.len(), 44 + 200);
        assert!(finished.hit_limit);
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let source = FiniteSource(vec![]);
        let result = CaptureWorker::spawn(
            Box::new(source),
            WavSpec::pcm16_mono(44100),
            CaptureOptions::default(),
        );
        assert!(matches!(
            result,
            Err(AudioError::FormatMismatch {
                source_rate: 16000,
                rate: 44100,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_spec_rejected_before_spawn() {
        let source = FiniteSource(vec![]);
        let result = CaptureWorker::spawn(
            Box::new(source),
            WavSpec::pcm16_mono(0),
            CaptureOptions::default(),
        );
        assert!(matches!(result, Err(AudioError::Framer(_))));
    }

    #[test]
    fn test_read_error_surfaces_on_stop() {
        let handle = CaptureWorker::spawn(
            Box::new(FailingSource),
            WavSpec::pcm16_mono(16000),
            CaptureOptions::default(),
        )
        .unwrap();
        assert!(matches!(handle.stop(), Err(AudioError::Timeout(2))));
    }

    #[test]
    fn test_options_from_duration() {
        let spec = WavSpec::pcm16_mono(32000);
        let options = CaptureOptions::default().with_max_duration(Duration::from_secs(2), &spec);
        assert_eq!(options.max_samples, Some(64000));

        let unlimited = CaptureOptions::default().with_max_duration(Duration::ZERO, &spec);
        assert_eq!(unlimited.max_samples, None);
    }
}
