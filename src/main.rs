//! Voxconv - record speech and convert it to other voices
//!
//! Use `voxconv record` to capture from the microphone, `voxconv list` to
//! browse the library, and `voxconv convert <ID> --to <CLASS>` to send a
//! recording to the conversion service.

use anyhow::Context;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use voxconv::audio::{self, cpal_capture, player};
use voxconv::cli::{Cli, Commands};
use voxconv::config::{self, Config};
use voxconv::convert::RemoteConverter;
use voxconv::library::{Recording, RecordingLibrary, SpeakerClass};
use voxconv::AppController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voxconv={},warn", log_level))),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(library) = cli.library {
        config.library.path = library.to_string_lossy().to_string();
    }
    if let Some(endpoint) = cli.endpoint {
        config.remote.endpoint = endpoint;
    }

    match cli.command {
        Commands::Record {
            max_secs,
            discard,
            format,
        } => {
            if let Some(format) = format {
                config.audio.format = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
            if let Some(secs) = max_secs {
                config.audio.max_duration_secs = secs;
            }
            config.validate()?;
            run_record(config, discard).await?;
        }

        Commands::List {
            speaker,
            all,
            json,
        } => {
            let speaker = if all {
                None
            } else {
                Some(parse_speaker(speaker.as_deref().unwrap_or("original"))?)
            };
            let library = open_library(&config)?;
            let recordings = match speaker {
                Some(class) => library.list_by_speaker(class)?,
                None => library.list_all()?,
            };
            print_recordings(&recordings, json)?;
        }

        Commands::Show { id } => {
            let library = open_library(&config)?;
            show_recording(&library, &library.get(id)?);
        }

        Commands::Rename { id, name } => {
            let controller = AppController::new(config.clone(), open_library(&config)?);
            let recording = controller.rename(id, &name)?;
            println!("Renamed recording {} to {}", id, recording.filename);
        }

        Commands::Delete { id } => {
            let controller = AppController::new(config.clone(), open_library(&config)?);
            let recording = controller.delete(id)?;
            println!("Deleted recording {} ({})", id, recording.filename);
        }

        Commands::Convert { id, to } => {
            let target = parse_speaker(&to)?;
            config.validate()?;
            let converter = RemoteConverter::new(&config.remote)?;
            let mut controller = AppController::new(config.clone(), open_library(&config)?)
                .with_converter(Box::new(converter));

            println!("Converting recording {} to speaker {}...", id, target);
            let recording = tokio::task::block_in_place(|| controller.convert(id, target))?;
            println!(
                "Received recording {}: {}",
                recording.id,
                controller.library().path_of(&recording).display()
            );
        }

        Commands::Play { id, from_ms } => {
            let library = open_library(&config)?;
            let recording = library.get(id)?;
            play_recording(&library, &recording, from_ms)?;
        }

        Commands::Speakers => {
            for class in SpeakerClass::ALL {
                let role = if class.is_original() {
                    "microphone recordings"
                } else {
                    "conversion target"
                };
                println!("{:<10} {}", class, role);
            }
        }

        Commands::Devices => {
            let devices = cpal_capture::list_input_devices()?;
            if devices.is_empty() {
                println!("No audio input devices found.");
            }
            for device in devices {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{}{}", device.name, marker);
            }
        }

        Commands::Config { init } => {
            if init {
                init_config(&config, cli.config)?;
            } else {
                show_config(&config)?;
            }
        }
    }

    Ok(())
}

fn parse_speaker(s: &str) -> anyhow::Result<SpeakerClass> {
    s.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn open_library(config: &Config) -> anyhow::Result<RecordingLibrary> {
    let dir = config.library_dir();
    RecordingLibrary::open(&dir)
        .with_context(|| format!("Failed to open recordings library at {}", dir.display()))
}

/// Record until Enter, Ctrl-C or the duration limit
async fn run_record(config: Config, discard: bool) -> anyhow::Result<()> {
    let mut controller = AppController::new(config.clone(), open_library(&config)?);
    if !discard {
        if let Some(compressor) = audio::create_compressor(config.audio.format, &config.encoder)? {
            controller = controller.with_compressor(compressor);
        }
    }

    let source = audio::create_source(&config.audio)?;
    controller.start_recording(source)?;

    if config.audio.max_duration_secs > 0 {
        println!(
            "Recording (up to {}s)... press Enter or Ctrl-C to stop.",
            config.audio.max_duration_secs
        );
    } else {
        println!("Recording... press Enter or Ctrl-C to stop.");
    }

    let mut enter = spawn_line_watcher(std::io::BufReader::new(std::io::stdin()));
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            line = enter.recv(), if stdin_open => {
                match line {
                    Some(()) => break,
                    // Closed stdin leaves Ctrl-C and the limit
                    None => stdin_open = false,
                }
            }
            _ = &mut ctrl_c => {
                println!();
                break;
            }
            _ = ticker.tick() => {
                if controller.capture_finished() {
                    break;
                }
            }
        }
    }

    if let Some(elapsed) = controller.recording_elapsed() {
        tracing::debug!("Stopping capture after {:.1}s", elapsed.as_secs_f32());
    }

    if discard {
        let duration = tokio::task::block_in_place(|| controller.stop_and_discard())?;
        println!("Discarded {:.1}s of audio.", duration.as_secs_f32());
    } else {
        let recording = tokio::task::block_in_place(|| controller.stop_and_save())?;
        println!(
            "Saved recording {}: {}",
            recording.id,
            controller.library().path_of(&recording).display()
        );
    }

    Ok(())
}

/// Signal once a line arrives on `reader`
///
/// The read runs on a plain thread rather than the runtime's blocking pool,
/// so an unanswered prompt never holds up runtime shutdown. End of input
/// closes the channel without a message.
fn spawn_line_watcher<R>(mut reader: R) -> mpsc::UnboundedReceiver<()>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("voxconv-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            if let Ok(n) = reader.read_line(&mut line) {
                if n > 0 {
                    let _ = tx.send(());
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Cannot watch stdin, stop with Ctrl-C: {}", e);
    }
    rx
}

fn print_recordings(recordings: &[Recording], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(recordings)?);
        return Ok(());
    }

    if recordings.is_empty() {
        println!("No recordings.");
        return Ok(());
    }

    println!("{:>5}  {:<16}  {:<8}  FILE", "ID", "RECORDED", "SPEAKER");
    for recording in recordings {
        println!(
            "{:>5}  {:<16}  {:<8}  {}",
            recording.id,
            recording.readable_time(),
            recording.speaker_class,
            recording.filename
        );
    }
    Ok(())
}

fn show_recording(library: &RecordingLibrary, recording: &Recording) {
    let path = library.path_of(recording);

    println!("Recording {}\n", recording.id);
    println!("  file     = {}", recording.filename);
    println!("  speaker  = {}", recording.speaker_class);
    println!("  recorded = {}", recording.readable_time());
    if let Some(format) = recording.format() {
        println!("  format   = {} ({})", format.wire_name(), format.mime_type());
    }
    match player::media_length(&path) {
        Ok(Some(length)) => println!("  length   = {:.1}s", length.as_secs_f32()),
        Ok(None) => {}
        Err(e) => tracing::warn!("Cannot read length of {}: {}", path.display(), e),
    }
    match std::fs::metadata(&path) {
        Ok(meta) => println!("  size     = {} bytes", meta.len()),
        Err(_) => println!("  size     = (file missing)"),
    }
    println!("  path     = {}", path.display());
}

fn play_recording(
    library: &RecordingLibrary,
    recording: &Recording,
    from_ms: Option<u64>,
) -> anyhow::Result<()> {
    let mut player = player::Player::new()?;
    player.load(&library.path_of(recording))?;
    if let Some(ms) = from_ms {
        player.seek(ms)?;
    }

    match player.length() {
        Some(length) => println!(
            "Playing {} ({:.1}s)...",
            recording.filename,
            length.as_secs_f32()
        ),
        None => println!("Playing {}...", recording.filename),
    }

    player.play()?;
    tokio::task::block_in_place(|| player.wait());
    Ok(())
}

fn init_config(config: &Config, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path
        .or_else(Config::default_path)
        .context("Cannot determine config file location")?;
    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    config::save_config(config, &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Show current configuration
fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("Current Configuration\n");
    println!("=====================\n");

    println!("[audio]");
    println!("  device = {:?}", config.audio.device);
    println!("  sample_rate = {}", config.audio.sample_rate);
    println!("  block_size = {}", config.audio.block_size);
    println!("  max_duration_secs = {}", config.audio.max_duration_secs);
    println!("  format = {:?}", config.audio.format.to_string());
    println!("  riff_size = {:?}", config.audio.riff_size);

    println!("\n[remote]");
    println!("  endpoint = {:?}", config.remote.endpoint);
    println!("  timeout_secs = {}", config.remote.timeout_secs);
    println!(
        "  api_key = {}",
        if config.remote.api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );

    println!("\n[library]");
    println!("  path = {:?}", config.library.path);
    println!("  (resolves to: {:?})", config.library_dir());

    if let Some(ref ffmpeg) = config.encoder.ffmpeg_path {
        println!("\n[encoder]");
        println!("  ffmpeg_path = {:?}", ffmpeg);
    }

    if let Some(ref state_file) = config.state_file {
        println!("\n[integration]");
        println!("  state_file = {:?}", state_file);
        if let Some(resolved) = config.resolve_state_file() {
            println!("  (resolves to: {:?})", resolved);
        }
    }

    println!("\n---");
    println!(
        "Config file: {:?}",
        Config::default_path().unwrap_or_else(|| PathBuf::from("(not found)"))
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::time::Instant;

    /// A reader that blocks for a long time, like a terminal nobody types into
    struct StalledReader(Duration);

    impl Read for StalledReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(self.0);
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_line_watcher_signals_enter() {
        let mut rx = spawn_line_watcher(Cursor::new(b"\n".to_vec()));
        assert_eq!(rx.recv().await, Some(()));
    }

    #[tokio::test]
    async fn test_line_watcher_closes_on_eof() {
        let mut rx = spawn_line_watcher(Cursor::new(Vec::new()));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_pending_read_does_not_block_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let start = Instant::now();

        runtime.block_on(async {
            let mut rx = spawn_line_watcher(std::io::BufReader::new(StalledReader(
                Duration::from_secs(10),
            )));
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            ticker.tick().await;
            tokio::select! {
                _ = rx.recv() => panic!("no line was written"),
                _ = ticker.tick() => {}
            }
        });
        drop(runtime);

        assert!(
            start.elapsed() < Duration::from_secs(5),
            "runtime shutdown waited {:?} for stdin",
            start.elapsed()
        );
    }
}
