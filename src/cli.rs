// Command-line interface definitions for voxconv
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "voxconv")]
#[command(author, version, about = "Record speech and convert it to other voices")]
#[command(long_about = "
Voxconv records speech from the microphone into WAV (or FLAC) files, keeps
a library of original and converted recordings, and sends originals to a
remote voice-conversion service.

USAGE:
  voxconv record              Record until Enter or Ctrl-C, then save
  voxconv list                Show original recordings
  voxconv convert 3 --to B    Convert recording 3 to speaker B
  voxconv play 4              Listen to the result
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override the library directory
    #[arg(long, value_name = "DIR")]
    pub library: Option<std::path::PathBuf>,

    /// Override the conversion service endpoint
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record from the microphone until Enter, Ctrl-C or the time limit
    Record {
        /// Stop after this many seconds (overrides audio.max_duration_secs)
        #[arg(long, value_name = "SECS")]
        max_secs: Option<u32>,

        /// Throw the recording away instead of saving it
        #[arg(long)]
        discard: bool,

        /// File format for the saved recording: wav or flac
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,
    },

    /// List recordings, newest first
    List {
        /// Speaker class to list: original, A, B or C (default: original)
        #[arg(long, value_name = "CLASS")]
        speaker: Option<String>,

        /// List every speaker class
        #[arg(long, conflicts_with = "speaker")]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show details of one recording
    Show {
        /// Recording id
        id: i64,
    },

    /// Rename a recording (the file extension is kept)
    Rename {
        /// Recording id
        id: i64,

        /// New file name
        name: String,
    },

    /// Delete a recording and its file
    Delete {
        /// Recording id
        id: i64,
    },

    /// Send an original recording to the conversion service
    Convert {
        /// Recording id (must be an original)
        id: i64,

        /// Target speaker class: A, B or C
        #[arg(long, value_name = "CLASS")]
        to: String,
    },

    /// Play a recording
    Play {
        /// Recording id
        id: i64,

        /// Start position in milliseconds
        #[arg(long, value_name = "MS")]
        from_ms: Option<u64>,
    },

    /// List speaker classes
    Speakers,

    /// List audio input devices
    Devices,

    /// Show current configuration
    Config {
        /// Write the configuration to the config file if none exists yet
        #[arg(long)]
        init: bool,
    },
}
