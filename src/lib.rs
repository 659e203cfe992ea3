//! Voxconv: record speech and convert it to other voices
//!
//! This library provides the core functionality for:
//! - Capturing microphone audio via cpal (PipeWire, PulseAudio, ALSA)
//! - Framing 16-bit PCM as WAV on a background capture thread
//! - Optional FLAC compression through ffmpeg
//! - A recordings library (SQLite index + per-speaker directories)
//! - Talking to a remote voice-conversion service over JSON/HTTP
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────────┐
//!                    │            AppController            │
//!                    └─────────────────────────────────────┘
//!                                      │
//!          ┌───────────────────────────┼───────────────────────────┐
//!          ▼                           ▼                           ▼
//!  ┌──────────────┐           ┌──────────────┐           ┌──────────────┐
//!  │ SampleSource │           │   Library    │           │  Converter   │
//!  │    (cpal)    │           │  (rusqlite)  │           │    (ureq)    │
//!  └──────────────┘           └──────────────┘           └──────────────┘
//!          │ i16 blocks                ▲
//!          ▼                           │ WAV / FLAC bytes
//!  ┌──────────────┐           ┌──────────────┐
//!  │CaptureWorker │ ────────▶ │  Compressor  │
//!  │ (PcmFramer)  │ WAV bytes │   (ffmpeg)   │
//!  └──────────────┘           └──────────────┘
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod library;
pub mod state;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use controller::AppController;
pub use error::{Result, VoxconvError};
