//! Configuration loading and types for voxconv
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxconv/config.toml)
//! 3. Environment variables (VOXCONV_*)
//! 4. CLI arguments (highest priority)

use crate::audio::compress::AudioFileFormat;
use crate::audio::framer::{RiffSizeConvention, WavSpec};
use crate::error::VoxconvError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# voxconv Configuration
#
# Location: ~/.config/voxconv/config.toml
# All settings can be overridden via CLI flags

# State file for external integrations (status bars, scripts)
# Use "auto" for default location ($XDG_RUNTIME_DIR/voxconv/state),
# a custom path, or "disabled" to turn off. voxconv writes
# "idle", "recording" or "converting" to this file whenever it changes.
state_file = "auto"

[audio]
# Audio input device ("default" uses system default)
# List devices with: voxconv devices
device = "default"

# Sample rate in Hz written into every recording
sample_rate = 32000

# Samples read from the device per block
block_size = 1024

# Maximum recording duration in seconds (safety limit)
max_duration_secs = 120

# File format for new recordings: "wav" or "flac"
# flac pipes the finished WAV through ffmpeg
format = "wav"

# Value written into the RIFF size field (bytes 4..8):
# - file_length: total file length (44 + payload), as older voxconv
#   builds and the conversion server expect
# - riff: standard RIFF chunk size (36 + payload)
riff_size = "file_length"

[remote]
# Base URL of the voice-conversion service
endpoint = "http://192.168.1.67:8090/api/"

# Request timeout in seconds
timeout_secs = 8

# Optional bearer token (or set VOXCONV_API_KEY)
# api_key = "..."

[library]
# Where recordings and their index live
# "auto" uses ~/.local/share/voxconv/recordings
path = "auto"

# [encoder]
# Path to ffmpeg for FLAC output (found on PATH when omitted)
# ffmpeg_path = "/usr/bin/ffmpeg"
"#;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Optional path to state file for external integrations
    /// When set, voxconv writes its current state ("idle", "recording",
    /// "converting") to this file whenever state changes.
    #[serde(default)]
    pub state_file: Option<String>,

    pub audio: AudioConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// cpal input device name, or "default"
    pub device: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Samples per device read
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Maximum recording duration in seconds (safety limit)
    pub max_duration_secs: u32,

    /// Output format for new recordings
    #[serde(default)]
    pub format: AudioFileFormat,

    /// Convention for the RIFF total-size field
    #[serde(default)]
    pub riff_size: RiffSizeConvention,
}

impl AudioConfig {
    /// Container parameters for a mono 16-bit capture at the configured rate
    pub fn wav_spec(&self) -> WavSpec {
        WavSpec {
            riff_size: self.riff_size,
            ..WavSpec::pcm16_mono(self.sample_rate)
        }
    }
}

/// Remote conversion service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Base endpoint URL (e.g., "http://192.168.1.67:8090/api/")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional API key sent as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Recordings library configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// "auto" or an explicit directory
    #[serde(default = "default_library_path")]
    pub path: String,
}

/// External encoder configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// Explicit ffmpeg binary; resolved from PATH when unset
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

fn default_block_size() -> usize {
    1024
}

fn default_endpoint() -> String {
    "http://192.168.1.67:8090/api/".to_string()
}

fn default_timeout_secs() -> u64 {
    8
}

fn default_library_path() -> String {
    "auto".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_library_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: Some("auto".to_string()),
            audio: AudioConfig {
                device: "default".to_string(),
                sample_rate: 32000,
                block_size: default_block_size(),
                max_duration_secs: 120,
                format: AudioFileFormat::Wav,
                riff_size: RiffSizeConvention::FileLength,
            },
            remote: RemoteConfig::default(),
            library: LibraryConfig::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxconv")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the runtime directory for ephemeral files (state)
    pub fn runtime_dir() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, otherwise fall back to /tmp
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("voxconv")
    }

    /// Resolve the state file path from config
    /// Returns None if state_file is not configured or explicitly disabled
    pub fn resolve_state_file(&self) -> Option<PathBuf> {
        self.state_file.as_ref().and_then(|path| {
            match path.to_lowercase().as_str() {
                "disabled" | "none" | "off" | "false" => None,
                "auto" => Some(Self::runtime_dir().join("state")),
                _ => Some(PathBuf::from(path)),
            }
        })
    }

    /// Get the data directory path
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "voxconv")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve the library root ("auto" maps to the data directory)
    pub fn library_dir(&self) -> PathBuf {
        match self.library.path.as_str() {
            "auto" | "" => Self::data_dir().join("recordings"),
            path => PathBuf::from(path),
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), VoxconvError> {
        self.audio
            .wav_spec()
            .validate()
            .map_err(|e| VoxconvError::Config(format!("[audio] {}", e)))?;
        if self.audio.block_size == 0 {
            return Err(VoxconvError::Config(
                "[audio] block_size must be at least 1".into(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(VoxconvError::Config(
                "[remote] timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, VoxconvError> {
    // Start with defaults
    let mut config = Config::default();

    // Determine config file path
    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    // Load from file if it exists
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| VoxconvError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| VoxconvError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    apply_env_overrides(&mut config)?;

    Ok(config)
}

/// Override from environment variables
fn apply_env_overrides(config: &mut Config) -> Result<(), VoxconvError> {
    if let Ok(endpoint) = std::env::var("VOXCONV_ENDPOINT") {
        config.remote.endpoint = endpoint;
    }
    if let Ok(key) = std::env::var("VOXCONV_API_KEY") {
        config.remote.api_key = Some(key);
    }
    if let Ok(path) = std::env::var("VOXCONV_LIBRARY") {
        config.library.path = path;
    }
    if let Ok(format) = std::env::var("VOXCONV_AUDIO_FORMAT") {
        config.audio.format = format
            .parse()
            .map_err(|e| VoxconvError::Config(format!("VOXCONV_AUDIO_FORMAT: {}", e)))?;
    }
    Ok(())
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<(), VoxconvError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| VoxconvError::Config(format!("Failed to create config dir: {}", e)))?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| VoxconvError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, contents)
        .map_err(|e| VoxconvError::Config(format!("Failed to write config: {}", e)))?;

    Ok(())
}
