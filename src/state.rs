//! Application state
//!
//! Idle → Recording → Idle, and Idle → Converting → Idle.
//! Only one recording or conversion runs at a time.

use crate::library::SpeakerClass;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Nothing in progress
    Idle,

    /// Capturing from the microphone
    Recording {
        /// When recording started
        started_at: Instant,
    },

    /// Waiting on the conversion service
    Converting {
        /// Library id of the original being converted
        recording_id: i64,
        /// Speaker class requested
        target: SpeakerClass,
    },
}

impl State {
    pub fn new() -> Self {
        State::Idle
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, State::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, State::Recording { .. })
    }

    pub fn is_converting(&self) -> bool {
        matches!(self, State::Converting { .. })
    }

    /// Get recording duration if currently recording
    pub fn recording_duration(&self) -> Option<std::time::Duration> {
        match self {
            State::Recording { started_at } => Some(started_at.elapsed()),
            _ => None,
        }
    }

    /// Single word written to the state file
    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Recording { .. } => "recording",
            State::Converting { .. } => "converting",
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Recording { started_at } => {
                write!(f, "Recording ({:.1}s)", started_at.elapsed().as_secs_f32())
            }
            State::Converting {
                recording_id,
                target,
            } => write!(f, "Converting #{} to speaker {}", recording_id, target),
        }
    }
}
