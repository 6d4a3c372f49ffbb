//! Error types for the claw-daw library
//!
//! This module provides a unified error handling system for all operations
//! that can fail: script commands, project validation, rendering, mixing,
//! metering, and the quality/generator workflows.

use std::fmt;

/// Main error type for the claw-daw library
#[derive(Debug, Clone)]
pub enum ClawError {
    /// Malformed user input (timecode, unknown command, bad argument)
    InvalidInput(String),

    /// Operation is valid but the current state forbids it
    /// (no open project, no free MIDI channel, hard limit reached)
    InvalidState(String),

    /// A name reference did not resolve (pattern, instrument id, sample pack)
    Reference(String),

    /// Project failed validation/migration invariants on load
    Validation(String),

    /// A required mix-spec rule was violated
    MixSpec(String),

    /// A master or stems loudness/peak/correlation gate failed
    Gate(String),

    /// An external tool (SoundFont renderer, media tool) failed or
    /// produced no output
    ExternalTool(String),

    /// Generator acceptance checks failed for a style pack
    Acceptance(Vec<String>),

    /// A headless script command failed, annotated with its line number
    /// and the original command text
    Script {
        line: usize,
        command: String,
        message: String,
    },

    /// MIDI file error
    Midi(String),

    /// WAV read/write error
    Wav(String),

    /// JSON (de)serialization error
    Json(String),

    /// IO error
    Io(String),
}

impl fmt::Display for ClawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClawError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            ClawError::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            ClawError::Reference(msg) => write!(f, "unresolved reference: {}", msg),
            ClawError::Validation(msg) => write!(f, "validation failed: {}", msg),
            ClawError::MixSpec(msg) => write!(f, "mix spec invalid: {}", msg),
            ClawError::Gate(msg) => write!(f, "gate failed: {}", msg),
            ClawError::ExternalTool(msg) => write!(f, "external tool failed: {}", msg),
            ClawError::Acceptance(errors) => {
                write!(f, "acceptance failed:")?;
                for e in errors {
                    write!(f, "\n- {}", e)?;
                }
                Ok(())
            }
            ClawError::Script {
                line,
                command,
                message,
            } => {
                write!(f, "script error line {}: {} ({})", line, command, message)
            }
            ClawError::Midi(msg) => write!(f, "MIDI error: {}", msg),
            ClawError::Wav(msg) => write!(f, "WAV error: {}", msg),
            ClawError::Json(msg) => write!(f, "JSON error: {}", msg),
            ClawError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for ClawError {}

impl From<std::io::Error> for ClawError {
    fn from(err: std::io::Error) -> Self {
        ClawError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClawError {
    fn from(err: serde_json::Error) -> Self {
        ClawError::Json(err.to_string())
    }
}

impl From<hound::Error> for ClawError {
    fn from(err: hound::Error) -> Self {
        ClawError::Wav(err.to_string())
    }
}

impl From<String> for ClawError {
    fn from(err: String) -> Self {
        ClawError::InvalidInput(err)
    }
}

impl From<&str> for ClawError {
    fn from(err: &str) -> Self {
        ClawError::InvalidInput(err.to_string())
    }
}

/// Result type alias for claw-daw operations
pub type Result<T> = std::result::Result<T, ClawError>;
