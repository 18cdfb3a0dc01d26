//! Error types for ps88.
//!
//! `Error` covers infrastructure failures (configuration, storage, devices,
//! channels). Failures that originate in user scripts never surface as
//! `Error`; they are contained by the host and reported as
//! [`ScriptFault`] values in the log.

use std::fmt;

use thiserror::Error;

/// Result type alias for ps88 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ps88
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistent storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Audio or MIDI device error
    #[error("Device error: {0}")]
    Device(String),

    /// The other end of the host channel is gone
    #[error("Host channel closed")]
    ChannelClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WAV file error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Location-annotated message extracted from a Rhai error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    /// Error message.
    pub message: String,
    /// Line number (1-based).
    pub line: Option<u32>,
    /// Column number (1-based).
    pub column: Option<u32>,
}

impl ScriptDiagnostic {
    /// Create a diagnostic from a Rhai parse error.
    pub fn from_rhai_parse(err: &rhai::ParseError) -> Self {
        Self::with_position(err.to_string(), err.position())
    }

    /// Create a diagnostic from a Rhai runtime error.
    ///
    /// Errors raised inside a called function are wrapped by Rhai, and the
    /// wrapper has no position when the call came from Rust. The location
    /// is taken from the innermost error that has one.
    pub fn from_rhai_runtime(err: &rhai::EvalAltResult) -> Self {
        Self::with_position(err.to_string(), innermost_position(err))
    }

    /// Create a diagnostic for a panic raised inside a callback.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            format!("panic: {}", text)
        } else if let Some(text) = payload.downcast_ref::<String>() {
            format!("panic: {}", text)
        } else {
            "panic: <non-string payload>".to_string()
        };
        Self {
            message,
            line: None,
            column: None,
        }
    }

    fn with_position(message: String, pos: rhai::Position) -> Self {
        Self {
            message,
            line: if pos.is_none() {
                None
            } else {
                pos.line().map(|l| l as u32)
            },
            column: if pos.is_none() {
                None
            } else {
                pos.position().map(|c| c as u32)
            },
        }
    }
}

fn innermost_position(err: &rhai::EvalAltResult) -> rhai::Position {
    let mut pos = err.position();
    let mut current = err;
    while let rhai::EvalAltResult::ErrorInFunctionCall(_, _, inner, _) = current {
        if !inner.position().is_none() {
            pos = inner.position();
        }
        current = inner;
    }
    pos
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{} (line {}, column {})", self.message, line, column),
            (Some(line), None) => write!(f, "{} (line {})", self.message, line),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Which user callback an invocation belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Audio,
    Gui,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::Audio => write!(f, "audio"),
            CallbackKind::Gui => write!(f, "gui"),
        }
    }
}

/// A failure raised by user script code.
///
/// These are contained by the host: they clear the registration and are
/// logged, but never propagate to the control side as errors.
#[derive(Debug, Clone, Error)]
pub enum ScriptFault {
    /// Compiling or evaluating the top level of a script failed.
    #[error("build failed: {0}")]
    BuildFailure(ScriptDiagnostic),

    /// A registered callback returned an error or panicked.
    #[error("{kind} callback fault: {diagnostic}")]
    CallbackFault {
        kind: CallbackKind,
        diagnostic: ScriptDiagnostic,
    },
}

/// Reason a shape appended from a gui callback was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} must not be negative")]
    Negative { field: &'static str },

    #[error("{field} must be an integer color in 0..=0xFFFFFFFF")]
    BadColor { field: &'static str },

    #[error("{field} has the wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("point {index} must be an [x, y] pair")]
    BadPoint { index: usize },
}
