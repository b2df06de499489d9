use std::fmt;

use thiserror::Error;

/// Which stage of slide preparation rejected a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The source file could not be opened or decoded.
    Decode,
    /// Pairing, matting, blurring or resizing failed on decodable input.
    Composite,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => f.write_str("decode"),
            Self::Composite => f.write_str("composite"),
        }
    }
}

/// Per-picture failure reported by the compositor.
///
/// These never escape the prefetch worker; they are logged and the request is
/// discarded.
#[derive(Debug, Clone, Error)]
#[error("{kind} failed: {message}")]
pub struct CompositeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl CompositeFailure {
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Decode,
            message: message.into(),
        }
    }

    pub fn composite(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Composite,
            message: message.into(),
        }
    }
}

/// Display power control errors. Callers treat these as "state unknown".
#[derive(Debug, Error)]
pub enum DisplayPowerError {
    #[error("display power control unavailable: {0}")]
    Unavailable(String),

    #[error("display power command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}
