//! Device session error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors talking to the photometer.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// I/O error on the device connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// No response line within the read timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The device answered with an empty line.
    #[error("empty response")]
    EmptyResponse,

    /// Response bytes are not valid text.
    #[error("undecodable response: {}", String::from_utf8_lossy(.raw))]
    InvalidEncoding {
        /// Raw bytes received.
        raw: Vec<u8>,
    },

    /// First character of the response does not echo the command.
    #[error("echo mismatch: expected {expected:?}, got {response:?}")]
    EchoMismatch {
        /// Expected echo character.
        expected: char,
        /// Response received.
        response: String,
    },

    /// No open connection.
    #[error("device not connected")]
    NotConnected,

    /// The command is empty or not ASCII.
    #[error("invalid command: {0:?}")]
    InvalidCommand(String),

    /// Every attempt failed.
    #[error("no valid response to {command:?} after {tries} retries (last bytes: {:?})", String::from_utf8_lossy(.raw))]
    RetriesExhausted {
        /// Command sent.
        command: String,
        /// Retry budget that was consumed.
        tries: u32,
        /// Last raw bytes received, for diagnostics.
        raw: Vec<u8>,
    },

    /// Neither the configured address nor any scanned candidate answered.
    #[error("device not found (tried {0})")]
    NotFound(String),
}

impl DeviceError {
    /// Whether the node cannot run without operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::NotFound(_))
    }
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;
