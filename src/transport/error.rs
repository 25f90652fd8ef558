//! Transport layer error types.

use std::io;

use thiserror::Error;

/// Framed channel errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O error on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// Escape byte followed by an unknown code.
    #[error("invalid escape sequence: 0x{0:02x}")]
    InvalidEscape(u8),

    /// Escape byte at the very end of a message.
    #[error("incomplete escape sequence")]
    IncompleteEscape,

    /// Message bytes are not valid in the configured text encoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Text cannot be represented in the configured encoding.
    #[error("character {0:?} cannot be encoded")]
    Unencodable(char),
}

impl FrameError {
    /// Whether only the current frame is affected and reading can continue
    /// with the next one.
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidEscape(_)
                | FrameError::IncompleteEscape
                | FrameError::InvalidEncoding(_)
        )
    }

    /// Whether the stream is unusable and must be reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Io(_) | FrameError::ConnectionClosed)
    }
}

/// Result type for transport operations.
pub type FrameResult<T> = Result<T, FrameError>;
