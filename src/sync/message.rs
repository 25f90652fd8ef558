//! Reconciliation control messages.
//!
//! Every message starts with the reserved keyword:
//!
//! ```text
//! rsync                 trigger a pull from the radio peer (host → relay)
//! rsync list            request the peer's inventory
//! rsync files           inventory header, followed by `path;timestamp` entries
//! rsync <path>          request a file, or header of its content frame
//! ```

use thiserror::Error;

use super::inventory::Inventory;
use crate::core::{SYNC_FILES, SYNC_KEYWORD, SYNC_LIST, TextEncoding};
use crate::transport::Frame;

/// Errors decoding a reconciliation frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The frame does not start with the reserved keyword.
    #[error("not a reconciliation frame")]
    NotSync,

    /// Header text could not be decoded.
    #[error("undecodable header")]
    InvalidHeader,

    /// Header is a request, not a reply.
    #[error("unexpected header {0:?}")]
    UnexpectedHeader(String),

    /// A file frame without its content message.
    #[error("file frame for {0:?} has no content")]
    MissingContent(String),
}

/// A request handled by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// Bare `rsync`: pull from the radio peer.
    Trigger,
    /// `rsync list`: send our inventory.
    List,
    /// `rsync <path>`: send one file.
    File(String),
}

impl SyncRequest {
    /// Parse a control message, or `None` if it is not a request.
    ///
    /// `rsync files` is a reply header and is not a request.
    pub fn parse(message: &str) -> Option<Self> {
        let message = message.trim();
        if message == SYNC_KEYWORD {
            return Some(Self::Trigger);
        }
        let rest = message
            .strip_prefix(SYNC_KEYWORD)?
            .strip_prefix(' ')?
            .trim();
        match rest {
            "" => Some(Self::Trigger),
            SYNC_LIST => Some(Self::List),
            SYNC_FILES => None,
            path => Some(Self::File(path.to_string())),
        }
    }

    /// Wire form of the request.
    pub fn to_message(&self) -> String {
        match self {
            Self::Trigger => SYNC_KEYWORD.to_string(),
            Self::List => format!("{SYNC_KEYWORD} {SYNC_LIST}"),
            Self::File(path) => file_header(path),
        }
    }
}

/// A reply received by the initiating side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReply {
    /// The peer's inventory.
    Inventory(Inventory),
    /// Content of one requested file.
    File {
        /// Relative path.
        path: String,
        /// Raw content.
        content: Vec<u8>,
    },
}

impl SyncReply {
    /// Decode a reply frame.
    pub fn parse(frame: &Frame, encoding: TextEncoding) -> Result<Self, MessageError> {
        let header = frame.first().ok_or(MessageError::NotSync)?;
        let header = encoding
            .decode(header)
            .map_err(|_| MessageError::InvalidHeader)?;

        match SyncRequest::parse(&header) {
            None if is_sync_message(&header) => {
                let entries = frame.messages()[1..]
                    .iter()
                    .filter_map(|m| encoding.decode(m).ok())
                    .collect::<Vec<_>>();
                Ok(Self::Inventory(Inventory::from_entries(&entries)))
            }
            Some(SyncRequest::File(path)) => {
                let content = frame
                    .messages()
                    .get(1)
                    .cloned()
                    .ok_or_else(|| MessageError::MissingContent(path.clone()))?;
                Ok(Self::File { path, content })
            }
            Some(_) => Err(MessageError::UnexpectedHeader(header)),
            None => Err(MessageError::NotSync),
        }
    }
}

/// Whether a message is reconciliation traffic (`rsync` or `rsync ...`).
pub fn is_sync_message(message: &str) -> bool {
    message
        .strip_prefix(SYNC_KEYWORD)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

/// Whether a raw frame is a reply addressed to the reconciler.
///
/// Only frames whose first message starts with `rsync ` qualify.
pub fn is_sync_reply(frame: &Frame) -> bool {
    frame
        .first()
        .is_some_and(|m| m.starts_with(SYNC_KEYWORD.as_bytes()) && m.get(SYNC_KEYWORD.len()) == Some(&b' '))
}

/// Header of a file request or content frame.
pub fn file_header(path: &str) -> String {
    format!("{SYNC_KEYWORD} {path}")
}
