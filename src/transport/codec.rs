//! Frame encoding and decoding.
//!
//! Wire format of one frame:
//!
//! ```text
//! escape(msg_0) SEP escape(msg_1) SEP ... escape(msg_n) END
//! ```
//!
//! Inside a message the terminator, the separator and the escape byte itself
//! are stuffed as `ESC 0x1C`, `ESC 0x1D` and `ESC 0x1E`. Ordinary ASCII text
//! never contains any of them, so text frames look exactly like
//! `line\nline\r` on the wire.

use crate::core::{
    ESCAPED_ESCAPE, ESCAPED_FRAME_END, ESCAPED_MSG_SEP, FramingConfig, TextEncoding,
};

use super::error::{FrameError, FrameResult};

impl TextEncoding {
    /// Encode text to bytes.
    pub fn encode(self, text: &str) -> FrameResult<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| FrameError::Unencodable(c)))
                .collect(),
        }
    }

    /// Decode bytes to text.
    pub fn decode(self, bytes: &[u8]) -> FrameResult<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| FrameError::InvalidEncoding(e.to_string())),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// One decoded frame: an ordered list of byte messages.
///
/// A frame always holds at least one message once decoded; an empty payload
/// is a single empty message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    messages: Vec<Vec<u8>>,
}

impl Frame {
    /// Create a frame from byte messages.
    pub fn new(messages: Vec<Vec<u8>>) -> Self {
        Self { messages }
    }

    /// Create a frame from text messages.
    pub fn from_texts<S: AsRef<str>>(texts: &[S], encoding: TextEncoding) -> FrameResult<Self> {
        let messages = texts
            .iter()
            .map(|t| encoding.encode(t.as_ref()))
            .collect::<FrameResult<Vec<_>>>()?;
        Ok(Self { messages })
    }

    /// Messages in order.
    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }

    /// Consume the frame, returning its messages.
    pub fn into_messages(self) -> Vec<Vec<u8>> {
        self.messages
    }

    /// First message, if any.
    pub fn first(&self) -> Option<&[u8]> {
        self.messages.first().map(Vec::as_slice)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the frame holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Decode every message as text.
    pub fn to_texts(&self, encoding: TextEncoding) -> FrameResult<Vec<String>> {
        self.messages.iter().map(|m| encoding.decode(m)).collect()
    }

    /// Encode to wire bytes, terminator included.
    pub fn encode(&self, config: &FramingConfig) -> Vec<u8> {
        encode_frame(&self.messages, config)
    }

    /// Decode a payload read from the wire (terminator already stripped).
    pub fn decode(payload: &[u8], config: &FramingConfig) -> FrameResult<Self> {
        decode_frame(payload, config)
    }
}

/// Join messages into one terminated frame.
pub fn encode_frame<M: AsRef<[u8]>>(messages: &[M], config: &FramingConfig) -> Vec<u8> {
    let size: usize = messages.iter().map(|m| m.as_ref().len() + 1).sum();
    let mut out = Vec::with_capacity(size.max(1));
    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            out.push(config.separator);
        }
        escape_into(message.as_ref(), config, &mut out);
    }
    out.push(config.frame_end);
    out
}

/// Split a frame payload into unescaped messages.
pub fn decode_frame(payload: &[u8], config: &FramingConfig) -> FrameResult<Frame> {
    let mut messages = Vec::new();
    let mut current = Vec::new();
    let mut bytes = payload.iter().copied();

    while let Some(byte) = bytes.next() {
        if byte == config.escape {
            let code = bytes.next().ok_or(FrameError::IncompleteEscape)?;
            current.push(unescape_code(code, config)?);
        } else if byte == config.separator {
            messages.push(std::mem::take(&mut current));
        } else {
            current.push(byte);
        }
    }
    messages.push(current);

    Ok(Frame { messages })
}

fn escape_into(message: &[u8], config: &FramingConfig, out: &mut Vec<u8>) {
    for &byte in message {
        let code = if byte == config.frame_end {
            ESCAPED_FRAME_END
        } else if byte == config.separator {
            ESCAPED_MSG_SEP
        } else if byte == config.escape {
            ESCAPED_ESCAPE
        } else {
            out.push(byte);
            continue;
        };
        out.push(config.escape);
        out.push(code);
    }
}

fn unescape_code(code: u8, config: &FramingConfig) -> FrameResult<u8> {
    match code {
        ESCAPED_FRAME_END => Ok(config.frame_end),
        ESCAPED_MSG_SEP => Ok(config.separator),
        ESCAPED_ESCAPE => Ok(config.escape),
        other => Err(FrameError::InvalidEscape(other)),
    }
}
