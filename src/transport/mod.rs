//! Framed Channel
//!
//! Message framing used on every hop between host, relay nodes and radio
//! peers. It provides:
//!
//! - **Codec**: [`Frame`], [`encode_frame`], [`decode_frame`] with byte
//!   stuffing of embedded delimiters
//! - **Channel**: [`FramedChannel`] and its [`FrameReader`] / [`FrameWriter`]
//!   halves over any async byte stream
//! - **Outgoing buffer**: [`OutgoingBuffer`], the response queue drained by
//!   the relay
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Relay / Sync / Device        │
//! ├──────────────────────────────┤
//! │ Framed Channel               │  ← This module
//! │   messages ⇄ frames ⇄ bytes  │
//! ├──────────────────────────────┤
//! │ TCP socket / serial port     │
//! └──────────────────────────────┘
//! ```

mod buffer;
mod channel;
mod codec;
mod error;
mod stream;

pub use buffer::OutgoingBuffer;
pub use channel::*;
pub use codec::{Frame, decode_frame, encode_frame};
pub use error::*;
pub use stream::*;
