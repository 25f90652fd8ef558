//! Framed channel over an async byte stream.
//!
//! The same channel type is used for the host-facing TCP socket, the radio
//! modem's serial port, and in-memory pipes in tests.

use std::mem;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tracing::{debug, warn};

use crate::core::FramingConfig;

use super::codec::{Frame, encode_frame};
use super::error::{FrameError, FrameResult};

/// Reading half of a framed channel.
///
/// Partially received frames are kept between calls, so a `receive_*` future
/// can be dropped (e.g. in `tokio::select!`) without losing bytes.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    config: FramingConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R, config: FramingConfig) -> Self {
        Self {
            inner: BufReader::new(reader),
            pending: Vec::new(),
            config,
        }
    }

    /// Read the next frame without dropping malformed ones.
    pub async fn read_frame(&mut self) -> FrameResult<Frame> {
        loop {
            let n = self
                .inner
                .read_until(self.config.frame_end, &mut self.pending)
                .await?;

            if n == 0 {
                if !self.pending.is_empty() {
                    debug!(
                        bytes = self.pending.len(),
                        "discarding unterminated frame at end of stream"
                    );
                    self.pending.clear();
                }
                return Err(FrameError::ConnectionClosed);
            }

            if self.pending.last() == Some(&self.config.frame_end) {
                self.pending.pop();
                let payload = mem::take(&mut self.pending);
                return Frame::decode(&payload, &self.config);
            }
        }
    }

    /// Receive the next well-formed frame as byte messages.
    ///
    /// Frames with broken escaping are logged and skipped.
    pub async fn receive_raw(&mut self) -> FrameResult<Frame> {
        loop {
            match self.read_frame().await {
                Err(e) if e.is_malformed_frame() => {
                    warn!(error = %e, "dropping malformed frame");
                }
                other => return other,
            }
        }
    }

    /// Receive the next well-formed frame as text messages.
    ///
    /// Frames that fail to decode are logged and skipped.
    pub async fn receive_frame(&mut self) -> FrameResult<Vec<String>> {
        loop {
            let frame = self.receive_raw().await?;
            match frame.to_texts(self.config.encoding) {
                Ok(messages) => {
                    debug!(count = messages.len(), "received frame");
                    return Ok(messages);
                }
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            }
        }
    }

    /// Framing parameters.
    pub fn config(&self) -> &FramingConfig {
        &self.config
    }
}

/// Writing half of a framed channel.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    config: FramingConfig,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(writer: W, config: FramingConfig) -> Self {
        Self {
            inner: writer,
            config,
        }
    }

    /// Send byte messages as one frame.
    pub async fn send<M: AsRef<[u8]>>(&mut self, messages: &[M]) -> FrameResult<()> {
        let wire = encode_frame(messages, &self.config);
        self.inner.write_all(&wire).await?;
        self.inner.flush().await?;
        debug!(
            count = messages.len(),
            bytes = wire.len(),
            "sent frame"
        );
        Ok(())
    }

    /// Send a decoded frame.
    pub async fn send_frame(&mut self, frame: &Frame) -> FrameResult<()> {
        self.send(frame.messages()).await
    }

    /// Send text messages as one frame.
    pub async fn send_texts<S: AsRef<str>>(&mut self, messages: &[S]) -> FrameResult<()> {
        let frame = Frame::from_texts(messages, self.config.encoding)?;
        self.send_frame(&frame).await
    }

    /// Send a single text message as one frame.
    pub async fn send_text(&mut self, message: &str) -> FrameResult<()> {
        self.send_texts(&[message]).await
    }

    /// Shut down the write direction.
    pub async fn shutdown(&mut self) -> FrameResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Framing parameters.
    pub fn config(&self) -> &FramingConfig {
        &self.config
    }
}

/// Bidirectional framed channel.
#[derive(Debug)]
pub struct FramedChannel<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> FramedChannel<S> {
    /// Wrap a stream.
    pub fn new(stream: S, config: FramingConfig) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read, config),
            writer: FrameWriter::new(write, config),
        }
    }

    /// Send byte messages as one frame.
    pub async fn send<M: AsRef<[u8]>>(&mut self, messages: &[M]) -> FrameResult<()> {
        self.writer.send(messages).await
    }

    /// Send text messages as one frame.
    pub async fn send_texts<T: AsRef<str>>(&mut self, messages: &[T]) -> FrameResult<()> {
        self.writer.send_texts(messages).await
    }

    /// Send a single text message as one frame.
    pub async fn send_text(&mut self, message: &str) -> FrameResult<()> {
        self.writer.send_text(message).await
    }

    /// Receive the next frame as text messages.
    pub async fn receive_frame(&mut self) -> FrameResult<Vec<String>> {
        self.reader.receive_frame().await
    }

    /// Receive the next frame as byte messages.
    pub async fn receive_raw(&mut self) -> FrameResult<Frame> {
        self.reader.receive_raw().await
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}
