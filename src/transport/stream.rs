//! Type-erased byte streams.

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional async byte stream (serial port, TCP socket, pipe).
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// Boxed stream returned by connectors.
pub type BoxedStream = Box<dyn DuplexStream>;
