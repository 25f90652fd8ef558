//! In-memory radio ports for unit tests.

use std::io;

use async_trait::async_trait;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::mpsc;

use crate::core::FramingConfig;
use crate::device::Connector;
use crate::transport::{BoxedStream, FramedChannel};

/// Connector whose every `connect` yields a fresh in-memory pipe; the far
/// end of each pipe is handed to the test as a framed channel.
#[derive(Debug)]
pub struct PipeConnector {
    peers: mpsc::UnboundedSender<FramedChannel<DuplexStream>>,
}

impl PipeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FramedChannel<DuplexStream>>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self, _address: &str) -> io::Result<BoxedStream> {
        let (near, far) = duplex(64 * 1024);
        self.peers
            .send(FramedChannel::new(far, FramingConfig::default()))
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "test dropped the pipe"))?;
        Ok(Box::new(near))
    }

    fn kind(&self) -> &'static str {
        "pipe"
    }
}
