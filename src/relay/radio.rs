//! Radio bridge to a child relay node.

use std::sync::Arc;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{FramingConfig, RadioConfig, SYNC_REPLY_CAPACITY};
use crate::device::Connector;
use crate::sync::{Reconciler, SyncError, SyncReport, SyncResult, is_sync_reply};
use crate::transport::{
    BoxedStream, Frame, FrameError, FrameReader, FrameResult, FrameWriter, OutgoingBuffer,
};

/// Framed link over a radio modem.
///
/// A background task reads every incoming frame. Frames whose first message
/// starts with `rsync ` go to the reconciler; everything else is appended
/// to the outgoing buffer.
pub struct RadioLink {
    connector: Arc<dyn Connector>,
    config: RadioConfig,
    framing: FramingConfig,
    writer: Option<FrameWriter<WriteHalf<BoxedStream>>>,
    reader: Option<(CancellationToken, JoinHandle<()>)>,
    replies_tx: mpsc::Sender<Frame>,
    replies: mpsc::Receiver<Frame>,
    outgoing: Arc<OutgoingBuffer>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RadioLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioLink")
            .field("port", &self.config.port)
            .field("open", &self.is_open())
            .finish()
    }
}

impl RadioLink {
    /// Open the radio port and start its reader.
    pub async fn open(
        connector: Arc<dyn Connector>,
        config: RadioConfig,
        framing: FramingConfig,
        outgoing: Arc<OutgoingBuffer>,
        cancel: CancellationToken,
    ) -> FrameResult<Self> {
        let (replies_tx, replies) = mpsc::channel(SYNC_REPLY_CAPACITY);
        let mut link = Self {
            connector,
            config,
            framing,
            writer: None,
            reader: None,
            replies_tx,
            replies,
            outgoing,
            cancel,
        };
        link.connect().await?;
        Ok(link)
    }

    /// Close and reopen the radio port.
    pub async fn reopen(&mut self) -> FrameResult<()> {
        self.close().await;
        self.connect().await
    }

    /// Whether the port is open.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Send messages to the child node as one frame.
    pub async fn send<M: AsRef<[u8]>>(&mut self, messages: &[M]) -> FrameResult<()> {
        let writer = self.writer.as_mut().ok_or(FrameError::ConnectionClosed)?;
        writer.send(messages).await
    }

    /// Pull the child's data files with `reconciler`.
    ///
    /// Holds the radio writer for the whole session.
    pub async fn pull(&mut self, reconciler: &Reconciler) -> SyncResult<SyncReport> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(SyncError::Frame(FrameError::ConnectionClosed))?;
        reconciler.pull(writer, &mut self.replies).await
    }

    /// Stop the reader and close the port.
    pub async fn close(&mut self) {
        if let Some((cancel, handle)) = self.reader.take() {
            cancel.cancel();
            let _ = handle.await;
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Radio parameters.
    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    async fn connect(&mut self) -> FrameResult<()> {
        let stream = self.connector.connect(&self.config.port).await?;
        let (read, write) = tokio::io::split(stream);
        info!(port = %self.config.port, baud = self.config.baud_rate, "radio link open");

        let token = self.cancel.child_token();
        let reader = FrameReader::new(read, self.framing);
        let handle = tokio::spawn(read_loop(
            reader,
            self.replies_tx.clone(),
            Arc::clone(&self.outgoing),
            token.clone(),
        ));

        self.writer = Some(FrameWriter::new(write, self.framing));
        self.reader = Some((token, handle));
        Ok(())
    }
}

async fn read_loop(
    mut reader: FrameReader<ReadHalf<BoxedStream>>,
    replies: mpsc::Sender<Frame>,
    outgoing: Arc<OutgoingBuffer>,
    cancel: CancellationToken,
) {
    let encoding = reader.config().encoding;
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = reader.receive_raw() => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "radio reader stopped");
                break;
            }
        };

        if is_sync_reply(&frame) {
            debug!(messages = frame.len(), "radio sync reply");
            if replies.send(frame).await.is_err() {
                break;
            }
            continue;
        }

        match frame.to_texts(encoding) {
            Ok(messages) => {
                debug!(count = messages.len(), "radio responses");
                outgoing.extend(messages);
            }
            Err(e) => warn!(error = %e, "dropping undecodable radio frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::PipeConnector;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reader_routes_frames() {
        let (connector, mut peers) = PipeConnector::new();
        let outgoing = Arc::new(OutgoingBuffer::new());
        let mut link = RadioLink::open(
            Arc::new(connector),
            RadioConfig::default(),
            FramingConfig::default(),
            Arc::clone(&outgoing),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut child = peers.recv().await.unwrap();
        link.send(&["rx"]).await.unwrap();
        assert_eq!(child.receive_frame().await.unwrap(), vec!["rx"]);

        child.send_texts(&["r, 19.50m"]).await.unwrap();
        child.send_texts(&["rsync files", "a.dat;1"]).await.unwrap();

        let batch = outgoing.wait_and_drain(Duration::from_secs(2)).await;
        assert_eq!(batch, vec!["r, 19.50m"]);

        let reply = tokio::time::timeout(Duration::from_secs(2), link.replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.messages()[0], b"rsync files");
        assert!(outgoing.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_replaces_port() {
        let (connector, mut peers) = PipeConnector::new();
        let mut link = RadioLink::open(
            Arc::new(connector),
            RadioConfig::default(),
            FramingConfig::default(),
            Arc::new(OutgoingBuffer::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let _first = peers.recv().await.unwrap();

        link.reopen().await.unwrap();
        let mut second = peers.recv().await.unwrap();
        link.send(&["cx"]).await.unwrap();
        assert_eq!(second.receive_frame().await.unwrap(), vec!["cx"]);

        link.close().await;
        assert!(!link.is_open());
        assert!(link.send(&["cx"]).await.is_err());
    }
}
