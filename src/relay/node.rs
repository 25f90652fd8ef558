//! Relay node: multiplexes one upstream channel onto one downstream target.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::listener::InboundListener;
use super::radio::RadioLink;
use crate::core::{ConfigError, NodeConfig};
use crate::device::{Connector, DeviceError, DeviceSession};
use crate::sync::{Reconciler, SyncError, SyncRequest};
use crate::transport::{FrameError, FrameWriter, FramedChannel, OutgoingBuffer};

/// Errors that stop a relay node.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to bind the inbound listener.
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Upstream channel error.
    #[error("upstream error: {0}")]
    Frame(#[from] FrameError),

    /// Device session error.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Reconciliation error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Neither the radio nor the device could be opened.
    #[error("no downstream target available")]
    NoDownstream,

    /// An upstream radio port is configured but no connector can open it.
    #[error("no connector for the upstream radio port")]
    NoUpstream,
}

impl RelayError {
    /// Whether the node cannot start or continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            RelayError::Bind(_)
            | RelayError::Config(_)
            | RelayError::NoDownstream
            | RelayError::NoUpstream => true,
            RelayError::Device(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Where forwarded commands go, selected once at startup.
#[derive(Debug)]
pub enum Downstream {
    /// Locally attached photometer.
    Device(DeviceSession),
    /// Radio bridge to a child node.
    Radio(RadioLink),
}

impl Downstream {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Downstream::Device(_) => "device",
            Downstream::Radio(_) => "radio",
        }
    }
}

/// A relay node.
#[derive(Debug)]
pub struct RelayNode {
    config: NodeConfig,
    downstream: Downstream,
    reconciler: Reconciler,
    outgoing: Arc<OutgoingBuffer>,
}

impl RelayNode {
    /// Open the downstream target.
    ///
    /// The radio is preferred when configured and a radio connector is
    /// given; otherwise, or if the radio port cannot be opened, the device
    /// is bound. Device discovery failure is fatal.
    pub async fn start(
        config: NodeConfig,
        device_connector: Arc<dyn Connector>,
        radio_connector: Option<Arc<dyn Connector>>,
        cancel: &CancellationToken,
    ) -> RelayResult<Self> {
        config.validate()?;
        let reconciler = Reconciler::new(config.sync.clone(), config.framing.encoding);

        if let (Some(radio), Some(connector)) = (config.radio.clone(), radio_connector) {
            let outgoing = Arc::new(OutgoingBuffer::new());
            match RadioLink::open(
                connector,
                radio,
                config.framing,
                Arc::clone(&outgoing),
                cancel.child_token(),
            )
            .await
            {
                Ok(link) => {
                    info!(port = %link.config().port, "downstream: radio");
                    return Ok(Self {
                        config,
                        downstream: Downstream::Radio(link),
                        reconciler,
                        outgoing,
                    });
                }
                Err(e) => warn!(error = %e, "radio unavailable, falling back to device"),
            }
        }

        let session =
            DeviceSession::open(device_connector, config.device.clone(), cancel.child_token())
                .await
                .map_err(|e| {
                    error!(error = %e, "no downstream target");
                    if e.is_fatal() {
                        RelayError::Device(e)
                    } else {
                        RelayError::NoDownstream
                    }
                })?;
        session.start_continuous_read();
        let address = session.address().await;
        info!(address = %address, "downstream: device");

        Ok(Self {
            outgoing: session.queue(),
            config,
            downstream: Downstream::Device(session),
            reconciler,
        })
    }

    /// The selected downstream target.
    pub fn downstream(&self) -> &Downstream {
        &self.downstream
    }

    /// Buffer of responses waiting to go upstream.
    pub fn outgoing(&self) -> Arc<OutgoingBuffer> {
        Arc::clone(&self.outgoing)
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Relay between `upstream` and the downstream target until the
    /// upstream closes or `cancel` fires.
    pub async fn run<S>(
        &mut self,
        upstream: FramedChannel<S>,
        cancel: &CancellationToken,
    ) -> RelayResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = upstream.split();
        let writer = Arc::new(Mutex::new(writer));

        let drain_cancel = cancel.child_token();
        let drain = tokio::spawn(drain_loop(
            Arc::clone(&self.outgoing),
            Arc::clone(&writer),
            self.config.relay.flush_interval,
            drain_cancel.clone(),
        ));

        let result = loop {
            let messages = tokio::select! {
                () = cancel.cancelled() => {
                    info!("relay stopping");
                    break Ok(());
                }
                messages = reader.receive_frame() => messages,
            };

            match messages {
                Ok(messages) => {
                    for message in messages {
                        self.dispatch(&message, &writer).await;
                    }
                }
                Err(FrameError::ConnectionClosed) => {
                    info!("upstream closed");
                    break Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "upstream failed");
                    break Err(e.into());
                }
            }
        };

        drain_cancel.cancel();
        let _ = drain.await;
        result
    }

    /// Accept host connections on `listener` and relay each in turn until
    /// `cancel` fires.
    pub async fn serve(
        &mut self,
        listener: &InboundListener,
        cancel: &CancellationToken,
    ) -> RelayResult<()> {
        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((upstream, peer)) => {
                    if let Err(e) = self.run(upstream, cancel).await {
                        warn!(%peer, error = %e, "host session ended with error");
                    }
                    info!(%peer, "host session ended");
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    self.backoff(cancel).await;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Relay from an upstream reached through `connector`, such as the
    /// radio port of a child node, reopening it whenever it closes.
    pub async fn serve_connector(
        &mut self,
        connector: Arc<dyn Connector>,
        address: &str,
        cancel: &CancellationToken,
    ) -> RelayResult<()> {
        while !cancel.is_cancelled() {
            match connector.connect(address).await {
                Ok(stream) => {
                    info!(address, kind = connector.kind(), "upstream open");
                    let upstream = FramedChannel::new(stream, self.config.framing);
                    if let Err(e) = self.run(upstream, cancel).await {
                        warn!(address, error = %e, "upstream session ended with error");
                    }
                }
                Err(e) => warn!(address, error = %e, "upstream unavailable"),
            }
            self.backoff(cancel).await;
        }
        self.shutdown().await;
        Ok(())
    }

    /// Stop background readers and close the downstream.
    pub async fn shutdown(&mut self) {
        match &mut self.downstream {
            Downstream::Device(session) => session.stop_continuous_read().await,
            Downstream::Radio(link) => link.close().await,
        }
        info!(downstream = self.downstream.kind(), "relay shut down");
    }

    async fn dispatch<W>(&mut self, message: &str, writer: &Arc<Mutex<FrameWriter<W>>>)
    where
        W: AsyncWrite + Unpin,
    {
        if message.trim().is_empty() {
            debug!("skipping blank message");
            return;
        }

        match SyncRequest::parse(message) {
            Some(SyncRequest::Trigger) => self.pull().await,
            Some(request) => {
                let mut writer = writer.lock().await;
                if let Err(e) = self.reconciler.serve(&request, &mut *writer).await {
                    warn!(error = %e, ?request, "sync request failed");
                }
            }
            None => self.forward(message).await,
        }
    }

    async fn forward(&mut self, message: &str) {
        match &mut self.downstream {
            Downstream::Device(session) => {
                let response = session.forward(message).await;
                self.outgoing.push(response);
            }
            Downstream::Radio(link) => {
                let sent = link.send(&[message]).await;
                if let Err(e) = sent {
                    warn!(error = %e, "radio send failed");
                    if self.reopen_radio().await {
                        if let Downstream::Radio(link) = &mut self.downstream {
                            if let Err(e) = link.send(&[message]).await {
                                warn!(error = %e, "radio send failed after reopen, dropping");
                            }
                        }
                    }
                }
            }
        }
    }

    async fn pull(&mut self) {
        let Downstream::Radio(link) = &mut self.downstream else {
            debug!("sync trigger ignored: no radio peer");
            return;
        };

        let outcome = link.pull(&self.reconciler).await;
        match outcome {
            Ok(report) => info!(
                fetched = report.fetched.len(),
                skipped = report.skipped.len(),
                "sync complete"
            ),
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "sync aborted");
                self.reopen_radio().await;
            }
            Err(e) => warn!(error = %e, "sync aborted"),
        }
    }

    async fn reopen_radio(&mut self) -> bool {
        let backoff = self.config.relay.downstream_backoff;
        let Downstream::Radio(link) = &mut self.downstream else {
            return false;
        };
        tokio::time::sleep(backoff).await;
        match link.reopen().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "radio reopen failed");
                false
            }
        }
    }

    async fn backoff(&mut self, cancel: &CancellationToken) {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(self.config.relay.downstream_backoff) => {}
        }
    }
}

/// Sole drainer of the outgoing buffer: each non-empty batch goes upstream
/// as one frame.
async fn drain_loop<S>(
    outgoing: Arc<OutgoingBuffer>,
    writer: Arc<Mutex<FrameWriter<WriteHalf<S>>>>,
    max_wait: Duration,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let batch = tokio::select! {
            () = cancel.cancelled() => break,
            batch = outgoing.wait_and_drain(max_wait) => batch,
        };
        if batch.is_empty() {
            continue;
        }

        let mut writer = writer.lock().await;
        if let Err(e) = writer.send_texts(&batch).await {
            warn!(error = %e, lost = batch.len(), "failed to send responses upstream");
            if e.is_fatal() {
                break;
            }
        }
    }
    debug!("drain loop stopped");
}
