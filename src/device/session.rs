//! Photometer session.
//!
//! Owns the link to one photometer and serialises every exchange on it. A
//! command is written, the session waits the settle delay, then reads one
//! response line and checks that it echoes the command's first character.
//! Failed attempts are followed by exactly one reset each.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connector::Connector;
use super::discovery::{Discovery, discover};
use super::error::{DeviceError, DeviceResult};
use crate::core::{COMMAND_TERMINATOR, DeviceConfig, RESPONSE_LINE_END};
use crate::transport::{BoxedStream, OutgoingBuffer};

/// Window for each read when flushing stale input or polling.
const QUIET_WINDOW: Duration = Duration::from_millis(10);

/// Upper bound on reads per flush or poll.
const MAX_QUIET_READS: usize = 64;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No open link.
    Disconnected,
    /// Opening or reopening the link.
    Connecting,
    /// Link open and answering.
    Ready,
    /// The last attempt failed; retries remain for the current command.
    Degraded {
        /// Retries left for the command in flight.
        retries_left: u32,
    },
}

/// Open byte stream to the photometer.
struct Link {
    stream: BufReader<BoxedStream>,
    pending: Vec<u8>,
}

impl Link {
    fn new(stream: BoxedStream) -> Self {
        Self {
            stream: BufReader::new(stream),
            pending: Vec::new(),
        }
    }

    async fn write_command(&mut self, command: &str) -> DeviceResult<()> {
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one line including its terminator.
    ///
    /// Bytes of a line cut off by the timeout stay in `pending` and are
    /// completed by the next call.
    async fn read_line(&mut self, limit: Duration) -> DeviceResult<Vec<u8>> {
        let read = async {
            loop {
                let n = self
                    .stream
                    .read_until(RESPONSE_LINE_END, &mut self.pending)
                    .await?;
                if n == 0 {
                    return Err(DeviceError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
                if self.pending.last() == Some(&RESPONSE_LINE_END) {
                    return Ok(mem::take(&mut self.pending));
                }
            }
        };
        tokio::time::timeout(limit, read)
            .await
            .map_err(|_| DeviceError::Timeout(limit))?
    }

    /// Discard everything already received.
    async fn flush_input(&mut self) -> usize {
        let mut discarded = mem::take(&mut self.pending).len();
        for _ in 0..MAX_QUIET_READS {
            let n = match tokio::time::timeout(QUIET_WINDOW, self.stream.fill_buf()).await {
                Ok(Ok(buf)) => buf.len(),
                _ => 0,
            };
            if n == 0 {
                break;
            }
            self.stream.consume(n);
            discarded += n;
        }
        discarded
    }

    async fn close(mut self) {
        self.flush_input().await;
        let _ = self.stream.shutdown().await;
    }
}

struct Inner {
    link: Option<Link>,
    address: String,
}

struct ReaderTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: DeviceConfig,
    inner: tokio::sync::Mutex<Inner>,
    state: Mutex<DeviceState>,
    queue: Arc<OutgoingBuffer>,
    reader: Mutex<Option<ReaderTask>>,
    resets: AtomicU32,
    cancel: CancellationToken,
}

/// Session with one photometer.
///
/// Cheap to clone; clones share the link, the state and the outgoing queue.
#[derive(Clone)]
pub struct DeviceSession {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("connector", &self.shared.connector.kind())
            .field("state", &self.state())
            .field("resets", &self.reset_count())
            .finish()
    }
}

impl DeviceSession {
    /// Bind to the photometer and clear its input.
    ///
    /// The configured address is tried first, then the connector's
    /// candidates are scanned. Fails with [`DeviceError::NotFound`] when
    /// neither answers; `cancel` aborts the scan.
    pub async fn open(
        connector: Arc<dyn Connector>,
        config: DeviceConfig,
        cancel: CancellationToken,
    ) -> DeviceResult<Self> {
        let session = Self::detached(connector, config, cancel);
        session.set_state(DeviceState::Connecting);

        let configured = session.shared.config.address.clone();
        let (address, stream) = match session.shared.connector.connect(&configured).await {
            Ok(stream) => (configured, stream),
            Err(e) => {
                warn!(address = %configured, error = %e, "configured address failed, scanning");
                session.rediscover().await.inspect_err(|e| {
                    error!(error = %e, "photometer discovery failed");
                })?
            }
        };

        let mut link = Link::new(stream);
        let discarded = link.flush_input().await;
        debug!(discarded, "cleared device input buffer");
        info!(%address, "photometer link open");

        let mut inner = session.shared.inner.lock().await;
        inner.address = address;
        inner.link = Some(link);
        drop(inner);

        session.set_state(DeviceState::Ready);
        Ok(session)
    }

    /// Create a session without opening a link.
    ///
    /// The first [`send_and_receive`](Self::send_and_receive) opens it.
    pub fn detached(
        connector: Arc<dyn Connector>,
        config: DeviceConfig,
        cancel: CancellationToken,
    ) -> Self {
        let address = config.address.clone();
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                inner: tokio::sync::Mutex::new(Inner {
                    link: None,
                    address,
                }),
                state: Mutex::new(DeviceState::Disconnected),
                queue: Arc::new(OutgoingBuffer::new()),
                reader: Mutex::new(None),
                resets: AtomicU32::new(0),
                cancel,
            }),
        }
    }

    /// Send a command and return the validated response line.
    ///
    /// With `max_tries = N` the command is attempted at most `N + 1` times,
    /// with exactly one reset between consecutive attempts.
    pub async fn send_and_receive(&self, command: &str, max_tries: u32) -> DeviceResult<String> {
        let command = normalize_command(command)?;
        let expected = command.chars().next().unwrap_or(COMMAND_TERMINATOR);
        let config = &self.shared.config;

        let mut inner = self.shared.inner.lock().await;
        if inner.link.is_none() {
            if let Err(e) = self.connect_locked(&mut inner).await {
                warn!(error = %e, "device link closed, reopen failed");
            }
        }

        let mut retries_left = max_tries;
        let mut last_raw = Vec::new();
        loop {
            let result = match inner.link.as_mut() {
                Some(link) => exchange(link, &command, expected, config, &mut last_raw).await,
                None => Err(DeviceError::NotConnected),
            };

            match result {
                Ok(response) => {
                    debug!(%command, %response, "device exchange");
                    self.set_state(DeviceState::Ready);
                    return Ok(response);
                }
                Err(e) if retries_left == 0 => {
                    warn!(%command, error = %e, tries = max_tries, "device retries exhausted");
                    if let Some(link) = inner.link.take() {
                        link.close().await;
                    }
                    self.set_state(DeviceState::Disconnected);
                    return Err(DeviceError::RetriesExhausted {
                        command,
                        tries: max_tries,
                        raw: last_raw,
                    });
                }
                Err(e) => {
                    retries_left -= 1;
                    warn!(%command, error = %e, retries_left, "device exchange failed");
                    self.set_state(DeviceState::Degraded { retries_left });
                    tokio::time::sleep(config.retry_backoff).await;
                    if let Err(e) = self.reset_locked(&mut inner).await {
                        warn!(error = %e, "device reset failed");
                    }
                }
            }
        }
    }

    /// Close the link, pause, and reopen it.
    ///
    /// Reopens the same address; if that fails the candidates are scanned
    /// and the first answering address is adopted.
    pub async fn reset(&self) -> DeviceResult<()> {
        let mut inner = self.shared.inner.lock().await;
        self.reset_locked(&mut inner).await
    }

    /// Relay-facing exchange with the configured retry budget.
    ///
    /// Returns an empty response when every attempt fails.
    pub async fn forward(&self, command: &str) -> String {
        match self
            .send_and_receive(command, self.shared.config.max_tries)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "forwarding empty response");
                String::new()
            }
        }
    }

    /// Start polling the link for unsolicited lines.
    ///
    /// Every poll interval the task takes the link, reads whatever complete
    /// lines arrived, and queues them. Calling this twice is a no-op.
    pub fn start_continuous_read(&self) {
        let mut reader = self.shared.reader.lock();
        if reader.is_some() {
            return;
        }

        let cancel = self.shared.cancel.child_token();
        let token = cancel.clone();
        let interval = self.shared.config.poll_interval;
        let weak = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                DeviceSession { shared }.poll_once().await;
            }
            debug!("continuous read stopped");
        });

        info!("continuous read started");
        *reader = Some(ReaderTask { cancel, handle });
    }

    /// Stop the continuous-read task and wait for it to finish.
    pub async fn stop_continuous_read(&self) {
        let task = self.shared.reader.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }

    /// Whether the continuous-read task is running.
    pub fn is_reading(&self) -> bool {
        self.shared.reader.lock().is_some()
    }

    /// Take every queued line.
    pub fn drain(&self) -> Vec<String> {
        self.shared.queue.drain()
    }

    /// Queue receiving continuous-read lines.
    pub fn queue(&self) -> Arc<OutgoingBuffer> {
        Arc::clone(&self.shared.queue)
    }

    /// Current connection state.
    pub fn state(&self) -> DeviceState {
        *self.shared.state.lock()
    }

    /// Number of resets performed since the session was created.
    pub fn reset_count(&self) -> u32 {
        self.shared.resets.load(Ordering::Relaxed)
    }

    /// Address currently bound.
    pub async fn address(&self) -> String {
        self.shared.inner.lock().await.address.clone()
    }

    /// Session parameters.
    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    fn set_state(&self, state: DeviceState) {
        *self.shared.state.lock() = state;
    }

    async fn poll_once(&self) {
        let mut inner = self.shared.inner.lock().await;
        let encoding_errors = {
            let Some(link) = inner.link.as_mut() else {
                return;
            };
            let mut lines = Vec::new();
            let mut bad = 0usize;
            for _ in 0..MAX_QUIET_READS {
                let Ok(raw) = link.read_line(QUIET_WINDOW).await else {
                    break;
                };
                match decode_line(&raw) {
                    Ok(line) if !line.is_empty() => lines.push(line),
                    Ok(_) => {}
                    Err(_) => bad += 1,
                }
            }
            if !lines.is_empty() {
                debug!(count = lines.len(), "continuous read");
                self.shared.queue.extend(lines);
            }
            bad
        };
        if encoding_errors > 0 {
            warn!(count = encoding_errors, "dropped undecodable device lines");
        }
    }

    async fn connect_locked(&self, inner: &mut Inner) -> DeviceResult<()> {
        self.set_state(DeviceState::Connecting);
        let stream = self.shared.connector.connect(&inner.address).await?;
        let mut link = Link::new(stream);
        link.flush_input().await;
        inner.link = Some(link);
        self.set_state(DeviceState::Ready);
        Ok(())
    }

    async fn reset_locked(&self, inner: &mut Inner) -> DeviceResult<()> {
        self.shared.resets.fetch_add(1, Ordering::Relaxed);
        if let Some(link) = inner.link.take() {
            link.close().await;
        }
        tokio::time::sleep(self.shared.config.reset_pause).await;

        match self.connect_locked(inner).await {
            Ok(()) => {
                info!(address = %inner.address, "device link reset");
                Ok(())
            }
            Err(e) => {
                warn!(address = %inner.address, error = %e, "reopen failed, scanning");
                let Discovery::Found(address) = discover(
                    self.shared.connector.as_ref(),
                    &self.shared.config,
                    &self.shared.cancel,
                )
                .await
                else {
                    self.set_state(DeviceState::Disconnected);
                    return Err(DeviceError::NotFound(inner.address.clone()));
                };
                inner.address = address;
                self.connect_locked(inner).await
            }
        }
    }

    async fn rediscover(&self) -> DeviceResult<(String, BoxedStream)> {
        let found = discover(
            self.shared.connector.as_ref(),
            &self.shared.config,
            &self.shared.cancel,
        )
        .await;
        let Discovery::Found(address) = found else {
            self.set_state(DeviceState::Disconnected);
            return Err(DeviceError::NotFound(self.shared.config.address.clone()));
        };

        let stream = self.shared.connector.connect(&address).await?;
        Ok((address, stream))
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

/// One write, settle, read and validate cycle.
async fn exchange(
    link: &mut Link,
    command: &str,
    expected: char,
    config: &DeviceConfig,
    last_raw: &mut Vec<u8>,
) -> DeviceResult<String> {
    link.write_command(command).await?;
    tokio::time::sleep(config.settle_delay).await;

    let raw = link.read_line(config.read_timeout).await?;
    last_raw.clone_from(&raw);

    let response = decode_line(&raw)?;
    if response.is_empty() {
        return Err(DeviceError::EmptyResponse);
    }
    if !response.starts_with(expected) {
        return Err(DeviceError::EchoMismatch { expected, response });
    }
    Ok(response)
}

fn decode_line(raw: &[u8]) -> DeviceResult<String> {
    let text = std::str::from_utf8(raw).map_err(|_| DeviceError::InvalidEncoding {
        raw: raw.to_vec(),
    })?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

/// Append the command terminator if absent.
pub fn normalize_command(command: &str) -> DeviceResult<String> {
    let command = command.trim();
    if command.is_empty() || !command.is_ascii() {
        return Err(DeviceError::InvalidCommand(command.to_string()));
    }
    if command.ends_with(COMMAND_TERMINATOR) {
        Ok(command.to_string())
    } else {
        Ok(format!("{command}{COMMAND_TERMINATOR}"))
    }
}
