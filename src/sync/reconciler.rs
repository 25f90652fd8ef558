//! Sync reconciler
//!
//! Pulls data files from a radio peer (initiator side) and answers the
//! peer's inventory and file requests (serving side).

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::inventory::{Inventory, plan};
use super::message::{MessageError, SyncReply, SyncRequest, file_header};
use crate::core::{SyncConfig, TextEncoding};
use crate::transport::{Frame, FrameError, FrameWriter};

/// Errors from a reconciliation session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local storage error.
    #[error("storage error: {0}")]
    Io(#[from] io::Error),

    /// Error writing to the peer.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Malformed reply.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// The peer did not answer in time.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was awaited.
        what: String,
        /// Configured wait.
        after: Duration,
    },

    /// The reply channel closed (radio reader stopped).
    #[error("reply channel closed")]
    ChannelClosed,

    /// Path is absolute, escapes the storage root, or is not a data file.
    #[error("rejected path {0:?}")]
    RejectedPath(String),
}

impl SyncError {
    /// Whether the session should be abandoned rather than the file skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Frame(_) | SyncError::ChannelClosed)
    }
}

/// Result type for reconciliation.
pub type SyncResult<T> = Result<T, SyncError>;

/// Outcome of one pull session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Paths written locally.
    pub fetched: Vec<String>,
    /// Planned paths that could not be fetched.
    pub skipped: Vec<String>,
}

impl SyncReport {
    /// Number of planned paths.
    pub fn planned(&self) -> usize {
        self.fetched.len() + self.skipped.len()
    }
}

/// Inventory exchange and selective file pull over a framed link.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: SyncConfig,
    encoding: TextEncoding,
}

impl Reconciler {
    /// Create a reconciler over `config.storage_root`.
    pub fn new(config: SyncConfig, encoding: TextEncoding) -> Self {
        Self { config, encoding }
    }

    /// Reconciliation parameters.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fresh scan of the local storage root.
    pub async fn local_inventory(&self) -> SyncResult<Inventory> {
        Ok(Inventory::scan(&self.config.storage_root, &self.config.suffix).await?)
    }

    /// Pull every planned file from the peer.
    ///
    /// Requests go out on `writer`; replies are taken from `replies`, which
    /// carries only frames starting with `rsync `. Files are requested one
    /// at a time. A file that times out, is malformed or cannot be stored
    /// is skipped.
    pub async fn pull<W>(
        &self,
        writer: &mut FrameWriter<W>,
        replies: &mut mpsc::Receiver<Frame>,
    ) -> SyncResult<SyncReport>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stale = 0usize;
        while replies.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded stale sync replies");
        }

        info!("requesting peer inventory");
        writer.send_text(&SyncRequest::List.to_message()).await?;
        let remote = self.await_inventory(replies).await?;
        let local = self.local_inventory().await?;
        let wanted = plan(&remote, &local, self.config.replace_policy);
        info!(
            remote = remote.len(),
            local = local.len(),
            planned = wanted.len(),
            "reconciliation planned"
        );

        let mut report = SyncReport::default();
        for path in wanted {
            match self.fetch(&path, writer, replies).await {
                Ok(bytes) => {
                    debug!(%path, bytes, "fetched file");
                    report.fetched.push(path);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(%path, error = %e, "skipping file");
                    report.skipped.push(path);
                }
            }
        }

        info!(
            fetched = report.fetched.len(),
            skipped = report.skipped.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Answer a peer request on `writer`.
    ///
    /// A requested file that does not exist is logged and nothing is sent.
    pub async fn serve<W>(&self, request: &SyncRequest, writer: &mut FrameWriter<W>) -> SyncResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        match request {
            SyncRequest::List => {
                let inventory = self.local_inventory().await?;
                debug!(files = inventory.len(), "sending inventory");
                writer.send_texts(&inventory.to_messages()).await?;
            }
            SyncRequest::File(path) => {
                let full = self.resolve(path)?;
                let content = match tokio::fs::read(&full).await {
                    Ok(content) => content,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        warn!(%path, "requested file does not exist");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };
                let header = self.encoding.encode(&file_header(path))?;
                debug!(%path, bytes = content.len(), "sending file");
                writer.send(&[header, content]).await?;
            }
            SyncRequest::Trigger => debug!("pull trigger is handled by the relay"),
        }
        Ok(())
    }

    /// Map a peer-supplied relative path into the storage root.
    ///
    /// Absolute paths, `..` components and paths without the data suffix
    /// are rejected.
    pub fn resolve(&self, path: &str) -> SyncResult<PathBuf> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && path.ends_with(self.config.suffix.as_str())
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(SyncError::RejectedPath(path.to_string()));
        }
        Ok(self.config.storage_root.join(relative))
    }

    async fn fetch<W>(
        &self,
        path: &str,
        writer: &mut FrameWriter<W>,
        replies: &mut mpsc::Receiver<Frame>,
    ) -> SyncResult<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let target = self.resolve(path)?;
        writer.send_text(&file_header(path)).await?;

        let limit = self.config.file_timeout;
        let deadline = Instant::now() + limit;
        loop {
            match self.next_reply(replies, deadline, limit, path).await? {
                SyncReply::File { path: got, content } if got == path => {
                    let bytes = content.len();
                    store(&target, &content).await?;
                    return Ok(bytes);
                }
                SyncReply::File { path: got, .. } => {
                    debug!(expected = %path, %got, "ignoring reply for another file");
                }
                SyncReply::Inventory(_) => debug!("ignoring late inventory"),
            }
        }
    }

    async fn await_inventory(&self, replies: &mut mpsc::Receiver<Frame>) -> SyncResult<Inventory> {
        let limit = self.config.inventory_timeout;
        let deadline = Instant::now() + limit;
        loop {
            match self.next_reply(replies, deadline, limit, "inventory").await? {
                SyncReply::Inventory(inventory) => return Ok(inventory),
                SyncReply::File { path, .. } => {
                    debug!(%path, "ignoring file reply while awaiting inventory");
                }
            }
        }
    }

    async fn next_reply(
        &self,
        replies: &mut mpsc::Receiver<Frame>,
        deadline: Instant,
        limit: Duration,
        what: &str,
    ) -> SyncResult<SyncReply> {
        loop {
            let frame = tokio::time::timeout_at(deadline, replies.recv())
                .await
                .map_err(|_| SyncError::Timeout {
                    what: what.to_string(),
                    after: limit,
                })?
                .ok_or(SyncError::ChannelClosed)?;

            match SyncReply::parse(&frame, self.encoding) {
                Ok(reply) => return Ok(reply),
                Err(e) => warn!(error = %e, "dropping malformed sync reply"),
            }
        }
    }
}

/// Write `content` to `target` through a temporary sibling and a rename.
async fn store(target: &Path, content: &[u8]) -> SyncResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, content).await?;
    if let Err(e) = tokio::fs::rename(&partial, target).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }
    Ok(())
}
