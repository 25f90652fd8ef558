//! Shared fixtures: a fake photometer, in-memory radio ports, fast configs.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqm_relay::core::NodeConfig;
use sqm_relay::device::Connector;
use sqm_relay::transport::BoxedStream;
use sqm_relay::NodeConfigBuilder;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::mpsc;

/// Photometer reachable at one address. The first `failures` commands
/// (counted across reconnects) get a reply with the wrong echo.
#[derive(Debug, Clone)]
pub struct FakeSensor {
    address: String,
    failures: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl FakeSensor {
    pub fn new(address: &str) -> Self {
        Self::flaky(address, 0)
    }

    pub fn flaky(address: &str, failures: usize) -> Self {
        Self {
            address: address.to_string(),
            failures: Arc::new(AtomicUsize::new(failures)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connections opened so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    async fn serve(self, mut stream: DuplexStream) {
        let mut command = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for &b in &buf[..n] {
                command.push(b);
                if b != b'x' {
                    continue;
                }
                let failing = self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                let reply = if failing {
                    "?\r\n".to_string()
                } else {
                    format!(
                        "{}, 19.50m,0000005915Hz,0000000000c,0000000.000s, 027.0C\r\n",
                        command[0] as char
                    )
                };
                if stream.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
                command.clear();
            }
        }
    }
}

#[async_trait]
impl Connector for FakeSensor {
    async fn connect(&self, address: &str) -> io::Result<BoxedStream> {
        if address != self.address {
            return Err(io::Error::new(io::ErrorKind::NotFound, address.to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = duplex(1024);
        tokio::spawn(self.clone().serve(server));
        Ok(Box::new(client))
    }

    async fn candidates(&self) -> Vec<String> {
        vec![self.address.clone()]
    }

    fn kind(&self) -> &'static str {
        "fake"
    }
}

/// Radio port double: each connect yields a fresh pipe whose far end is
/// handed to the test.
#[derive(Debug)]
pub struct RadioPipe {
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl RadioPipe {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

#[async_trait]
impl Connector for RadioPipe {
    async fn connect(&self, _address: &str) -> io::Result<BoxedStream> {
        let (near, far) = duplex(64 * 1024);
        self.peers
            .send(far)
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "radio peer gone"))?;
        Ok(Box::new(near))
    }

    fn kind(&self) -> &'static str {
        "radio-pipe"
    }
}

/// Node config with millisecond timings.
pub fn fast_config(device_address: &str, storage_root: &Path) -> NodeConfig {
    let mut config = NodeConfigBuilder::new()
        .device_address(device_address)
        .poll_interval(Duration::from_millis(10))
        .settle_delay(Duration::from_millis(1))
        .storage_root(storage_root)
        .build()
        .unwrap();
    config.device.read_timeout = Duration::from_millis(200);
    config.device.retry_backoff = Duration::from_millis(1);
    config.device.reset_pause = Duration::from_millis(1);
    config.device.probe_timeout = Duration::from_millis(200);
    config.relay.downstream_backoff = Duration::from_millis(10);
    config.sync.inventory_timeout = Duration::from_secs(2);
    config.sync.file_timeout = Duration::from_secs(2);
    config
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
