//! In-memory photometer doubles for unit tests.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf, duplex};

use super::connector::Connector;
use crate::core::COMMAND_TERMINATOR;
use crate::transport::BoxedStream;

/// Behaviour of a fake photometer behind one address.
#[derive(Debug, Clone)]
pub struct MockSensor {
    echo: Option<char>,
    failures: Arc<AtomicUsize>,
    broken_links: Arc<AtomicUsize>,
    silent: bool,
    garbled: bool,
    unsolicited: Option<(String, Duration)>,
}

impl MockSensor {
    /// Answers every command with a reading that echoes its first character.
    pub fn healthy() -> Self {
        Self {
            echo: None,
            failures: Arc::new(AtomicUsize::new(0)),
            broken_links: Arc::new(AtomicUsize::new(0)),
            silent: false,
            garbled: false,
            unsolicited: None,
        }
    }

    /// Always answers with `c` as the first character.
    pub fn echoing(c: char) -> Self {
        Self {
            echo: Some(c),
            ..Self::healthy()
        }
    }

    /// Never answers.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::healthy()
        }
    }

    /// Answers the first `n` commands (across reconnects) with garbage.
    pub fn failing_first(n: usize) -> Self {
        Self {
            failures: Arc::new(AtomicUsize::new(n)),
            ..Self::healthy()
        }
    }

    /// The first `n` connections fail every read and write.
    pub fn broken_links(n: usize) -> Self {
        Self {
            broken_links: Arc::new(AtomicUsize::new(n)),
            ..Self::healthy()
        }
    }

    /// Every connection fails every read and write.
    pub fn broken() -> Self {
        Self::broken_links(usize::MAX)
    }

    /// Answers every command with bytes that are not UTF-8.
    pub fn garbled() -> Self {
        Self {
            garbled: true,
            ..Self::healthy()
        }
    }

    /// Also emits `line` every `every`, unprompted.
    pub fn streaming(line: &str, every: Duration) -> Self {
        Self {
            unsolicited: Some((line.to_string(), every)),
            ..Self::healthy()
        }
    }

    fn reply(&self, command: &[u8]) -> Option<Vec<u8>> {
        if self.silent {
            return None;
        }
        if self.garbled {
            return Some(b"\xff\xfe\r\n".to_vec());
        }
        let consumed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Some(b"?garbage\r\n".to_vec());
        }
        let first = self
            .echo
            .unwrap_or_else(|| command.first().map_or('?', |&b| b as char));
        Some(format!("{first}, 19.50m,0000005915Hz\r\n").into_bytes())
    }

    async fn run(self, mut stream: DuplexStream) {
        let mut command = Vec::new();
        let mut buf = [0u8; 64];
        let (line, every) = self
            .unsolicited
            .clone()
            .unwrap_or_else(|| (String::new(), Duration::from_secs(3600)));
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let n = match read {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    for &b in &buf[..n] {
                        command.push(b);
                        if b == COMMAND_TERMINATOR as u8 {
                            if let Some(reply) = self.reply(&command) {
                                if stream.write_all(&reply).await.is_err() {
                                    return;
                                }
                            }
                            command.clear();
                        }
                    }
                }
                _ = ticker.tick(), if !line.is_empty() => {
                    if stream.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Connector over a table of fake photometers, counting connections.
#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    candidates: Vec<String>,
    sensors: HashMap<String, MockSensor>,
    connects: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(mut self, candidates: &[&str]) -> Self {
        self.candidates = candidates.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_sensor(mut self, address: &str, sensor: MockSensor) -> Self {
        self.sensors.insert(address.to_string(), sensor);
        self
    }

    /// Connections opened to `address` so far.
    pub fn connects(&self, address: &str) -> usize {
        self.connects.lock().get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str) -> io::Result<BoxedStream> {
        *self.connects.lock().entry(address.to_string()).or_default() += 1;
        let sensor = self
            .sensors
            .get(address)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, address.to_string()))?;

        let broken = sensor
            .broken_links
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if broken {
            return Ok(Box::new(BrokenStream));
        }

        let (client, server) = duplex(1024);
        tokio::spawn(sensor.run(server));
        Ok(Box::new(client))
    }

    async fn candidates(&self) -> Vec<String> {
        self.candidates.clone()
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

/// Stream whose reads, writes and flushes all fail with `BrokenPipe`.
#[derive(Debug)]
pub struct BrokenStream;

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "link broken")
}

impl AsyncRead for BrokenStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(broken_pipe()))
    }
}

impl AsyncWrite for BrokenStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(broken_pipe()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(broken_pipe()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
