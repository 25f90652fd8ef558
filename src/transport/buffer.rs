//! Outgoing buffer shared between producers and the drain loop.

use std::collections::VecDeque;
use std::mem;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::core::{DEFAULT_BATCH_WINDOW, OUTGOING_CAPACITY};

/// Ordered, append-only message buffer with an atomic drain.
///
/// Any number of producers may [`push`](Self::push); exactly one consumer
/// should drain. Every push wakes a waiting drainer. When more than
/// `capacity` messages are waiting the oldest are dropped.
#[derive(Debug)]
pub struct OutgoingBuffer {
    state: Mutex<State>,
    ready: Notify,
    capacity: usize,
    batch_window: Duration,
}

#[derive(Debug, Default)]
struct State {
    messages: VecDeque<String>,
    dropped: u64,
    overflow: u64,
}

impl State {
    fn trim(&mut self, capacity: usize) {
        let excess = self.messages.len().saturating_sub(capacity);
        if excess == 0 {
            return;
        }
        if self.overflow == 0 {
            warn!(capacity, "outgoing buffer full, dropping oldest messages");
        }
        self.messages.drain(..excess);
        self.dropped += excess as u64;
        self.overflow += excess as u64;
    }
}

impl Default for OutgoingBuffer {
    fn default() -> Self {
        Self::with_limits(OUTGOING_CAPACITY, DEFAULT_BATCH_WINDOW)
    }
}

impl OutgoingBuffer {
    /// Create an empty buffer with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer holding at most `capacity` messages whose
    /// drain waits `batch_window` after a wakeup to coalesce a burst.
    pub fn with_limits(capacity: usize, batch_window: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ready: Notify::new(),
            capacity: capacity.max(1),
            batch_window,
        }
    }

    /// Append one message.
    pub fn push(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        state.messages.push_back(message.into());
        state.trim(self.capacity);
        drop(state);
        self.ready.notify_one();
    }

    /// Append several messages, keeping their order.
    pub fn extend<I>(&self, messages: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.lock();
        let before = state.messages.len();
        state.messages.extend(messages);
        let added = state.messages.len() > before;
        state.trim(self.capacity);
        drop(state);
        if added {
            self.ready.notify_one();
        }
    }

    /// Take every buffered message, leaving the buffer empty.
    ///
    /// Snapshot and clear happen under one lock, so a concurrent push lands
    /// either in this batch or in the next one.
    pub fn drain(&self) -> Vec<String> {
        let mut state = self.state.lock();
        let overflow = mem::take(&mut state.overflow);
        let batch = Vec::from(mem::take(&mut state.messages));
        drop(state);
        if overflow > 0 {
            warn!(dropped = overflow, delivered = batch.len(), "outgoing buffer overflowed");
        }
        batch
    }

    /// Wait until a producer signals or `max_wait` elapses, then drain.
    ///
    /// Once something is waiting, the batch window passes before the drain
    /// so that a burst of pushes goes out as one batch. May return an empty
    /// batch.
    pub async fn wait_and_drain(&self, max_wait: Duration) -> Vec<String> {
        if self.is_empty() {
            let _ = tokio::time::timeout(max_wait, self.ready.notified()).await;
        }
        if !self.batch_window.is_zero() && !self.is_empty() {
            tokio::time::sleep(self.batch_window).await;
        }
        self.drain()
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Messages dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[test]
    fn test_drain_is_idempotent() {
        let buffer = OutgoingBuffer::new();
        buffer.push("r, 19.50m");
        buffer.push("");

        assert_eq!(buffer.drain(), vec!["r, 19.50m", ""]);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_extend_keeps_order() {
        let buffer = OutgoingBuffer::new();
        buffer.push("a");
        buffer.extend(vec!["b".to_string(), "c".to_string()]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.drain(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_push() {
        let buffer = Arc::new(OutgoingBuffer::new());
        let producer = Arc::clone(&buffer);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push("late");
        });

        let batch = buffer.wait_and_drain(Duration::from_secs(5)).await;
        assert_eq!(batch, vec!["late"]);
        handle.await.unwrap();
    }

    #[test]
    #[traced_test]
    fn test_overflow_drops_oldest() {
        let buffer = OutgoingBuffer::with_limits(3, Duration::ZERO);
        for line in ["a", "b", "c", "d"] {
            buffer.push(line);
        }
        buffer.extend(vec!["e".to_string()]);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        assert!(logs_contain("outgoing buffer full"));

        assert_eq!(buffer.drain(), vec!["c", "d", "e"]);
        assert!(logs_contain("outgoing buffer overflowed"));
        assert_eq!(buffer.dropped(), 2);
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_batch() {
        let buffer = Arc::new(OutgoingBuffer::with_limits(16, Duration::from_millis(100)));
        let producer = Arc::clone(&buffer);

        buffer.push("r, 19.50m");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            producer.push("c, 00000019.84m");
        });

        let batch = buffer.wait_and_drain(Duration::from_secs(5)).await;
        assert_eq!(batch, vec!["r, 19.50m", "c, 00000019.84m"]);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out_empty() {
        let buffer = OutgoingBuffer::new();
        let batch = buffer.wait_and_drain(Duration::from_millis(10)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let buffer = Arc::new(OutgoingBuffer::new());
        let mut handles = Vec::new();
        for p in 0..4 {
            let buffer = Arc::clone(&buffer);
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    buffer.push(format!("{p}-{i}"));
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            seen.extend(buffer.wait_and_drain(Duration::from_millis(50)).await);
        }
        for handle in handles {
            handle.await.unwrap();
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
        assert!(buffer.is_empty());
    }
}
