//! Queue substrate seam and the in-memory reference substrate.
//!
//! The queue-backed transports only need two primitives from a broker:
//! push and blocking pop with timeout. Redis (`RPUSH`/`BLPOP`) or any
//! durable queue plugs in behind [`QueueSubstrate`]; [`MemoryQueue`] is
//! the in-process implementation used by tests and examples.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::types::Result;

/// Minimal broker surface required by the queue transports.
#[async_trait]
pub trait QueueSubstrate: Send + Sync {
    /// Append `data` to the tail of `queue`, creating it if needed.
    async fn push(&self, queue: &str, data: Vec<u8>) -> Result<()>;

    /// Pop the head of `queue`, waiting up to `timeout` for an item.
    /// `Ok(None)` means the wait timed out; errors are transient substrate
    /// failures the caller may retry.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// In-process substrate: named FIFO queues with blocking pop.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items currently waiting in `queue`.
    pub async fn len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Whether `queue` currently holds no items.
    pub async fn is_empty(&self, queue: &str) -> bool {
        self.len(queue).await == 0
    }
}

#[async_trait]
impl QueueSubstrate for MemoryQueue {
    async fn push(&self, queue: &str, data: Vec<u8>) -> Result<()> {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(data);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wakeups before checking so a push between the
            // check and the wait is never missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queues = self.queues.lock().await;
                if let Some(item) = queues.get_mut(queue).and_then(VecDeque::pop_front) {
                    return Ok(Some(item));
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}
