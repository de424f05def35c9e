//! Configuration structures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// RPC transport configuration.
///
/// One config covers both substrates; the queue fields are ignored by the
/// socket transports and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Maximum accepted frame size in bytes (socket substrate).
    pub max_frame_bytes: u32,

    /// Socket read timeout in seconds. Idle connections past this are
    /// dropped.
    pub read_timeout_secs: u64,

    /// Socket write timeout in seconds. Prevents slow consumers from
    /// holding reply paths indefinitely.
    pub write_timeout_secs: u64,

    /// Blocking-pop timeout in milliseconds (queue substrate). The delivery
    /// loop wakes at least this often to observe cancellation.
    pub pop_timeout_ms: u64,

    /// Backoff in milliseconds after a failed queue read before the next
    /// pop attempt.
    pub retry_backoff_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            read_timeout_secs: 300,
            write_timeout_secs: 30,
            pop_timeout_ms: 1_000,
            retry_backoff_ms: 50,
        }
    }
}

impl RpcConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
