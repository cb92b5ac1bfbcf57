//! Configuration for connection polling behavior.

use std::time::Duration;

/// Configuration for a [`crate::PipeConnection`]'s read-side polling.
///
/// Reads are event-driven (woken by a `Notify` when the writer commits a
/// frame), but a poll interval acts as a safety net against a missed wakeup
/// and lets a handful of small writes be drained together.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fallback poll interval for the read loop.
    ///
    /// Default: 10ms
    pub poll_interval: Duration,

    /// Bound on the number of frames a sibling can have in flight before
    /// `write` returns [`crate::ConnectionError::Full`].
    ///
    /// Default: 256
    pub queue_depth: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            queue_depth: 256,
        }
    }
}

impl ConnectionConfig {
    /// Shorter poll interval, smaller queue: favors latency over throughput.
    pub fn low_latency() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            queue_depth: 16,
        }
    }

    /// Larger queue, longer poll interval: favors throughput over latency.
    pub fn high_throughput() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            queue_depth: 4096,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
}
