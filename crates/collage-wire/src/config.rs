/// Configuration for a `CommandQueue` and the `Ring` it is built from.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Ring buffer size as a power of two (default: 12 = 4096 slots).
    pub ring_bits: u8,
    /// Maximum number of concurrent producers (dispatch/network threads).
    pub max_producers: usize,
    /// Enable metrics collection (slight overhead).
    pub enable_metrics: bool,
}

impl QueueConfig {
    /// Creates a new configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `ring_bits` is 0 or greater than 20 (1M slots max), or if
    /// `max_producers` is 0 or greater than 128.
    pub const fn new(ring_bits: u8, max_producers: usize, enable_metrics: bool) -> Self {
        assert!(
            ring_bits > 0 && ring_bits <= 20,
            "ring_bits must be between 1 and 20 (max 1M slots)"
        );
        assert!(
            max_producers > 0 && max_producers <= 128,
            "max_producers must be between 1 and 128"
        );

        Self {
            ring_bits,
            max_producers,
            enable_metrics,
        }
    }

    /// Returns the capacity of the ring buffer.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.ring_bits
    }

    /// Returns the mask for index wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ring_bits: 12, // 4096 slots, enough for a burst of inbound commands
            max_producers: 8,
            enable_metrics: false,
        }
    }
}

/// Command queue tuned for a single connection's receiver thread: small ring,
/// one producer, metrics off.
pub const SINGLE_PEER_CONFIG: QueueConfig = QueueConfig::new(10, 1, false);

/// Command queue tuned for a node fielding many simultaneous peers.
pub const MANY_PEERS_CONFIG: QueueConfig = QueueConfig::new(14, 64, false);
