#[cfg(debug_assertions)]
use crate::invariants::debug_assert_fifo_count;
use crate::{QueueConfig, Reservation, Ring};
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`CommandQueue`] registration and push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Too many producers registered (exceeds `max_producers` config).
    #[error("too many producers registered (max: {max})")]
    TooManyProducers {
        /// The configured maximum number of producers.
        max: usize,
    },
    /// The queue has been closed.
    #[error("command queue is closed")]
    Closed,
}

/// How long a blocking `pop` waits between polls of the producer rings.
///
/// `CommandQueue` is multi-producer: a single doorbell notification does not
/// say which ring became readable, so the consumer re-polls all of them on
/// each wakeup. This bounds how stale that poll can be when a wakeup is
/// missed (e.g. a spurious condvar wait).
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Multi-producer, single-consumer FIFO of values (commands, in the
/// production sense, but generic so it composes with any pooled handle).
///
/// Internally decomposed into one SPSC [`Ring`] per producer, eliminating
/// producer-producer contention entirely. `pop` blocks the command thread
/// until an item is available or the queue is closed; `try_pop` never
/// blocks.
pub struct CommandQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    rings: Vec<Ring<T>>,
    producer_count: AtomicUsize,
    closed: AtomicBool,
    config: QueueConfig,
    doorbell: Mutex<()>,
    not_empty: Condvar,
    #[cfg(debug_assertions)]
    consumed_counts: Vec<AtomicU64>,
}

impl<T> CommandQueue<T> {
    /// Creates a new queue with the given configuration.
    pub fn new(config: QueueConfig) -> Self {
        let mut rings = Vec::with_capacity(config.max_producers);
        for _ in 0..config.max_producers {
            rings.push(Ring::new(config));
        }

        #[cfg(debug_assertions)]
        let consumed_counts = (0..config.max_producers)
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            inner: Arc::new(Inner {
                rings,
                producer_count: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                config,
                doorbell: Mutex::new(()),
                not_empty: Condvar::new(),
                #[cfg(debug_assertions)]
                consumed_counts,
            }),
        }
    }

    /// Registers a new producer. Fails if the queue is closed or already at
    /// `max_producers`.
    pub fn register(&self) -> Result<CommandProducer<T>, QueueError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }

        let id = self.inner.producer_count.fetch_add(1, Ordering::SeqCst);
        if id >= self.inner.config.max_producers {
            self.inner.producer_count.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::TooManyProducers {
                max: self.inner.config.max_producers,
            });
        }

        self.inner.rings[id].set_active(true);

        Ok(CommandProducer {
            queue: Arc::clone(&self.inner),
            id,
        })
    }

    /// Pops one item, blocking the calling thread until one is available or
    /// the queue is closed.
    pub fn pop(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            let guard = self.inner.doorbell.lock().unwrap();
            // Re-check under the lock in case a push/close raced us between
            // try_pop and acquiring the mutex.
            if !self.is_empty_fast() || self.is_closed() {
                continue;
            }
            let _ = self.inner.not_empty.wait_timeout(guard, POLL_INTERVAL);
        }
    }

    /// Pops one item without blocking. Returns `None` if nothing is ready.
    pub fn try_pop(&self) -> Option<T> {
        let mut slot = None;
        let count = self.inner.producer_count.load(Ordering::Acquire);

        for (producer_id, ring) in self.inner.rings[..count].iter().enumerate() {
            if slot.is_some() {
                break;
            }
            let consumed = ring.consume_up_to_owned(1, |item| slot = Some(item));

            #[cfg(debug_assertions)]
            if consumed > 0 {
                let old_count = self.inner.consumed_counts[producer_id].load(Ordering::Relaxed);
                let new_count = old_count + consumed as u64;
                debug_assert_fifo_count!(producer_id, old_count, new_count);
                self.inner.consumed_counts[producer_id].store(new_count, Ordering::Relaxed);
            }
            #[cfg(not(debug_assertions))]
            let _ = producer_id;
        }

        slot
    }

    fn is_empty_fast(&self) -> bool {
        let count = self.inner.producer_count.load(Ordering::Acquire);
        self.inner.rings[..count].iter().all(Ring::is_empty)
    }

    /// Drains everything currently queued, invoking `handler` for each item
    /// in arrival order per-producer. Used by the command thread for
    /// low-latency batch processing instead of repeated `pop`.
    pub fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut total = 0;
        let count = self.inner.producer_count.load(Ordering::Acquire);

        for (producer_id, ring) in self.inner.rings[..count].iter().enumerate() {
            let consumed = ring.consume_batch_owned(&mut handler);

            #[cfg(debug_assertions)]
            {
                let old_count = self.inner.consumed_counts[producer_id].load(Ordering::Relaxed);
                let new_count = old_count + consumed as u64;
                debug_assert_fifo_count!(producer_id, old_count, new_count);
                self.inner.consumed_counts[producer_id].store(new_count, Ordering::Relaxed);
            }

            total += consumed;
        }

        total
    }

    /// Closes the queue: wakes any blocked `pop`, and causes future pushes
    /// to fail.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let count = self.inner.producer_count.load(Ordering::Acquire);
        for ring in &self.inner.rings[..count] {
            ring.close();
        }
        let _guard = self.inner.doorbell.lock().unwrap();
        self.inner.not_empty.notify_all();
    }

    /// Returns true if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Advisory emptiness check: may be stale the instant it returns under
    /// concurrent producers.
    pub fn is_empty(&self) -> bool {
        self.is_empty_fast()
    }

    /// Returns the number of registered producers.
    pub fn producer_count(&self) -> usize {
        self.inner.producer_count.load(Ordering::Acquire)
    }

    /// Aggregated metrics snapshot across all producer rings, if enabled.
    pub fn metrics(&self) -> crate::QueueMetricsSnapshot {
        let mut m = crate::QueueMetricsSnapshot::default();
        let count = self.inner.producer_count.load(Ordering::Acquire);

        for ring in &self.inner.rings[..count] {
            let rm = ring.metrics();
            m.messages_sent += rm.messages_sent;
            m.messages_received += rm.messages_received;
            m.batches_sent += rm.batches_sent;
            m.batches_received += rm.batches_received;
            m.reserve_spins += rm.reserve_spins;
        }

        m
    }
}

impl<T> Clone for CommandQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

unsafe impl<T: Send> Send for CommandQueue<T> {}
unsafe impl<T: Send> Sync for CommandQueue<T> {}

/// A producer's dedicated handle into a [`CommandQueue`].
///
/// Does not implement `Clone`: sharing a ring between threads would break
/// the single-producer invariant the underlying ring relies on for
/// lock-free operation. A thread that needs to push from multiple places
/// should register its own producer.
pub struct CommandProducer<T> {
    queue: Arc<Inner<T>>,
    id: usize,
}

impl<T> CommandProducer<T> {
    /// Returns this producer's ring id.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Reserves `n` slots for zero-copy writes. See [`Ring::reserve`].
    #[inline]
    pub fn reserve(&self, n: usize) -> Option<Reservation<'_, T>> {
        self.queue.rings[self.id].reserve(n)
    }

    /// Pushes a single item and wakes a blocked consumer. Returns `false`
    /// if the underlying ring is full or closed.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        let pushed = self.queue.rings[self.id].push(item);
        if pushed {
            let _guard = self.queue.doorbell.lock().unwrap();
            self.queue.not_empty.notify_one();
        }
        pushed
    }

    /// Closes this producer's ring.
    #[inline]
    pub fn close(&self) {
        self.queue.rings[self.id].close();
    }

    /// Returns true if this producer's ring is closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.queue.rings[self.id].is_closed()
    }
}

unsafe impl<T: Send> Send for CommandProducer<T> {}
unsafe impl<T: Send> Sync for CommandProducer<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_blocking_pop() {
        let q = Arc::new(CommandQueue::<u64>::new(QueueConfig::default()));
        let producer = q.register().unwrap();

        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop());

        std::thread::sleep(Duration::from_millis(10));
        assert!(producer.push(42));

        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn test_queue_close_wakes_pop() {
        let q = Arc::new(CommandQueue::<u64>::new(QueueConfig::default()));
        let _producer = q.register().unwrap();

        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop());

        std::thread::sleep(Duration::from_millis(10));
        q.close();

        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_queue_try_pop_empty() {
        let q = CommandQueue::<u64>::new(QueueConfig::default());
        let _producer = q.register().unwrap();
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_queue_drain_multi_producer() {
        let q = CommandQueue::<u64>::new(QueueConfig::default());
        let p1 = q.register().unwrap();
        let p2 = q.register().unwrap();

        assert!(p1.push(1));
        assert!(p1.push(2));
        assert!(p2.push(3));

        let mut seen = Vec::new();
        let drained = q.drain(|item| seen.push(item));

        assert_eq!(drained, 3);
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_queue_too_many_producers() {
        let config = QueueConfig::new(10, 1, false);
        let q = CommandQueue::<u64>::new(config);

        let _p1 = q.register().unwrap();
        assert!(matches!(
            q.register(),
            Err(QueueError::TooManyProducers { max: 1 })
        ));
    }

    #[test]
    fn test_queue_closed_register() {
        let q = CommandQueue::<u64>::new(QueueConfig::default());
        q.close();
        assert!(matches!(q.register(), Err(QueueError::Closed)));
    }
}
