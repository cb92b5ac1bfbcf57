use crate::invariants::{
    debug_assert_bounded_count, debug_assert_head_not_past_tail, debug_assert_initialized_read,
    debug_assert_monotonic, debug_assert_no_wrap,
};
use crate::{Backoff, QueueConfig, QueueMetrics, Reservation};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Single-producer single-consumer ring buffer — the transport underneath
/// `CommandQueue`. One `Ring` exists per registered producer (one per peer
/// connection or local dispatch source); the command thread is the single
/// consumer and polls every registered ring in turn.
///
/// `head`/`tail` are unbounded `u64` sequence numbers rather than wrapped
/// indices, so the producer and consumer never have to agree on "has this
/// slot wrapped around since I last saw it" (the ABA problem a wrapped index
/// would invite). A slot's buffer position is only computed at the point of
/// access, as `sequence & mask`.
///
/// Ordering contract:
///   - the producer only ever writes `tail` and reads `head`; the consumer
///     only ever writes `head` and reads `tail`.
///   - a producer publishes a write by storing the new `tail` with
///     `Release`; the consumer synchronizes with that by loading `tail` with
///     `Acquire` before touching the corresponding slots.
///   - each side also keeps a private `UnsafeCell` cache of the other side's
///     counter, refreshed only when the cache says there isn't enough
///     room/data, to avoid a cross-core atomic load on every call.
///
/// Layout-wise, the hot atomics for each side are cache-line padded so a
/// producer spinning on `tail` doesn't false-share the line the consumer is
/// hammering on `head`, and vice versa.
#[repr(C)]
pub struct Ring<T> {
    tail: CachePadded<AtomicU64>,
    cached_head: CachePadded<UnsafeCell<u64>>,

    head: CachePadded<AtomicU64>,
    cached_tail: CachePadded<UnsafeCell<u64>>,

    active: CachePadded<AtomicBool>,
    closed: AtomicBool,
    metrics: QueueMetrics,
    config: QueueConfig,

    /// Fixed-size storage; `Box<[T]>` rather than `Vec<T>` since this never
    /// grows or shrinks after construction.
    buffer: UnsafeCell<Box<[MaybeUninit<T>]>>,
}

// The atomic head/tail protocol is what makes cross-thread access sound;
// `T: Send` is all that's additionally required to ship values between the
// producer and consumer threads.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    pub fn new(config: QueueConfig) -> Self {
        let capacity = config.capacity();

        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, MaybeUninit::uninit);

        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            active: CachePadded::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            metrics: QueueMetrics::new(),
            config,
            buffer: UnsafeCell::new(buffer.into_boxed_slice()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flips the slot this ring occupies in `CommandQueue`'s producer table
    /// between claimed and free.
    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    // --- producer side ---------------------------------------------------

    /// Claims `n` contiguous slots for writing, or `None` if the ring
    /// doesn't have room (or `n` is zero or larger than the whole ring).
    /// The claim may come back shorter than `n` when it would straddle the
    /// wrap point — see [`Reservation`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn reserve(&self, n: usize) -> Option<Reservation<'_, T>> {
        if n == 0 || n > self.capacity() {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);

        // SAFETY: only the producer ever writes cached_head.
        let cached_head = unsafe { *self.cached_head.get() };
        if self.capacity().saturating_sub(tail.wrapping_sub(cached_head) as usize) >= n {
            return Some(self.make_reservation(tail, n));
        }

        // Cache says there isn't room; refresh it from the consumer's
        // actual head before giving up.
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: only the producer writes cached_head; the Acquire load
        // above synchronizes with the consumer's Release store to head.
        unsafe { *self.cached_head.get() = head };

        if self.capacity().saturating_sub(tail.wrapping_sub(head) as usize) < n {
            return None;
        }
        Some(self.make_reservation(tail, n))
    }

    /// Like [`reserve`](Self::reserve), but retries under a [`Backoff`]
    /// instead of giving up on the first full ring, for a caller willing to
    /// wait briefly for the command thread to catch up.
    pub fn reserve_with_backoff(&self, n: usize) -> Option<Reservation<'_, T>> {
        let mut wait = Backoff::new();
        loop {
            if let Some(reservation) = self.reserve(n) {
                return Some(reservation);
            }
            if self.is_closed() {
                return None;
            }
            if wait.is_completed() {
                return None;
            }
            if self.config.enable_metrics {
                self.metrics.add_reserve_spin();
            }
            wait.snooze();
        }
    }

    fn make_reservation(&self, tail: u64, n: usize) -> Reservation<'_, T> {
        let idx = (tail as usize) & self.mask();
        let contiguous = n.min(self.capacity() - idx);

        // SAFETY: these slots sit at or past the current tail, so only the
        // producer touches them until the matching commit publishes a new
        // tail with Release.
        let slots = unsafe { &mut (&mut *self.buffer.get())[idx..idx + contiguous] };
        Reservation::new(slots, self as *const Self)
    }

    pub(crate) fn commit_internal(&self, n: usize) {
        let tail = self.tail.load(Ordering::Relaxed);
        let new_tail = tail.wrapping_add(n as u64);
        let head = self.head.load(Ordering::Relaxed);

        debug_assert_bounded_count!(new_tail.wrapping_sub(head) as usize, self.capacity());
        debug_assert_monotonic!("tail", tail, new_tail);
        debug_assert_no_wrap!("tail", tail, new_tail);

        self.tail.store(new_tail, Ordering::Release);

        if self.config.enable_metrics {
            self.metrics.add_messages_sent(n as u64);
            self.metrics.add_batches_sent(1);
        }
    }

    // --- consumer side -----------------------------------------------------

    /// Borrows the currently readable contiguous run, or `None` if the ring
    /// is empty. Does not advance `head` — pair with [`advance`](Self::advance).
    #[allow(clippy::cast_possible_truncation)]
    pub fn readable(&self) -> Option<&[T]> {
        let head = self.head.load(Ordering::Relaxed);

        // SAFETY: only the consumer writes cached_tail.
        let mut tail = unsafe { *self.cached_tail.get() };
        let mut avail = tail.wrapping_sub(head) as usize;

        if avail == 0 {
            tail = self.tail.load(Ordering::Acquire);
            // SAFETY: only the consumer writes cached_tail; the Acquire
            // load above synchronizes with the producer's Release store.
            unsafe { *self.cached_tail.get() = tail };
            avail = tail.wrapping_sub(head) as usize;
            if avail == 0 {
                return None;
            }
        }

        let idx = (head as usize) & self.mask();
        let contiguous = avail.min(self.capacity() - idx);

        // SAFETY: slots in [head, tail) were published via the producer's
        // Release store on tail, synchronized by the Acquire load above.
        unsafe {
            let buffer = &*self.buffer.get();
            Some(std::slice::from_raw_parts(buffer[idx..].as_ptr().cast::<T>(), contiguous))
        }
    }

    /// Releases `n` previously-read items back to the producer.
    #[inline]
    pub fn advance(&self, n: usize) {
        let head = self.head.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);
        let tail = self.tail.load(Ordering::Relaxed);

        debug_assert_head_not_past_tail!(new_head, tail);
        debug_assert_monotonic!("head", head, new_head);

        self.head.store(new_head, Ordering::Release);

        if self.config.enable_metrics {
            self.metrics.add_messages_received(n as u64);
            self.metrics.add_batches_received(1);
        }
    }

    /// Computes the `[head, tail)` window currently available to a consumer,
    /// capped at `limit` items if given. Shared by every `consume_*`
    /// variant below so the cross-core `tail` load and the bounds math live
    /// in one place. Returns `(head, tail_of_window, mask)`, or `None` if
    /// there is nothing to consume.
    fn consumable_window(&self, limit: Option<usize>) -> Option<(u64, u64, usize)> {
        if limit == Some(0) {
            return None;
        }
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let avail = tail.wrapping_sub(head) as usize;
        if avail == 0 {
            return None;
        }
        let window = limit.map_or(avail, |limit| avail.min(limit));
        Some((head, head.wrapping_add(window as u64), self.mask()))
    }

    fn publish_consumed(&self, new_head: u64, count: usize) {
        self.head.store(new_head, Ordering::Release);
        if self.config.enable_metrics {
            self.metrics.add_messages_received(count as u64);
            self.metrics.add_batches_received(1);
        }
    }

    /// Walks `[head, tail)`, handing each slot's buffer index to `visit`
    /// (which does the `assume_init_read` and calls the caller's handler),
    /// then advances `head` past however much actually got consumed.
    ///
    /// A slot counts as consumed the moment its index is handed to `visit`,
    /// not after `visit` returns, and `visit` itself runs under
    /// `catch_unwind`: if the caller's handler panics partway through a
    /// batch, `head` still advances past every slot whose item was already
    /// extracted, including the one the panicking handler was given. That
    /// keeps a panicking handler from leaving an already-extracted slot
    /// inside `[head, tail)`, where a later drain or this ring's `Drop`
    /// would read or drop it a second time.
    fn drain_window<F>(&self, head: u64, tail: u64, mask: usize, mut visit: F) -> usize
    where
        F: FnMut(usize),
    {
        let mut pos = head;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            while pos != tail {
                debug_assert_initialized_read!(pos, head, tail);
                let idx = (pos as usize) & mask;
                // Advance past this slot before `visit` runs: the slot's
                // item is extracted (via assume_init_read) as the first
                // thing `visit` does, so it must count as consumed even if
                // the caller's handler panics afterward.
                pos = pos.wrapping_add(1);
                visit(idx);
            }
        }));

        let consumed = pos.wrapping_sub(head) as usize;
        self.publish_consumed(head.wrapping_add(consumed as u64), consumed);

        match result {
            Ok(()) => consumed,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Hands every currently-available item to `handler` by reference, then
    /// advances `head` once for the whole batch.
    pub fn consume_batch<F: FnMut(&T)>(&self, mut handler: F) -> usize {
        let Some((head, tail, mask)) = self.consumable_window(None) else {
            return 0;
        };
        self.drain_window(head, tail, mask, |idx| {
            // SAFETY: slot was fully written before tail's Release store,
            // synchronized by the Acquire load in `consumable_window`.
            let item = unsafe { (*self.buffer.get())[idx].assume_init_read() };
            handler(&item);
        })
    }

    /// Same as [`consume_batch`](Self::consume_batch), but moves each item
    /// into `handler` instead of borrowing it — for element types like
    /// `Command` that hold their own allocation and shouldn't be cloned.
    pub fn consume_batch_owned<F: FnMut(T)>(&self, mut handler: F) -> usize {
        let Some((head, tail, mask)) = self.consumable_window(None) else {
            return 0;
        };
        self.drain_window(head, tail, mask, |idx| {
            let item = unsafe { (*self.buffer.get())[idx].assume_init_read() };
            handler(item);
        })
    }

    /// Like [`consume_batch`](Self::consume_batch), but stops after
    /// `max_items` even if more is available.
    pub fn consume_up_to<F: FnMut(&T)>(&self, max_items: usize, mut handler: F) -> usize {
        let Some((head, tail, mask)) = self.consumable_window(Some(max_items)) else {
            return 0;
        };
        self.drain_window(head, tail, mask, |idx| {
            let item = unsafe { (*self.buffer.get())[idx].assume_init_read() };
            handler(&item);
        })
    }

    /// Owned-item variant of [`consume_up_to`](Self::consume_up_to).
    pub fn consume_up_to_owned<F: FnMut(T)>(&self, max_items: usize, mut handler: F) -> usize {
        let Some((head, tail, mask)) = self.consumable_window(Some(max_items)) else {
            return 0;
        };
        self.drain_window(head, tail, mask, |idx| {
            let item = unsafe { (*self.buffer.get())[idx].assume_init_read() };
            handler(item);
        })
    }

    // --- Copy-element convenience wrappers --------------------------------

    /// Pushes a single item. `false` if the ring is full or closed.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        self.reserve(1).is_some_and(|mut r| {
            r.as_mut_slice()[0] = MaybeUninit::new(item);
            r.commit();
            true
        })
    }

    pub fn send(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        self.reserve(items.len()).map_or(0, |mut reservation| {
            let slice = reservation.as_mut_slice();
            for (slot, item) in slice.iter_mut().zip(items) {
                slot.write(*item);
            }
            let n = slice.len();
            reservation.commit();
            n
        })
    }

    pub fn recv(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        self.readable().map_or(0, |slice| {
            let n = slice.len().min(out.len());
            out[..n].copy_from_slice(&slice[..n]);
            self.advance(n);
            n
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn metrics(&self) -> crate::QueueMetricsSnapshot {
        if self.config.enable_metrics {
            self.metrics.snapshot()
        } else {
            crate::QueueMetricsSnapshot::default()
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let count = tail.wrapping_sub(head) as usize;
        if count == 0 {
            return;
        }

        let mask = self.mask();
        let buffer = self.buffer.get_mut();
        for i in 0..count {
            let idx = (head as usize).wrapping_add(i) & mask;
            // SAFETY: every slot in [head, tail) was initialized by a
            // producer commit and never read back out.
            unsafe { ptr::drop_in_place(buffer[idx].as_mut_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_basic_reserve_commit() {
        let ring = Ring::<u64>::new(QueueConfig::default());

        if let Some(mut r) = ring.reserve(4) {
            let slice = r.as_mut_slice();
            slice[0].write(100);
            slice[1].write(200);
            slice[2].write(300);
            slice[3].write(400);
            r.commit();
        }

        assert_eq!(ring.len(), 4);

        if let Some(slice) = ring.readable() {
            assert_eq!(slice[0], 100);
            assert_eq!(slice[3], 400);
            ring.advance(4);
        }

        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_batch_consumption() {
        let ring = Ring::<u64>::new(QueueConfig::default());

        for i in 0..10 {
            if let Some(mut r) = ring.reserve(1) {
                r.as_mut_slice()[0].write(i * 10);
                r.commit();
            }
        }

        let mut sum = 0u64;
        let consumed = ring.consume_batch(|item| sum += item);

        assert_eq!(consumed, 10);
        assert_eq!(sum, 10 + 20 + 30 + 40 + 50 + 60 + 70 + 80 + 90);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_consume_up_to() {
        let ring = Ring::<u64>::new(QueueConfig::default());

        for i in 0..10 {
            if let Some(mut r) = ring.reserve(1) {
                r.as_mut_slice()[0].write(i * 10);
                r.commit();
            }
        }

        let mut sum = 0u64;
        let consumed = ring.consume_up_to(5, |item| sum += item);

        assert_eq!(consumed, 5);
        assert_eq!(sum, 10 + 20 + 30 + 40);
        assert_eq!(ring.len(), 5);

        sum = 0;
        let consumed2 = ring.consume_up_to(10, |item| sum += item);
        assert_eq!(consumed2, 5);
        assert_eq!(sum, 50 + 60 + 70 + 80 + 90);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_full() {
        let config = QueueConfig::new(4, 16, false);
        let ring = Ring::<u64>::new(config);

        for i in 0..16 {
            if let Some(mut r) = ring.reserve(1) {
                r.as_mut_slice()[0].write(i);
                r.commit();
            }
        }

        assert!(ring.reserve(1).is_none());
    }

    #[test]
    fn test_consume_batch_drops_items() {
        use std::sync::atomic::AtomicUsize;

        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropTracker {
            _id: u64,
        }

        impl Drop for DropTracker {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROP_COUNT.store(0, Ordering::SeqCst);

        let ring = Ring::<DropTracker>::new(QueueConfig::default());

        for i in 0..5 {
            if let Some(mut r) = ring.reserve(1) {
                r.as_mut_slice()[0].write(DropTracker { _id: i });
                r.commit();
            }
        }

        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 0);

        let consumed = ring.consume_batch(|_item| {});

        assert_eq!(consumed, 5);
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_consume_up_to_drops_items() {
        use std::sync::atomic::AtomicUsize;

        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropTracker {
            _id: u64,
        }

        impl Drop for DropTracker {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROP_COUNT.store(0, Ordering::SeqCst);

        let ring = Ring::<DropTracker>::new(QueueConfig::default());

        for i in 0..10 {
            if let Some(mut r) = ring.reserve(1) {
                r.as_mut_slice()[0].write(DropTracker { _id: i });
                r.commit();
            }
        }

        let consumed = ring.consume_up_to(5, |_item| {});
        assert_eq!(consumed, 5);
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 5);

        let consumed = ring.consume_up_to(10, |_item| {});
        assert_eq!(consumed, 5);
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_consume_batch_owned_advances_head_past_a_panicking_item() {
        let ring = Ring::<u64>::new(QueueConfig::default());
        for i in 0..5u64 {
            assert!(ring.push(i));
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ring.consume_batch_owned(|item| {
                if item == 2 {
                    panic!("boom");
                }
            });
        }));
        assert!(result.is_err());

        // Items 0, 1, and the panicking 2 were already extracted from the
        // ring before the panic; head must have advanced past all three so
        // a later drain can't read or drop them a second time.
        assert_eq!(ring.len(), 2);
        let mut remaining = Vec::new();
        ring.consume_batch_owned(|item| remaining.push(item));
        assert_eq!(remaining, vec![3, 4]);
    }
}
