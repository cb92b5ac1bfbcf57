//! `debug_assert!`-based consistency checks for the ring's head/tail
//! bookkeeping. Compiled out entirely in release builds; in debug builds
//! they turn a silently-corrupted ring into an immediate panic with a
//! message that says which invariant broke and with what values.

/// `head` and `tail` never describe an occupied range wider than the ring's
/// capacity.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "ring count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// A consumer can never advance `head` past the producer's `tail`.
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head <= $tail,
            "consumer advanced head to {} past tail {}",
            $new_head,
            $tail
        )
    };
}

/// `head` and `tail` are each monotonically non-decreasing; a reservation or
/// a consume step is never allowed to walk either counter backwards.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

/// Sanity check against the sequence counter quietly wrapping `u64`. At any
/// throughput this system could plausibly see, a wrap takes decades, so
/// tripping this means a counter was corrupted rather than that time passed.
macro_rules! debug_assert_no_wrap {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old || $old.wrapping_sub($new) > (1u64 << 32),
            "{} sequence jumped from {} to {}, looks like a wrap rather than normal progress",
            $name,
            $old,
            $new
        )
    };
}

/// A slot being read must fall inside the currently-initialized `[head,
/// tail)` window; reading outside it means reading either uninitialized
/// memory or a slot the consumer already passed.
macro_rules! debug_assert_initialized_read {
    ($pos:expr, $head:expr, $tail:expr) => {
        debug_assert!(
            $pos >= $head && $pos < $tail,
            "read at sequence {} falls outside the initialized window [{}, {})",
            $pos,
            $head,
            $tail
        )
    };
}

/// A `Reservation`'s back-pointer to its `Ring` must never be null; the
/// safety of `commit_n` dereferencing it depends on this.
macro_rules! debug_assert_valid_ring_ptr {
    ($ptr:expr) => {
        debug_assert!(!$ptr.is_null(), "reservation holds a null ring pointer")
    };
}

/// Per-producer consumption counters only go up; this is how `CommandQueue`
/// checks that a single producer's commands are still drained in the order
/// it pushed them, even when interleaved with other producers.
macro_rules! debug_assert_fifo_count {
    ($producer_id:expr, $old_count:expr, $new_count:expr) => {
        debug_assert!(
            $new_count >= $old_count,
            "producer {} consumption count went backwards: {} -> {}",
            $producer_id,
            $old_count,
            $new_count
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_fifo_count;
pub(crate) use debug_assert_head_not_past_tail;
pub(crate) use debug_assert_initialized_read;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_no_wrap;
pub(crate) use debug_assert_valid_ring_ptr;
