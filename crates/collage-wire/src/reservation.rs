use crate::invariants::debug_assert_valid_ring_ptr;
use crate::Ring;
use std::mem::MaybeUninit;

/// A producer's claim on a run of slots in a [`Ring`], returned by
/// [`Ring::reserve`]. The caller writes into [`as_mut_slice`](Self::as_mut_slice)
/// and then calls [`commit`](Self::commit) (or [`commit_n`](Self::commit_n)
/// for a short write) to publish the slots to the consumer side.
///
/// `reserve(n)` can hand back fewer than `n` slots when the claim would
/// straddle the end of the buffer, so check
/// [`len`](Self::len)/[`is_empty`](Self::is_empty) rather than assuming the
/// requested count.
pub struct Reservation<'a, T> {
    slots: &'a mut [MaybeUninit<T>],
    ring: *const Ring<T>,
    reserved: usize,
}

impl<'a, T> Reservation<'a, T> {
    pub(crate) fn new(slots: &'a mut [MaybeUninit<T>], ring: *const Ring<T>) -> Self {
        debug_assert_valid_ring_ptr!(ring);
        let reserved = slots.len();
        Self {
            slots,
            ring,
            reserved,
        }
    }

    /// The claimed slots, uninitialized until written through this slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [MaybeUninit<T>] {
        self.slots
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.reserved
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.reserved == 0
    }

    /// Publishes every claimed slot.
    pub fn commit(self) {
        let n = self.reserved;
        self.commit_n(n);
    }

    /// Publishes only the first `n` claimed slots, for a write that filled
    /// fewer than it reserved.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`len`](Self::len).
    pub fn commit_n(self, n: usize) {
        assert!(n <= self.reserved, "cannot commit more slots than were reserved");
        debug_assert_valid_ring_ptr!(self.ring);
        // SAFETY: `ring` outlives this reservation's `'a` lifetime — it was
        // borrowed from the same `Ring` that produced `slots`.
        unsafe { (*self.ring).commit_internal(n) };
    }
}
