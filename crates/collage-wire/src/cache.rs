use crate::SpinLock;

/// Smallest pooled buffer size class, in bytes.
const MIN_CLASS_BITS: u32 = 6; // 64 bytes
/// Largest pooled buffer size class, in bytes. Payloads bigger than this are
/// allocated and freed directly instead of round-tripping through a free
/// list — they are rare enough (bulk instance snapshots) that pooling them
/// would just pin memory.
const MAX_CLASS_BITS: u32 = 20; // 1 MiB
const NUM_CLASSES: usize = (MAX_CLASS_BITS - MIN_CLASS_BITS + 1) as usize;
/// Bound on how many buffers a single size class retains. Past this, a
/// released buffer is freed instead of pooled, so a traffic spike can't pin
/// an unbounded amount of memory in the cache.
const MAX_RETAINED_PER_CLASS: usize = 256;

fn size_class_bits(size: usize) -> Option<u32> {
    if size == 0 {
        return Some(MIN_CLASS_BITS);
    }
    let bits = (usize::BITS - (size - 1).leading_zeros()).max(MIN_CLASS_BITS);
    if bits > MAX_CLASS_BITS {
        None
    } else {
        Some(bits)
    }
}

/// Pool of reusable command payload buffers, segregated by size class.
///
/// The receiver thread must not allocate on its hot path when steady-state
/// traffic reuses buffers of roughly the same size; this cache trades a
/// bounded amount of retained memory for that. Each size class is guarded
/// by its own [`SpinLock`] so producers on different size classes never
/// contend with each other.
pub struct CommandCache {
    classes: Vec<SpinLock<Vec<Box<[u8]>>>>,
}

impl CommandCache {
    pub fn new() -> Self {
        let mut classes = Vec::with_capacity(NUM_CLASSES);
        for _ in 0..NUM_CLASSES {
            classes.push(SpinLock::new(Vec::new()));
        }
        Self { classes }
    }

    fn class_index(bits: u32) -> usize {
        (bits - MIN_CLASS_BITS) as usize
    }

    /// Returns a buffer with capacity at least `size`. Reuses a pooled
    /// buffer of the right size class if one is free, otherwise allocates.
    /// Content beyond what the caller explicitly initializes is not
    /// zeroed.
    pub fn alloc(&self, size: usize) -> Box<[u8]> {
        match size_class_bits(size) {
            Some(bits) => {
                let capacity = 1usize << bits;
                let idx = Self::class_index(bits);
                let mut free_list = self.classes[idx].lock();
                free_list
                    .pop()
                    .unwrap_or_else(|| vec![0u8; capacity].into_boxed_slice())
            }
            None => vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Returns a buffer to the cache, or drops it if it doesn't match a
    /// pooled size class, or if that class is already at its retention
    /// bound.
    pub fn release(&self, buf: Box<[u8]>) {
        if buf.is_empty() {
            return;
        }
        let Some(bits) = size_class_bits(buf.len()) else {
            return; // oversized: free instead of retain
        };
        if (1usize << bits) != buf.len() {
            return; // not actually one of our size classes, e.g. a foreign buffer
        }
        let idx = Self::class_index(bits);
        let mut free_list = self.classes[idx].lock();
        if free_list.len() < MAX_RETAINED_PER_CLASS {
            free_list.push(buf);
        }
    }

    /// Total number of buffers currently retained across all size classes.
    /// Exposed for tests and diagnostics.
    pub fn retained_count(&self) -> usize {
        self.classes.iter().map(|c| c.lock().len()).sum()
    }
}

impl Default for CommandCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_alloc_rounds_up_to_size_class() {
        let cache = CommandCache::new();
        let buf = cache.alloc(10);
        assert!(buf.len() >= 10);
        assert_eq!(buf.len(), 1 << MIN_CLASS_BITS);
    }

    #[test]
    fn test_release_then_alloc_reuses_buffer() {
        let cache = CommandCache::new();
        let buf = cache.alloc(100);
        let cap = buf.len();
        cache.release(buf);
        assert_eq!(cache.retained_count(), 1);

        let buf2 = cache.alloc(100);
        assert_eq!(buf2.len(), cap);
        assert_eq!(cache.retained_count(), 0);
    }

    #[test]
    fn test_oversized_alloc_not_pooled() {
        let cache = CommandCache::new();
        let huge = cache.alloc(1 << 30);
        cache.release(huge);
        assert_eq!(cache.retained_count(), 0);
    }

    #[test]
    fn test_concurrent_alloc_release() {
        let cache = Arc::new(CommandCache::new());
        let mut handles = Vec::new();
        for _ in 0..13 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    let buf = cache.alloc(256);
                    cache.release(buf);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.retained_count() <= MAX_RETAINED_PER_CLASS);
    }
}
