//! Age-bounded cache of serialized instance data, keyed by object id and
//! version, so a slave re-subscribing (or a late joiner) can skip a network
//! round trip when the master's data is already held locally.
//!
//! One writer (the receiver thread), many readers: a read-write lock is
//! enough, the same tradeoff [`crate::ObjectStore`]'s object table makes.

use collage_wire::{NodeId, ObjectId, Version};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Entry {
    version: Version,
    source: NodeId,
    bytes: Box<[u8]>,
    inserted_at: Instant,
}

struct Inner {
    by_object: HashMap<ObjectId, VecDeque<Entry>>,
    total_bytes: usize,
}

/// A process-local, size-budgeted cache of instance/delta payloads.
pub struct InstanceCache {
    inner: RwLock<Inner>,
    byte_budget: usize,
    enabled: std::sync::atomic::AtomicBool,
}

impl InstanceCache {
    pub fn new(byte_budget: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_object: HashMap::new(),
                total_bytes: 0,
            }),
            byte_budget,
            enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Records a payload for `id` at `version`, sourced from `source`.
    /// Entries are kept sorted ascending by version. If the total cached
    /// size exceeds the configured budget, the globally oldest entries
    /// (across all object ids) are evicted first.
    pub fn add(&self, id: ObjectId, version: Version, source: NodeId, bytes: Box<[u8]>) {
        if !self.enabled.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        let mut inner = self.inner.write().unwrap();
        let len = bytes.len();
        let deque = inner.by_object.entry(id).or_default();
        let pos = deque.partition_point(|e| e.version.as_u64() < version.as_u64());
        deque.insert(
            pos,
            Entry {
                version,
                source,
                bytes,
                inserted_at: Instant::now(),
            },
        );
        inner.total_bytes += len;
        self.evict_to_budget(&mut inner);
    }

    fn evict_to_budget(&self, inner: &mut Inner) {
        while inner.total_bytes > self.byte_budget {
            let Some((&oldest_id, _)) = inner
                .by_object
                .iter()
                .filter(|(_, d)| !d.is_empty())
                .min_by_key(|(_, d)| d.front().map(|e| e.inserted_at))
            else {
                break;
            };
            let deque = inner.by_object.get_mut(&oldest_id).unwrap();
            if let Some(evicted) = deque.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(evicted.bytes.len());
            }
            if deque.is_empty() {
                inner.by_object.remove(&oldest_id);
            }
        }
    }

    /// Looks up the payload for `id` whose version falls within
    /// `[min, max]` inclusive. Returns the newest match in range.
    pub fn lookup(&self, id: ObjectId, min: Version, max: Version) -> Option<Box<[u8]>> {
        let inner = self.inner.read().unwrap();
        let deque = inner.by_object.get(&id)?;
        deque
            .iter()
            .rev()
            .find(|e| e.version.as_u64() >= min.as_u64() && e.version.as_u64() <= max.as_u64())
            .map(|e| e.bytes.clone())
    }

    /// Lowest and highest version currently cached for `id`, if any.
    /// Lets a slave advertise how much of an object it already holds when
    /// re-subscribing, so the master can answer from `_version` instead of
    /// sending a fresh payload.
    pub fn range(&self, id: ObjectId) -> Option<(Version, Version)> {
        let inner = self.inner.read().unwrap();
        let deque = inner.by_object.get(&id)?;
        let front = deque.front()?.version;
        let back = deque.back()?.version;
        Some((front, back))
    }

    /// Drops every entry sourced from `node` (e.g. on peer loss).
    pub fn erase(&self, node: NodeId) {
        let mut inner = self.inner.write().unwrap();
        let mut total_removed = 0usize;
        for deque in inner.by_object.values_mut() {
            let removed: usize = deque
                .iter()
                .filter(|e| e.source == node)
                .map(|e| e.bytes.len())
                .sum();
            deque.retain(|e| e.source != node);
            total_removed += removed;
        }
        inner.total_bytes = inner.total_bytes.saturating_sub(total_removed);
        inner.by_object.retain(|_, d| !d.is_empty());
    }

    /// Drops entries older than `age`.
    pub fn expire(&self, age: Duration) {
        let mut inner = self.inner.write().unwrap();
        let cutoff = Instant::now().checked_sub(age);
        let Some(cutoff) = cutoff else { return };
        let mut total_removed = 0usize;
        for deque in inner.by_object.values_mut() {
            let removed: usize = deque
                .iter()
                .filter(|e| e.inserted_at < cutoff)
                .map(|e| e.bytes.len())
                .sum();
            deque.retain(|e| e.inserted_at >= cutoff);
            total_removed += removed;
        }
        inner.total_bytes = inner.total_bytes.saturating_sub(total_removed);
        inner.by_object.retain(|_, d| !d.is_empty());
    }

    /// Empties the cache and stops admitting new entries.
    pub fn disable(&self) {
        self.enabled.store(false, std::sync::atomic::Ordering::Release);
        let mut inner = self.inner.write().unwrap();
        inner.by_object.clear();
        inner.total_bytes = 0;
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.read().unwrap().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> ObjectId {
        ObjectId::from_u128(n)
    }

    #[test]
    fn test_add_and_lookup_exact_version() {
        let cache = InstanceCache::new(1024);
        cache.add(id(1), Version::new(5), NodeId::ZERO, Box::from(&b"v5"[..]));
        let found = cache.lookup(id(1), Version::new(5), Version::new(5));
        assert_eq!(found.as_deref(), Some(&b"v5"[..]));
    }

    #[test]
    fn test_lookup_range_returns_newest() {
        let cache = InstanceCache::new(1024);
        cache.add(id(1), Version::new(1), NodeId::ZERO, Box::from(&b"a"[..]));
        cache.add(id(1), Version::new(2), NodeId::ZERO, Box::from(&b"b"[..]));
        let found = cache.lookup(id(1), Version::new(1), Version::new(2));
        assert_eq!(found.as_deref(), Some(&b"b"[..]));
    }

    #[test]
    fn test_budget_evicts_oldest_first() {
        let cache = InstanceCache::new(4);
        cache.add(id(1), Version::new(1), NodeId::ZERO, Box::from(&b"aa"[..]));
        cache.add(id(2), Version::new(1), NodeId::ZERO, Box::from(&b"bb"[..]));
        assert_eq!(cache.total_bytes(), 4);
        cache.add(id(3), Version::new(1), NodeId::ZERO, Box::from(&b"cc"[..]));
        assert!(cache.total_bytes() <= 4);
        assert!(cache.lookup(id(1), Version::new(1), Version::new(1)).is_none());
    }

    #[test]
    fn test_range_spans_lowest_and_highest_cached_version() {
        let cache = InstanceCache::new(1024);
        assert_eq!(cache.range(id(1)), None);
        cache.add(id(1), Version::new(3), NodeId::ZERO, Box::from(&b"a"[..]));
        cache.add(id(1), Version::new(7), NodeId::ZERO, Box::from(&b"b"[..]));
        assert_eq!(cache.range(id(1)), Some((Version::new(3), Version::new(7))));
    }

    #[test]
    fn test_erase_drops_only_matching_source() {
        let cache = InstanceCache::new(1024);
        let a = NodeId::generate();
        let b = NodeId::generate();
        cache.add(id(1), Version::new(1), a, Box::from(&b"x"[..]));
        cache.add(id(1), Version::new(2), b, Box::from(&b"y"[..]));
        cache.erase(a);
        assert!(cache.lookup(id(1), Version::new(1), Version::new(1)).is_none());
        assert!(cache.lookup(id(1), Version::new(2), Version::new(2)).is_some());
    }

    #[test]
    fn test_disable_empties_and_stops_admitting() {
        let cache = InstanceCache::new(1024);
        cache.add(id(1), Version::new(1), NodeId::ZERO, Box::from(&b"x"[..]));
        cache.disable();
        assert_eq!(cache.total_bytes(), 0);
        cache.add(id(1), Version::new(2), NodeId::ZERO, Box::from(&b"y"[..]));
        assert_eq!(cache.total_bytes(), 0);
    }
}
