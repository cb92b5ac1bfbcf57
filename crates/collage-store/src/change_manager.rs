//! Per-object distribution policy: the master side packs and streams
//! changes to subscribers, the slave side applies what arrives in version
//! order. Four behaviors, one tagged variant — no inheritance hierarchy.

use collage_wire::{NodeId, Version};
use std::collections::{HashMap, VecDeque};

/// Outcome of a master's subscribe handler: either "use what you already
/// have cached" (with the version to use) or a payload to stream to the
/// new subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeReply {
    /// Reply `VERSION_INVALID`; the slave should serve the request from its
    /// own instance cache at `use_version` instead of waiting for a stream.
    UseCache { use_version: Version },
    /// Stream this payload (instance or delta bytes) tagged with `version`.
    Stream { version: Version, bytes: Vec<u8> },
}

/// Master-side subscriber bookkeeping, shared by the buffered and
/// unbuffered master variants.
#[derive(Debug, Default)]
struct Subscribers {
    slaves: Vec<NodeId>,
    counts: HashMap<NodeId, u32>,
}

impl Subscribers {
    fn add(&mut self, node: NodeId) {
        *self.counts.entry(node).or_insert(0) += 1;
        if let Err(pos) = self.slaves.binary_search(&node) {
            self.slaves.insert(pos, node);
        }
    }

    fn remove(&mut self, node: NodeId) {
        let Some(count) = self.counts.get_mut(&node) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(&node);
            if let Ok(pos) = self.slaves.binary_search(&node) {
                self.slaves.remove(pos);
            }
        }
    }

    fn count(&self, node: NodeId) -> u32 {
        self.counts.get(&node).copied().unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }
}


/// A single retained delta, kept by the buffered master so a slave
/// subscribing at [`Version::OLDEST`] can replay history instead of
/// forcing a fresh instance snapshot.
#[derive(Debug, Clone)]
struct BacklogEntry {
    version: Version,
    bytes: Vec<u8>,
}

/// Master CM state machine: `Idle` between commits, `Committing` while a
/// commit's delta is being packed and streamed. The distinction exists for
/// assertions and diagnostics; commits on this node are not reentrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MasterState {
    Idle,
    Committing,
}

/// Slave CM state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Unmapped,
    Mapping,
    Live,
    Stale,
}

/// Per-object change manager. `Null` backs locally-only objects that are
/// never registered as a master; `UnbufferedMaster`/`BufferedMaster` back a
/// master instance; `Slave` backs a mapped replica.
pub enum ChangeManager {
    Null,
    UnbufferedMaster {
        state: MasterState,
        version: Version,
        subscribers: Subscribers,
    },
    BufferedMaster {
        state: MasterState,
        version: Version,
        subscribers: Subscribers,
        backlog: VecDeque<BacklogEntry>,
        backlog_limit: usize,
    },
    Slave {
        state: SlaveState,
        version: Version,
        master: NodeId,
    },
}

impl ChangeManager {
    pub fn null() -> Self {
        ChangeManager::Null
    }

    pub fn unbuffered_master() -> Self {
        ChangeManager::UnbufferedMaster {
            state: MasterState::Idle,
            version: Version::FIRST,
            subscribers: Subscribers::default(),
        }
    }

    pub fn buffered_master(backlog_limit: usize) -> Self {
        ChangeManager::BufferedMaster {
            state: MasterState::Idle,
            version: Version::FIRST,
            subscribers: Subscribers::default(),
            backlog: VecDeque::new(),
            backlog_limit,
        }
    }

    pub fn slave(master: NodeId) -> Self {
        ChangeManager::Slave {
            state: SlaveState::Mapping,
            version: Version::NONE,
            master,
        }
    }

    pub fn version(&self) -> Version {
        match self {
            ChangeManager::Null => Version::NONE,
            ChangeManager::UnbufferedMaster { version, .. }
            | ChangeManager::BufferedMaster { version, .. }
            | ChangeManager::Slave { version, .. } => *version,
        }
    }

    pub fn slave_state(&self) -> Option<SlaveState> {
        match self {
            ChangeManager::Slave { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Runs one commit: packs a delta via `pack`, streams it to subscribers
    /// (conceptually; the actual wire send is the caller's job, this just
    /// decides the resulting version), and advances the version only if
    /// `pack` produced non-empty bytes. Returns the version to serve to the
    /// waiting request, and the delta bytes to send (empty if there were no
    /// subscribers or nothing changed).
    pub fn commit(&mut self, pack: impl FnOnce() -> Vec<u8>) -> (Version, Vec<u8>) {
        match self {
            ChangeManager::Null | ChangeManager::Slave { .. } => {
                panic!("commit() called on a non-master change manager")
            }
            ChangeManager::UnbufferedMaster {
                state,
                version,
                subscribers,
            } => {
                if subscribers.is_empty() {
                    return (*version, Vec::new());
                }
                *state = MasterState::Committing;
                let delta = pack();
                if !delta.is_empty() {
                    *version = version.next();
                }
                *state = MasterState::Idle;
                (*version, delta)
            }
            ChangeManager::BufferedMaster {
                state,
                version,
                subscribers,
                backlog,
                backlog_limit,
            } => {
                *state = MasterState::Committing;
                let delta = pack();
                if !delta.is_empty() {
                    *version = version.next();
                    backlog.push_back(BacklogEntry {
                        version: *version,
                        bytes: delta.clone(),
                    });
                    while backlog.len() > *backlog_limit {
                        backlog.pop_front();
                    }
                }
                *state = MasterState::Idle;
                let sent = if subscribers.is_empty() {
                    Vec::new()
                } else {
                    delta
                };
                (*version, sent)
            }
        }
    }

    /// Master-side subscribe handling (`addSlave`). `requested` is the
    /// version the slave asked for (`Version::OLDEST`, `Version::NONE`, or
    /// a concrete version); `cache_covers_current` tells whether the
    /// slave's own cached range already covers the current version, in
    /// which case `min_cached_version` is the low end of that range —
    /// what a slave that asked for `OLDEST` should apply from its cache
    /// instead of `_version`.
    pub fn add_slave(
        &mut self,
        node: NodeId,
        requested: Version,
        cache_covers_current: bool,
        min_cached_version: Version,
        instance_data: impl FnOnce() -> Vec<u8>,
    ) -> SubscribeReply {
        match self {
            ChangeManager::Null | ChangeManager::Slave { .. } => {
                panic!("add_slave() called on a non-master change manager")
            }
            ChangeManager::UnbufferedMaster {
                version,
                subscribers,
                ..
            } => {
                subscribers.add(node);
                if cache_covers_current && requested != Version::NONE {
                    let use_version = if requested == Version::OLDEST {
                        min_cached_version
                    } else {
                        *version
                    };
                    return SubscribeReply::UseCache { use_version };
                }
                SubscribeReply::Stream {
                    version: *version,
                    bytes: instance_data(),
                }
            }
            ChangeManager::BufferedMaster {
                version,
                subscribers,
                backlog,
                ..
            } => {
                subscribers.add(node);
                if cache_covers_current && requested != Version::NONE {
                    let use_version = if requested == Version::OLDEST {
                        min_cached_version
                    } else {
                        *version
                    };
                    return SubscribeReply::UseCache { use_version };
                }
                if requested == Version::OLDEST {
                    if let Some(oldest) = backlog.front() {
                        return SubscribeReply::Stream {
                            version: oldest.version,
                            bytes: oldest.bytes.clone(),
                        };
                    }
                }
                SubscribeReply::Stream {
                    version: *version,
                    bytes: instance_data(),
                }
            }
        }
    }

    /// Master-side `removeSlave`: decrements the subscriber count, dropping
    /// the node entirely once it reaches zero.
    pub fn remove_slave(&mut self, node: NodeId) {
        match self {
            ChangeManager::Null | ChangeManager::Slave { .. } => {}
            ChangeManager::UnbufferedMaster { subscribers, .. }
            | ChangeManager::BufferedMaster { subscribers, .. } => subscribers.remove(node),
        }
    }

    pub fn subscriber_count(&self, node: NodeId) -> u32 {
        match self {
            ChangeManager::UnbufferedMaster { subscribers, .. }
            | ChangeManager::BufferedMaster { subscribers, .. } => subscribers.count(node),
            _ => 0,
        }
    }

    /// The current subscriber set, in sorted order (empty for non-master
    /// variants).
    pub fn slaves(&self) -> &[NodeId] {
        match self {
            ChangeManager::UnbufferedMaster { subscribers, .. }
            | ChangeManager::BufferedMaster { subscribers, .. } => &subscribers.slaves,
            ChangeManager::Null | ChangeManager::Slave { .. } => &[],
        }
    }

    /// Master hand-off: directly adds a node to the subscriber set without
    /// that node re-subscribing, returning the current version to send it.
    pub fn adopt_slave(&mut self, node: NodeId) -> Version {
        match self {
            ChangeManager::UnbufferedMaster {
                version,
                subscribers,
                ..
            }
            | ChangeManager::BufferedMaster {
                version,
                subscribers,
                ..
            } => {
                subscribers.add(node);
                *version
            }
            ChangeManager::Null | ChangeManager::Slave { .. } => {
                panic!("adopt_slave() called on a non-master change manager")
            }
        }
    }

    /// Slave-side application of an incoming instance (full snapshot) or
    /// delta packet at `incoming_version`. Returns `true` if it was applied
    /// (version advanced / state now matches), `false` if it was rejected
    /// as out of order.
    pub fn apply(
        &mut self,
        incoming_version: Version,
        is_instance: bool,
        apply: impl FnOnce(),
    ) -> bool {
        match self {
            ChangeManager::Slave { state, version, .. } => {
                let in_order = is_instance || incoming_version == version.next();
                if !in_order {
                    return false;
                }
                apply();
                *version = incoming_version;
                *state = SlaveState::Live;
                true
            }
            _ => panic!("apply() called on a non-slave change manager"),
        }
    }

    /// Marks a mapped slave as having lost contact with its master.
    pub fn mark_stale(&mut self) {
        if let ChangeManager::Slave { state, .. } = self {
            *state = SlaveState::Stale;
        }
    }

    pub fn mark_unmapped(&mut self) {
        if let ChangeManager::Slave { state, .. } = self {
            *state = SlaveState::Unmapped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbuffered_commit_advances_version_only_on_nonempty_pack() {
        let mut cm = ChangeManager::unbuffered_master();
        cm.add_slave(NodeId::generate(), Version::NONE, false, Version::NONE, Vec::new);

        let (v1, bytes) = cm.commit(|| Vec::new());
        assert_eq!(v1, Version::FIRST);
        assert!(bytes.is_empty());

        let (v2, bytes) = cm.commit(|| vec![1, 2, 3]);
        assert_eq!(v2, Version::new(2));
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_commit_with_no_slaves_does_not_advance() {
        let mut cm = ChangeManager::unbuffered_master();
        let (v, bytes) = cm.commit(|| vec![9]);
        assert_eq!(v, Version::FIRST);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_add_slave_sorted_unique_and_count() {
        let mut cm = ChangeManager::unbuffered_master();
        let a = NodeId::generate();
        cm.add_slave(a, Version::NONE, false, Version::NONE, || vec![0]);
        cm.add_slave(a, Version::NONE, false, Version::NONE, || vec![0]);
        assert_eq!(cm.subscriber_count(a), 2);
    }

    #[test]
    fn test_remove_slave_balance() {
        let mut cm = ChangeManager::unbuffered_master();
        let a = NodeId::generate();
        cm.add_slave(a, Version::NONE, false, Version::NONE, || vec![0]);
        cm.add_slave(a, Version::NONE, false, Version::NONE, || vec![0]);
        cm.remove_slave(a);
        assert_eq!(cm.subscriber_count(a), 1);
        cm.remove_slave(a);
        assert_eq!(cm.subscriber_count(a), 0);
    }

    #[test]
    fn test_add_slave_uses_cache_when_range_covers_current() {
        let mut cm = ChangeManager::unbuffered_master();
        let reply = cm.add_slave(NodeId::generate(), Version::new(3), true, Version::NONE, || {
            vec![1]
        });
        assert_eq!(
            reply,
            SubscribeReply::UseCache {
                use_version: Version::FIRST
            }
        );
    }

    #[test]
    fn test_add_slave_oldest_with_cache_hit_uses_min_cached_version() {
        let mut cm = ChangeManager::unbuffered_master();
        let reply = cm.add_slave(
            NodeId::generate(),
            Version::OLDEST,
            true,
            Version::new(3),
            || vec![1],
        );
        assert_eq!(
            reply,
            SubscribeReply::UseCache {
                use_version: Version::new(3)
            }
        );
    }

    #[test]
    fn test_buffered_master_serves_oldest_from_backlog() {
        let mut cm = ChangeManager::buffered_master(4);
        cm.add_slave(NodeId::generate(), Version::NONE, false, Version::NONE, Vec::new);
        cm.commit(|| vec![1]);
        cm.commit(|| vec![2]);

        let reply = cm.add_slave(
            NodeId::generate(),
            Version::OLDEST,
            false,
            Version::NONE,
            || vec![9],
        );
        assert_eq!(
            reply,
            SubscribeReply::Stream {
                version: Version::new(2),
                bytes: vec![1]
            }
        );
    }

    #[test]
    fn test_buffered_backlog_bounded() {
        let mut cm = ChangeManager::buffered_master(1);
        cm.add_slave(NodeId::generate(), Version::NONE, false, Version::NONE, Vec::new);
        cm.commit(|| vec![1]);
        cm.commit(|| vec![2]);
        if let ChangeManager::BufferedMaster { backlog, .. } = &cm {
            assert_eq!(backlog.len(), 1);
            assert_eq!(backlog.front().unwrap().bytes, vec![2]);
        } else {
            panic!("expected buffered master");
        }
    }

    #[test]
    fn test_slave_apply_in_order_and_out_of_order() {
        let master = NodeId::generate();
        let mut cm = ChangeManager::slave(master);
        assert!(cm.apply(Version::FIRST, true, || {}));
        assert_eq!(cm.slave_state(), Some(SlaveState::Live));
        assert_eq!(cm.version(), Version::FIRST);

        assert!(cm.apply(Version::new(2), false, || {}));
        assert_eq!(cm.version(), Version::new(2));

        assert!(!cm.apply(Version::new(9), false, || {}));
        assert_eq!(cm.version(), Version::new(2));
    }

    #[test]
    fn test_mark_stale_and_unmapped() {
        let mut cm = ChangeManager::slave(NodeId::generate());
        cm.mark_stale();
        assert_eq!(cm.slave_state(), Some(SlaveState::Stale));
        cm.mark_unmapped();
        assert_eq!(cm.slave_state(), Some(SlaveState::Unmapped));
    }

    #[test]
    fn test_adopt_slave_hands_off_without_resubscribe() {
        let mut cm = ChangeManager::unbuffered_master();
        cm.commit(|| vec![1]);
        let node = NodeId::generate();
        let version = cm.adopt_slave(node);
        assert_eq!(version, Version::FIRST);
        assert_eq!(cm.subscriber_count(node), 1);
    }
}
