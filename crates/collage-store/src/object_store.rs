//! Ties [`crate::Object`], [`crate::ChangeManager`] and
//! [`crate::InstanceCache`] together into the node-local half of the
//! distributed object protocol.
//!
//! Everything here is synchronous and network-free by design: this store
//! decides *what* should happen (assign an instance id, advance a version,
//! stream these bytes to that subscriber) and returns plain data describing
//! it. Actually getting bytes onto a wire, resolving an unknown master by
//! broadcast, and blocking a caller on a reply are the job of the process
//! that owns a [`collage_net::Dispatcher`] and [`collage_net::RequestRegistry`]
//! above this crate.

use crate::change_manager::{ChangeManager, SubscribeReply};
use crate::instance_cache::InstanceCache;
use crate::object::{ChangeType, Object};
use collage_wire::{InstanceId, NodeId, ObjectId, Version};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectStoreError {
    #[error("object is already registered or mapped")]
    AlreadyAttached,
    #[error("no such object is attached to this store")]
    NotFound,
    #[error("operation requires a master change manager")]
    NotMaster,
    #[error("operation requires a slave change manager")]
    NotSlave,
}

struct Entry {
    instance_id: InstanceId,
    object: Box<dyn Object>,
    cm: ChangeManager,
}

/// Default number of retained deltas for a `BufferedDelta` master; chosen
/// to cover a handful of missed commits without unbounded memory growth.
const DEFAULT_BACKLOG: usize = 16;

/// Node-local table of attached objects plus the ambient policy state
/// (send-on-register, instance cache) that the protocol handlers consult.
pub struct ObjectStore {
    local_node: NodeId,
    objects: Mutex<HashMap<ObjectId, Entry>>,
    next_instance_id: AtomicU32,
    send_on_register: Mutex<u32>,
    send_queue: Mutex<VecDeque<ObjectId>>,
    cache: InstanceCache,
    push_groups: Mutex<HashMap<u128, Vec<u8>>>,
}

impl ObjectStore {
    pub fn new(local_node: NodeId, cache_byte_budget: usize) -> Self {
        Self {
            local_node,
            objects: Mutex::new(HashMap::new()),
            next_instance_id: AtomicU32::new(0),
            send_on_register: Mutex::new(0),
            send_queue: Mutex::new(VecDeque::new()),
            cache: InstanceCache::new(cache_byte_budget),
            push_groups: Mutex::new(HashMap::new()),
        }
    }

    fn fresh_instance_id(&self) -> InstanceId {
        InstanceId::new(self.next_instance_id.fetch_add(1, Ordering::Relaxed))
    }

    fn cm_for(change_type: ChangeType) -> ChangeManager {
        match change_type {
            ChangeType::Static => ChangeManager::null(),
            ChangeType::Instance | ChangeType::UnbufferedDelta => ChangeManager::unbuffered_master(),
            ChangeType::BufferedDelta => ChangeManager::buffered_master(DEFAULT_BACKLOG),
        }
    }

    /// Registers `object` as locally mastered under `id`. Installs a master
    /// (or null, for `ChangeType::Static`) change manager and, if
    /// send-on-register is enabled, queues it for the idle broadcast.
    pub fn register_object(
        &self,
        id: ObjectId,
        object: Box<dyn Object>,
    ) -> Result<InstanceId, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&id) {
            return Err(ObjectStoreError::AlreadyAttached);
        }
        let instance_id = self.fresh_instance_id();
        let cm = Self::cm_for(object.change_type());
        objects.insert(
            id,
            Entry {
                instance_id,
                object,
                cm,
            },
        );
        drop(objects);
        if *self.send_on_register.lock().unwrap() > 0 {
            self.send_queue.lock().unwrap().push_back(id);
        }
        Ok(instance_id)
    }

    /// Deregisters a locally mastered object, returning the subscribers
    /// that must be sent `CMD_UNSUBSCRIBE_OBJECT` before the caller drops
    /// the local entry.
    pub fn deregister_object(&self, id: ObjectId) -> Result<Vec<NodeId>, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.get(&id).ok_or(ObjectStoreError::NotFound)?;
        let subscribers = entry.cm.slaves().to_vec();
        objects.remove(&id);
        drop(objects);
        self.send_queue.lock().unwrap().retain(|queued| *queued != id);
        Ok(subscribers)
    }

    /// Attaches a slave-side mapping: assigns a fresh instance id and
    /// installs a `Slave` CM pointed at `master`. The caller still has to
    /// send `CMD_SESSION_SUBSCRIBE_OBJECT` to `master`.
    pub fn map_object(
        &self,
        id: ObjectId,
        object: Box<dyn Object>,
        master: NodeId,
    ) -> Result<InstanceId, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&id) {
            return Err(ObjectStoreError::AlreadyAttached);
        }
        let instance_id = self.fresh_instance_id();
        objects.insert(
            id,
            Entry {
                instance_id,
                object,
                cm: ChangeManager::slave(master),
            },
        );
        Ok(instance_id)
    }

    /// Detaches a mapped object, returning the master to notify with
    /// `CMD_UNSUBSCRIBE_OBJECT` (`None` if the object was not a slave
    /// mapping, e.g. it was never fully mapped).
    pub fn unmap_object(&self, id: ObjectId) -> Result<Option<NodeId>, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.remove(&id).ok_or(ObjectStoreError::NotFound)?;
        match entry.cm {
            ChangeManager::Slave { master, .. } => Ok(Some(master)),
            _ => Ok(None),
        }
    }

    pub fn is_attached(&self, id: ObjectId) -> bool {
        self.objects.lock().unwrap().contains_key(&id)
    }

    pub fn instance_id_of(&self, id: ObjectId) -> Option<InstanceId> {
        self.objects.lock().unwrap().get(&id).map(|e| e.instance_id)
    }

    /// Returns this node's id if `id` is mastered locally; `None` means
    /// "unknown to this node" and a caller above must broadcast
    /// `CMD_FIND_MASTER_NODE_ID`.
    pub fn find_master_node_id(&self, id: ObjectId) -> Option<NodeId> {
        let objects = self.objects.lock().unwrap();
        let entry = objects.get(&id)?;
        match entry.cm {
            ChangeManager::UnbufferedMaster { .. } | ChangeManager::BufferedMaster { .. } => {
                Some(self.local_node)
            }
            _ => None,
        }
    }

    /// Current version of the object's change manager (`Version::NONE` for
    /// an unattached id or a `Null`-backed one).
    pub fn version_of(&self, id: ObjectId) -> Option<Version> {
        Some(self.objects.lock().unwrap().get(&id)?.cm.version())
    }

    /// The object's current state, for broadcasting a newly registered
    /// object's state to every other node when the command queue goes
    /// idle (`notifyCommandThreadIdle`'s payload).
    pub fn instance_snapshot(&self, id: ObjectId) -> Option<(Version, Vec<u8>)> {
        let objects = self.objects.lock().unwrap();
        let entry = objects.get(&id)?;
        Some((entry.cm.version(), entry.object.get_instance_data()))
    }

    pub fn instance_id_matches(&self, id: ObjectId, instance: InstanceId) -> bool {
        self.objects
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|e| e.instance_id == instance)
    }

    /// Runs a commit against the master-side object at `id`: packs a
    /// delta and advances the version only if the pack produced bytes.
    /// Returns the resulting version and the bytes to stream (empty if
    /// there were no subscribers, or the pack was empty).
    pub fn commit(&self, id: ObjectId) -> Result<(Version, Vec<u8>), ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.get_mut(&id).ok_or(ObjectStoreError::NotFound)?;
        match entry.cm {
            ChangeManager::UnbufferedMaster { .. } | ChangeManager::BufferedMaster { .. } => {
                let object = &mut entry.object;
                Ok(entry.cm.commit(|| object.pack()))
            }
            _ => Err(ObjectStoreError::NotMaster),
        }
    }

    /// Master-side subscribe handling: records the subscriber and decides
    /// whether to tell it to use its own cache or to stream a payload.
    /// `min_cached_version` is the low end of the slave's already-cached
    /// range, used as the reply version when `cache_covers_current` is set
    /// and the slave asked for `Version::OLDEST`.
    pub fn add_slave(
        &self,
        id: ObjectId,
        node: NodeId,
        requested: Version,
        cache_covers_current: bool,
        min_cached_version: Version,
    ) -> Result<SubscribeReply, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.get_mut(&id).ok_or(ObjectStoreError::NotFound)?;
        match entry.cm {
            ChangeManager::UnbufferedMaster { .. } | ChangeManager::BufferedMaster { .. } => {
                let object = &entry.object;
                Ok(entry.cm.add_slave(
                    node,
                    requested,
                    cache_covers_current,
                    min_cached_version,
                    || object.get_instance_data(),
                ))
            }
            _ => Err(ObjectStoreError::NotMaster),
        }
    }

    pub fn remove_slave(&self, id: ObjectId, node: NodeId) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.get_mut(&id).ok_or(ObjectStoreError::NotFound)?;
        entry.cm.remove_slave(node);
        Ok(())
    }

    pub fn subscriber_count(&self, id: ObjectId, node: NodeId) -> u32 {
        let objects = self.objects.lock().unwrap();
        objects.get(&id).map(|e| e.cm.subscriber_count(node)).unwrap_or(0)
    }

    /// Hands an already-subscribed-elsewhere node directly to this master
    /// without it re-subscribing from scratch; returns the version to send.
    pub fn adopt_slave(&self, id: ObjectId, node: NodeId) -> Result<Version, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.get_mut(&id).ok_or(ObjectStoreError::NotFound)?;
        match entry.cm {
            ChangeManager::UnbufferedMaster { .. } | ChangeManager::BufferedMaster { .. } => {
                Ok(entry.cm.adopt_slave(node))
            }
            _ => Err(ObjectStoreError::NotMaster),
        }
    }

    /// Slave-side application of an incoming instance or delta packet,
    /// also recording the bytes in the instance cache keyed by version.
    pub fn apply_incoming(
        &self,
        id: ObjectId,
        version: Version,
        is_instance: bool,
        source: NodeId,
        bytes: &[u8],
    ) -> Result<bool, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.get_mut(&id).ok_or(ObjectStoreError::NotFound)?;
        match entry.cm {
            ChangeManager::Slave { .. } => {
                let object = &mut entry.object;
                let applied = entry.cm.apply(version, is_instance, || {
                    if is_instance {
                        object.apply_instance_data(bytes);
                    } else {
                        object.unpack(bytes);
                    }
                });
                drop(objects);
                if applied && is_instance {
                    self.cache.add(id, version, source, Box::from(bytes));
                }
                Ok(applied)
            }
            _ => Err(ObjectStoreError::NotSlave),
        }
    }

    pub fn slave_state(&self, id: ObjectId) -> Option<crate::change_manager::SlaveState> {
        self.objects.lock().unwrap().get(&id)?.cm.slave_state()
    }

    /// `removeNode`: for every locally attached object, drops `node` as a
    /// subscriber (master side) or marks the mapping stale (slave side,
    /// when `node` was that object's master). No network traffic, the
    /// node is already gone.
    pub fn remove_node(&self, node: NodeId) {
        let mut objects = self.objects.lock().unwrap();
        for entry in objects.values_mut() {
            match &mut entry.cm {
                ChangeManager::UnbufferedMaster { .. } | ChangeManager::BufferedMaster { .. } => {
                    entry.cm.remove_slave(node);
                }
                ChangeManager::Slave { master, .. } if *master == node => {
                    entry.cm.mark_stale();
                }
                _ => {}
            }
        }
        self.cache.erase(node);
    }

    /// Collects the set of object ids currently mastered by this node that
    /// have `node` among their subscribers (used to decide what a
    /// departing peer was watching before calling [`Self::remove_node`]).
    pub fn objects_watched_by(&self, node: NodeId) -> HashSet<ObjectId> {
        let objects = self.objects.lock().unwrap();
        objects
            .iter()
            .filter(|(_, e)| e.cm.subscriber_count(node) > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn enable_send_on_register(&self) {
        *self.send_on_register.lock().unwrap() += 1;
    }

    pub fn disable_send_on_register(&self) {
        let mut count = self.send_on_register.lock().unwrap();
        *count = count.saturating_sub(1);
    }

    /// `notifyCommandThreadIdle`: if send-on-register is active and the
    /// queue is non-empty, pops and returns one object id to broadcast;
    /// the caller re-invokes as long as this returns `Some`.
    pub fn notify_command_thread_idle(&self) -> Option<ObjectId> {
        if *self.send_on_register.lock().unwrap() == 0 {
            return None;
        }
        self.send_queue.lock().unwrap().pop_front()
    }

    pub fn store_instance_in_cache(&self, id: ObjectId, version: Version, source: NodeId, bytes: &[u8]) {
        self.cache.add(id, version, source, Box::from(bytes));
    }

    pub fn lookup_cache(&self, id: ObjectId, min: Version, max: Version) -> Option<Box<[u8]>> {
        self.cache.lookup(id, min, max)
    }

    /// Lowest/highest version of `id` currently held in the instance cache,
    /// for advertising on a re-subscribe request.
    pub fn cached_version_range(&self, id: ObjectId) -> Option<(Version, Version)> {
        self.cache.range(id)
    }

    pub fn expire_instance_data(&self, age: std::time::Duration) {
        self.cache.expire(age);
    }

    pub fn disable_instance_cache(&self) {
        self.cache.disable();
    }

    /// `Object::push`: appends a chunk of instance data to an
    /// application-defined group. A receiver finalizes the group with
    /// [`Self::take_push_group`] once it has observed every expected
    /// chunk (the chunk count/ordering contract is the caller's).
    pub fn push_chunk(&self, group_id: u128, mut bytes: Vec<u8>) {
        self.push_groups
            .lock()
            .unwrap()
            .entry(group_id)
            .or_default()
            .append(&mut bytes);
    }

    pub fn take_push_group(&self, group_id: u128) -> Option<Vec<u8>> {
        self.push_groups.lock().unwrap().remove(&group_id)
    }
}
