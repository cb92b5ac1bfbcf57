//! Owns this process's connections, dispatch table, and object store, and
//! turns the `ObjectStore`'s local decisions into wire traffic (and vice
//! versa). The networking/broadcast half of the protocol that
//! `collage-store` deliberately leaves out.

use crate::config::NodeConfig;
use crate::framing;
use crate::payload::{
    FindMasterNodeId, FindMasterNodeIdReply, MapObjectReply, MapResult, ObjectCommit, ObjectData,
    ObjectPush, RemoveNode, SubscribeObject, UnsubscribeObject,
};
use collage_net::{Connection, Dispatcher, PendingRequest, RequestRegistry};
use collage_store::{Object, ObjectStore, ObjectStoreError, SubscribeReply};
use collage_wire::{
    Command, CommandId, CommandQueue, DataType, InstanceId, NodeId, ObjectHeader, ObjectId, Packet,
    PacketHeader, QueueConfig, Version,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

/// Outcome of a slave's `mapObjectSync`: either the object is live at the
/// given version, or the subscribe failed (master unreachable, rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    Live(Version),
    Failed,
}

/// Correlates a subscribe reply that arrives as `OBJECT_INSTANCE`/
/// `OBJECT_DELTA` (rather than `MAP_OBJECT_REPLY`) back to the waiting
/// `mapObjectSync` caller.
struct PendingMap {
    request_id: u32,
}

struct Inner {
    node_id: NodeId,
    config: NodeConfig,
    store: ObjectStore,
    dispatcher: Arc<Dispatcher>,
    connections: Mutex<HashMap<NodeId, Arc<dyn Connection>>>,
    find_master: RequestRegistry<NodeId>,
    subscribe: RequestRegistry<MapOutcome>,
    commit: RequestRegistry<Version>,
    pending_map: Mutex<HashMap<ObjectId, PendingMap>>,
    pending_subscribes: Mutex<HashMap<u32, PendingRequest<MapOutcome>>>,
    pending_commits: Mutex<HashMap<u32, PendingRequest<Version>>>,
    /// Master instance ids this node has learned for objects it slaves,
    /// keyed by object id. Populated from `MAP_OBJECT_REPLY` and replayed
    /// on a later re-subscribe so the master can consider a cache hit.
    known_masters: Mutex<HashMap<ObjectId, InstanceId>>,
}

/// A node in the peer-to-peer object runtime. Cheap to clone (an `Arc`
/// bump); handlers registered on the dispatcher hold a weak reference back
/// to this so a node can be dropped while connections are still draining.
#[derive(Clone)]
pub struct LocalNode {
    inner: Arc<Inner>,
}

impl LocalNode {
    pub fn new(node_id: NodeId, config: NodeConfig) -> Self {
        let node = Self {
            inner: Arc::new(Inner {
                node_id,
                config,
                store: ObjectStore::new(node_id, config.instance_cache_budget),
                dispatcher: Arc::new(Dispatcher::new()),
                connections: Mutex::new(HashMap::new()),
                find_master: RequestRegistry::new(),
                subscribe: RequestRegistry::new(),
                commit: RequestRegistry::new(),
                pending_map: Mutex::new(HashMap::new()),
                pending_subscribes: Mutex::new(HashMap::new()),
                pending_commits: Mutex::new(HashMap::new()),
                known_masters: Mutex::new(HashMap::new()),
            }),
        };
        if config.send_on_register_default {
            node.inner.store.enable_send_on_register();
        }
        node.install_handlers();
        node
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn store(&self) -> &ObjectStore {
        &self.inner.store
    }

    /// Registers a connection to `peer` and spawns the task that decodes
    /// its frames into commands and dispatches them.
    pub fn connect(&self, peer: NodeId, conn: Arc<dyn Connection>) {
        self.inner
            .connections
            .lock()
            .unwrap()
            .insert(peer, Arc::clone(&conn));
        let node = self.clone();
        tokio::spawn(async move { node.receive_loop(peer, conn).await });
    }

    async fn receive_loop(&self, peer: NodeId, conn: Arc<dyn Connection>) {
        loop {
            match conn.read_sync().await {
                Ok(frame) => {
                    if let Some(cmd) = framing::decode(peer, self.inner.node_id, &frame) {
                        self.inner.dispatcher.dispatch(cmd);
                    } else {
                        eprintln!("collage: dropping unparseable frame from {peer}");
                    }
                }
                Err(err) if err.is_terminal() => {
                    self.handle_peer_loss(peer);
                    return;
                }
                Err(_) => continue,
            }
        }
    }

    fn handle_peer_loss(&self, peer: NodeId) {
        self.inner.connections.lock().unwrap().remove(&peer);
        self.inner.store.remove_node(peer);
    }

    fn send_to(&self, target: NodeId, frame: Vec<u8>) {
        self.send_to_shared(target, Arc::from(frame));
    }

    /// Shares one already-encoded frame across targets without re-copying
    /// its bytes: `Arc::clone` bumps a refcount, `broadcast` otherwise would
    /// clone the whole payload once per connected peer.
    fn send_to_shared(&self, target: NodeId, frame: Arc<[u8]>) {
        let connections = self.inner.connections.lock().unwrap();
        let Some(conn) = connections.get(&target).cloned() else {
            eprintln!("collage: no connection to {target}, dropping frame");
            return;
        };
        drop(connections);
        tokio::spawn(async move {
            if let Err(err) = conn.write(&frame).await {
                eprintln!("collage: send to {target} failed: {err}");
            }
        });
    }

    fn broadcast(&self, frame: Vec<u8>) {
        let frame: Arc<[u8]> = Arc::from(frame);
        let targets: Vec<NodeId> = self
            .inner
            .connections
            .lock()
            .unwrap()
            .keys()
            .copied()
            .collect();
        for target in targets {
            self.send_to_shared(target, frame.clone());
        }
    }

    // ---- registration -------------------------------------------------

    pub fn register_object(
        &self,
        id: ObjectId,
        object: Box<dyn Object>,
    ) -> Result<InstanceId, ObjectStoreError> {
        self.inner.store.register_object(id, object)
    }

    /// Deregisters a locally mastered object and notifies its current
    /// subscribers that the mapping is gone.
    pub fn deregister_object(&self, id: ObjectId) -> Result<(), ObjectStoreError> {
        let instance_id = self
            .inner
            .store
            .instance_id_of(id)
            .unwrap_or(InstanceId::INVALID);
        let subscribers = self.inner.store.deregister_object(id)?;
        for node in subscribers {
            let frame = framing::encode(
                DataType::Session,
                CommandId::UnsubscribeObject,
                Some(ObjectHeader {
                    object_id: id,
                    instance_id,
                }),
                &UnsubscribeObject {
                    id,
                    master_instance_id: instance_id,
                    slave_instance_id: InstanceId::INVALID,
                }
                .encode(),
            );
            self.send_to(node, frame);
        }
        Ok(())
    }

    // ---- master discovery -----------------------------------------------

    /// Resolves the master of `id`: checks the local table first, then
    /// broadcasts `FIND_MASTER_NODE_ID` and waits up to the configured
    /// timeout. Yields `NodeId::ZERO` on timeout, matching the source's
    /// "unknown master" sentinel.
    pub async fn find_master_node_id(&self, id: ObjectId) -> NodeId {
        if let Some(local) = self.inner.store.find_master_node_id(id) {
            return local;
        }
        let pending = self.inner.find_master.register();
        let request_id = pending.id();
        self.broadcast(framing::encode(
            DataType::Node,
            CommandId::FindMasterNodeId,
            None,
            &FindMasterNodeId { id, request_id }.encode(),
        ));
        self.inner
            .find_master
            .wait_timeout(pending, self.inner.config.discovery_timeout)
            .await
            .unwrap_or(NodeId::ZERO)
    }

    // ---- mapping (slave side) -------------------------------------------

    /// Attaches `object` as a slave mapping of `id` and sends the subscribe
    /// request to `master` (resolved via [`Self::find_master_node_id`] if
    /// `None`). Returns the request id to pass to
    /// [`Self::map_object_sync`].
    pub async fn map_object_nb(
        &self,
        id: ObjectId,
        object: Box<dyn Object>,
        requested_version: Version,
        master: Option<NodeId>,
    ) -> Result<u32, ObjectStoreError> {
        let master = match master {
            Some(m) => m,
            None => self.find_master_node_id(id).await,
        };
        let instance_id = self.inner.store.map_object(id, object, master)?;
        let master_instance_id = self
            .inner
            .known_masters
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or(InstanceId::INVALID);
        let (min_cached_version, max_cached_version) = self
            .inner
            .store
            .cached_version_range(id)
            .unwrap_or((Version::NONE, Version::NONE));

        let pending = self.inner.subscribe.register();
        let request_id = pending.id();
        self.inner
            .pending_map
            .lock()
            .unwrap()
            .insert(id, PendingMap { request_id });
        self.inner
            .pending_subscribes
            .lock()
            .unwrap()
            .insert(request_id, pending);

        let frame = framing::encode(
            DataType::Session,
            CommandId::SubscribeObject,
            Some(ObjectHeader {
                object_id: id,
                instance_id,
            }),
            &SubscribeObject {
                id,
                request_id,
                instance_id,
                master_instance_id,
                min_cached_version,
                max_cached_version,
                requested_version,
            }
            .encode(),
        );
        self.send_to(master, frame);
        Ok(request_id)
    }

    pub async fn map_object_sync(&self, request_id: u32) -> MapOutcome {
        let Some(pending) = self.inner.pending_subscribes.lock().unwrap().remove(&request_id)
        else {
            return MapOutcome::Failed;
        };
        self.inner
            .subscribe
            .wait_timeout(pending, self.inner.config.request_timeout)
            .await
            .unwrap_or(MapOutcome::Failed)
    }

    pub fn unmap_object(&self, id: ObjectId) -> Result<(), ObjectStoreError> {
        let master = self.inner.store.unmap_object(id)?;
        if let Some(master) = master {
            let frame = framing::encode(
                DataType::Session,
                CommandId::UnsubscribeObject,
                Some(ObjectHeader {
                    object_id: id,
                    instance_id: InstanceId::INVALID,
                }),
                &UnsubscribeObject {
                    id,
                    master_instance_id: InstanceId::INVALID,
                    slave_instance_id: InstanceId::INVALID,
                }
                .encode(),
            );
            self.send_to(master, frame);
        }
        Ok(())
    }

    // ---- commit (master side) -------------------------------------------

    /// Dispatches `OBJECT_COMMIT` to this node's own handler (run inline,
    /// as the dispatcher does for any handler route) and returns the
    /// request id to wait on.
    pub fn commit_nb(&self, id: ObjectId) -> Result<u32, ObjectStoreError> {
        let instance_id = self
            .inner
            .store
            .instance_id_of(id)
            .ok_or(ObjectStoreError::NotFound)?;
        let pending = self.inner.commit.register();
        let request_id = pending.id();
        self.inner
            .pending_commits
            .lock()
            .unwrap()
            .insert(request_id, pending);

        let payload = ObjectCommit {
            instance_id,
            request_id,
        }
        .encode()
        .into_boxed_slice();
        let header = PacketHeader {
            size: payload.len() as u64,
            datatype: DataType::Object,
            command: CommandId::ObjectCommit,
        };
        let cmd = Command::from_packet(
            self.inner.node_id,
            self.inner.node_id,
            Packet::new(
                header,
                Some(ObjectHeader {
                    object_id: id,
                    instance_id,
                }),
                payload,
            ),
        );
        self.inner.dispatcher.dispatch(cmd);
        Ok(request_id)
    }

    pub async fn commit_sync(&self, request_id: u32) -> Option<Version> {
        let pending = self.inner.pending_commits.lock().unwrap().remove(&request_id)?;
        self.inner
            .commit
            .wait_timeout(pending, self.inner.config.request_timeout)
            .await
            .ok()
    }

    // ---- idle broadcast --------------------------------------------------

    /// Drains one send-on-register entry, broadcasting its current state,
    /// as `notifyCommandThreadIdle` does when the command queue is empty.
    /// Returns `true` if there was work, so the caller should call again.
    pub fn notify_idle(&self) -> bool {
        let Some(id) = self.inner.store.notify_command_thread_idle() else {
            return false;
        };
        if let (Some(instance_id), Some((version, bytes))) = (
            self.inner.store.instance_id_of(id),
            self.inner.store.instance_snapshot(id),
        ) {
            let frame = framing::encode(
                DataType::Object,
                CommandId::ObjectInstance,
                Some(ObjectHeader {
                    object_id: id,
                    instance_id,
                }),
                &ObjectData {
                    id,
                    version,
                    last: true,
                    source: self.inner.node_id,
                    instance_id,
                    bytes,
                }
                .encode(),
            );
            self.broadcast(frame);
        }
        true
    }

    pub fn remove_node(&self, peer: NodeId) {
        self.handle_peer_loss(peer);
    }

    pub fn push_object(&self, group_id: u128, type_id: u32, bytes: Vec<u8>, targets: &[NodeId]) {
        let frame = framing::encode(
            DataType::Object,
            CommandId::ObjectPush,
            None,
            &ObjectPush {
                group_id,
                type_id,
                bytes,
            }
            .encode(),
        );
        for target in targets {
            self.send_to(*target, frame.clone());
        }
    }

    pub fn take_push_group(&self, group_id: u128) -> Option<Vec<u8>> {
        self.inner.store.take_push_group(group_id)
    }

    fn install_handlers(&self) {
        self.install_commit_queue();
        self.on(DataType::Session, CommandId::SubscribeObject, Self::handle_subscribe);
        self.on(DataType::Session, CommandId::MapObjectReply, Self::handle_map_reply);
        self.on(DataType::Session, CommandId::UnsubscribeObject, Self::handle_unsubscribe);
        self.on(DataType::Object, CommandId::ObjectInstance, Self::handle_instance_or_delta);
        self.on(DataType::Object, CommandId::ObjectDelta, Self::handle_instance_or_delta);
        self.on(DataType::Node, CommandId::FindMasterNodeId, Self::handle_find_master);
        self.on(
            DataType::Node,
            CommandId::FindMasterNodeIdReply,
            Self::handle_find_master_reply,
        );
        self.on(DataType::Node, CommandId::RemoveNode, Self::handle_remove_node);
        self.on(DataType::Object, CommandId::ObjectPush, Self::handle_push);
    }

    /// Routes `OBJECT_COMMIT` onto a dedicated command thread instead of
    /// running it inline on whatever thread calls `dispatch` — the "one
    /// command thread" model: a `commit_nb` caller hands its command off
    /// and waits on `commit_sync`, the command thread is the only one that
    /// ever touches the change manager for a commit.
    fn install_commit_queue(&self) {
        let queue = CommandQueue::new(QueueConfig::default());
        let producer = queue
            .register()
            .expect("a freshly created queue has room for its own producer");
        self.inner
            .dispatcher
            .register_queue(DataType::Object, CommandId::ObjectCommit, producer);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        thread::spawn(move || {
            while let Some(cmd) = queue.pop() {
                let Some(inner) = weak.upgrade() else { break };
                LocalNode { inner }.handle_commit(&cmd);
            }
        });
    }

    fn on(
        &self,
        datatype: DataType,
        id: CommandId,
        handler: impl Fn(&LocalNode, &Command) -> bool + Send + Sync + 'static,
    ) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.dispatcher.register_handler(
            datatype,
            id,
            Arc::new(move |cmd: &Command| {
                let Some(inner) = weak.upgrade() else { return false };
                handler(&LocalNode { inner }, cmd)
            }),
        );
    }

    fn handle_commit(&self, cmd: &Command) -> bool {
        let payload = ObjectCommit::decode(cmd.payload(DataType::Object));
        let Some(header) = cmd.object_header() else {
            return false;
        };
        let Ok((version, delta)) = self.inner.store.commit(header.object_id) else {
            return false;
        };
        if !delta.is_empty() {
            for slave in self.subscribers_of(header.object_id) {
                let frame = framing::encode(
                    DataType::Object,
                    CommandId::ObjectDelta,
                    Some(header),
                    &ObjectData {
                        id: header.object_id,
                        version,
                        last: true,
                        source: self.inner.node_id,
                        instance_id: payload.instance_id,
                        bytes: delta.clone(),
                    }
                    .encode(),
                );
                self.send_to(slave, frame);
            }
        }
        self.inner.commit.serve(payload.request_id, version)
    }

    /// Nodes this object's change manager currently counts as subscribers,
    /// intersected with nodes this node has a live connection to. There is
    /// no per-object subscriber listing on `ObjectStore` beyond per-node
    /// counts, so the connection table stands in for "which peers could
    /// this concern".
    fn subscribers_of(&self, id: ObjectId) -> Vec<NodeId> {
        self.inner
            .connections
            .lock()
            .unwrap()
            .keys()
            .copied()
            .filter(|node| self.inner.store.subscriber_count(id, *node) > 0)
            .collect()
    }

    fn handle_subscribe(&self, cmd: &Command) -> bool {
        let payload = SubscribeObject::decode(cmd.payload(DataType::Session));
        let node = cmd.source();
        let Some(current) = self.inner.store.version_of(payload.id) else {
            return false;
        };
        let cache_covers = self
            .inner
            .store
            .instance_id_matches(payload.id, payload.master_instance_id)
            && payload.min_cached_version <= current
            && payload.max_cached_version >= current;

        let Ok(reply) = self.inner.store.add_slave(
            payload.id,
            node,
            payload.requested_version,
            cache_covers,
            payload.min_cached_version,
        ) else {
            return false;
        };
        let master_instance_id = self
            .inner
            .store
            .instance_id_of(payload.id)
            .unwrap_or(InstanceId::INVALID);

        match reply {
            SubscribeReply::UseCache { use_version } => {
                let frame = framing::encode(
                    DataType::Session,
                    CommandId::MapObjectReply,
                    Some(ObjectHeader {
                        object_id: payload.id,
                        instance_id: payload.instance_id,
                    }),
                    &MapObjectReply {
                        request_id: payload.request_id,
                        version: use_version,
                        result: MapResult::UseCache,
                        master_instance_id,
                    }
                    .encode(),
                );
                self.send_to(node, frame);
            }
            SubscribeReply::Stream { version, bytes } => {
                let ack = framing::encode(
                    DataType::Session,
                    CommandId::MapObjectReply,
                    Some(ObjectHeader {
                        object_id: payload.id,
                        instance_id: payload.instance_id,
                    }),
                    &MapObjectReply {
                        request_id: payload.request_id,
                        version,
                        result: MapResult::Stream,
                        master_instance_id,
                    }
                    .encode(),
                );
                self.send_to(node, ack);
                let instance = framing::encode(
                    DataType::Object,
                    CommandId::ObjectInstance,
                    Some(ObjectHeader {
                        object_id: payload.id,
                        instance_id: payload.instance_id,
                    }),
                    &ObjectData {
                        id: payload.id,
                        version,
                        last: true,
                        source: self.inner.node_id,
                        instance_id: payload.instance_id,
                        bytes,
                    }
                    .encode(),
                );
                self.send_to(node, instance);
            }
        }
        true
    }

    fn handle_map_reply(&self, cmd: &Command) -> bool {
        let payload = MapObjectReply::decode(cmd.payload(DataType::Session));
        if payload.result != MapResult::Failed {
            if let Some(header) = cmd.object_header() {
                if payload.master_instance_id != InstanceId::INVALID {
                    self.inner
                        .known_masters
                        .lock()
                        .unwrap()
                        .insert(header.object_id, payload.master_instance_id);
                }
            }
        }
        match payload.result {
            MapResult::Failed => self.inner.subscribe.serve(payload.request_id, MapOutcome::Failed),
            MapResult::UseCache => {
                let Some(header) = cmd.object_header() else {
                    return false;
                };
                let cached = self
                    .inner
                    .store
                    .lookup_cache(header.object_id, payload.version, payload.version);
                if let Some(bytes) = cached {
                    let _ = self.inner.store.apply_incoming(
                        header.object_id,
                        payload.version,
                        true,
                        cmd.source(),
                        &bytes,
                    );
                }
                self.inner
                    .subscribe
                    .serve(payload.request_id, MapOutcome::Live(payload.version))
            }
            // Stream: the slave just waits for the forthcoming
            // OBJECT_INSTANCE/OBJECT_DELTA to serve the subscribe request.
            MapResult::Stream => true,
        }
    }

    fn handle_unsubscribe(&self, cmd: &Command) -> bool {
        let payload = UnsubscribeObject::decode(cmd.payload(DataType::Session));
        self.inner.store.remove_slave(payload.id, cmd.source()).is_ok()
    }

    fn handle_instance_or_delta(&self, cmd: &Command) -> bool {
        let header = cmd.header();
        let payload = ObjectData::decode(cmd.payload(DataType::Object));
        let is_instance = header.command == CommandId::ObjectInstance;
        let Ok(applied) = self.inner.store.apply_incoming(
            payload.id,
            payload.version,
            is_instance,
            cmd.source(),
            &payload.bytes,
        ) else {
            return false;
        };
        if applied {
            if let Some(PendingMap { request_id }) =
                self.inner.pending_map.lock().unwrap().remove(&payload.id)
            {
                self.inner
                    .subscribe
                    .serve(request_id, MapOutcome::Live(payload.version));
            }
        }
        applied
    }

    fn handle_find_master(&self, cmd: &Command) -> bool {
        let payload = FindMasterNodeId::decode(cmd.payload(DataType::Node));
        let reply_id = self
            .inner
            .store
            .find_master_node_id(payload.id)
            .unwrap_or(NodeId::ZERO);
        let frame = framing::encode(
            DataType::Node,
            CommandId::FindMasterNodeIdReply,
            None,
            &FindMasterNodeIdReply {
                request_id: payload.request_id,
                node_id: reply_id,
            }
            .encode(),
        );
        self.send_to(cmd.source(), frame);
        true
    }

    fn handle_find_master_reply(&self, cmd: &Command) -> bool {
        let payload = FindMasterNodeIdReply::decode(cmd.payload(DataType::Node));
        if payload.node_id.is_zero() {
            return false;
        }
        self.inner.find_master.serve(payload.request_id, payload.node_id)
    }

    fn handle_remove_node(&self, cmd: &Command) -> bool {
        let payload = RemoveNode::decode(cmd.payload(DataType::Node));
        self.inner.store.remove_node(payload.node_id);
        true
    }

    fn handle_push(&self, cmd: &Command) -> bool {
        let payload = ObjectPush::decode(cmd.payload(DataType::Object));
        self.inner.store.push_chunk(payload.group_id, payload.bytes);
        true
    }
}
