//! Drives pairs of [`LocalNode`]s over real [`PipeConnection`]s, exercising
//! the wire path the `collage-store`-level tests skip: framing, dispatch,
//! and the async `*_sync` request/reply round trip.

use async_trait::async_trait;
use collage::{ChangeType, CommandId, Connection, ConnectionError, LocalNode, NodeConfig, Object};
use collage_net::{ConnectionConfig, PipeConnection};
use collage_wire::{NodeId, ObjectId, Version};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone)]
struct Counter(u64);

impl Object for Counter {
    fn change_type(&self) -> ChangeType {
        ChangeType::UnbufferedDelta
    }
    fn get_instance_data(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
    fn apply_instance_data(&mut self, data: &[u8]) {
        self.0 = u64::from_le_bytes(data.try_into().unwrap());
    }
    fn pack(&mut self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
    fn unpack(&mut self, delta: &[u8]) {
        self.0 = u64::from_le_bytes(delta.try_into().unwrap());
    }
}

fn link(a: &LocalNode, b: &LocalNode) -> (Arc<PipeConnection>, Arc<PipeConnection>) {
    let (ca, cb) = PipeConnection::pair(ConnectionConfig::default().queue_depth);
    let ca = Arc::new(ca);
    let cb = Arc::new(cb);
    a.connect(b.node_id(), ca.clone());
    b.connect(a.node_id(), cb.clone());
    (ca, cb)
}

/// Wraps a connection and counts `OBJECT_INSTANCE` frames written through
/// it, so a test can assert a subscribe was served from cache rather than by
/// streaming a fresh payload.
struct CountingConnection {
    inner: Arc<PipeConnection>,
    instance_frames: AtomicUsize,
}

impl CountingConnection {
    fn new(inner: Arc<PipeConnection>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            instance_frames: AtomicUsize::new(0),
        })
    }

    fn instance_frames(&self) -> usize {
        self.instance_frames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for CountingConnection {
    async fn read_sync(&self) -> Result<Vec<u8>, ConnectionError> {
        self.inner.read_sync().await
    }

    fn try_read(&self) -> Result<Option<Vec<u8>>, ConnectionError> {
        self.inner.try_read()
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, ConnectionError> {
        if buf.len() >= 8 && u32::from_le_bytes(buf[4..8].try_into().unwrap()) == CommandId::ObjectInstance.as_u32() {
            self.instance_frames.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.write(buf).await
    }

    fn notifier(&self) -> Arc<Notify> {
        self.inner.notifier()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[tokio::test]
async fn two_node_commit_and_apply_over_the_wire() {
    let a = LocalNode::new(NodeId::generate(), NodeConfig::default());
    let b = LocalNode::new(NodeId::generate(), NodeConfig::default());
    link(&a, &b);

    let id = ObjectId::generate();
    a.register_object(id, Box::new(Counter(0))).unwrap();

    let request_id = b
        .map_object_nb(id, Box::new(Counter(0)), Version::HEAD, Some(a.node_id()))
        .await
        .unwrap();
    let outcome = b.map_object_sync(request_id).await;
    assert!(matches!(outcome, collage::MapOutcome::Live(_)));

    for _ in 0..3 {
        let request_id = a.commit_nb(id).unwrap();
        let version = a.commit_sync(request_id).await;
        assert!(version.is_some());
    }

    assert_eq!(a.store().version_of(id), Some(Version::new(4)));
}

#[tokio::test]
async fn subscribe_with_cache_hit_skips_stream() {
    let a = LocalNode::new(NodeId::generate(), NodeConfig::default());
    let b = LocalNode::new(NodeId::generate(), NodeConfig::default());

    let (pipe_a_to_b, pipe_b_to_a) = PipeConnection::pair(ConnectionConfig::default().queue_depth);
    let counting_a_to_b = CountingConnection::new(Arc::new(pipe_a_to_b));
    a.connect(b.node_id(), counting_a_to_b.clone());
    b.connect(a.node_id(), Arc::new(pipe_b_to_a));

    let id = ObjectId::generate();
    a.register_object(id, Box::new(Counter(0))).unwrap();
    let request_id = a.commit_nb(id).unwrap();
    a.commit_sync(request_id).await;

    // First subscribe: b knows nothing about a's object yet, so this must
    // stream a fresh instance payload.
    let request_id = b
        .map_object_nb(id, Box::new(Counter(0)), Version::FIRST, Some(a.node_id()))
        .await
        .unwrap();
    let outcome = b.map_object_sync(request_id).await;
    assert!(matches!(outcome, collage::MapOutcome::Live(_)));
    assert_eq!(counting_a_to_b.instance_frames(), 1);

    // b unmaps and resubscribes at the same version. It now has a's master
    // instance id and a matching cached range, so a must answer from cache
    // instead of streaming another OBJECT_INSTANCE frame.
    b.unmap_object(id).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let request_id = b
        .map_object_nb(id, Box::new(Counter(0)), Version::FIRST, Some(a.node_id()))
        .await
        .unwrap();
    let outcome = b.map_object_sync(request_id).await;
    assert_eq!(outcome, collage::MapOutcome::Live(Version::FIRST));
    assert_eq!(
        counting_a_to_b.instance_frames(),
        1,
        "resubscribe at an already-cached version must be served from cache, not streamed"
    );
}

#[tokio::test]
async fn master_discovery_across_three_nodes() {
    let a = LocalNode::new(NodeId::generate(), NodeConfig::default());
    let b = LocalNode::new(NodeId::generate(), NodeConfig::default());
    let c = LocalNode::new(NodeId::generate(), NodeConfig::default());
    link(&a, &b);
    link(&b, &c);
    link(&a, &c);

    let id = ObjectId::generate();
    a.register_object(id, Box::new(Counter(0))).unwrap();

    let found = b.find_master_node_id(id).await;
    assert_eq!(found, a.node_id());
}

#[tokio::test]
async fn master_discovery_returns_zero_when_the_master_is_unreachable() {
    let config = NodeConfig::new(
        1 << 20,
        false,
        Duration::from_millis(50),
        Duration::from_millis(200),
    );
    let b = LocalNode::new(NodeId::generate(), config);
    let c = LocalNode::new(NodeId::generate(), config);
    link(&b, &c);

    let found = b.find_master_node_id(ObjectId::generate()).await;
    assert!(found.is_zero());
}

#[tokio::test]
async fn unsubscribe_balance_across_two_mappings_from_the_same_node() {
    let a = LocalNode::new(NodeId::generate(), NodeConfig::default());
    let b = LocalNode::new(NodeId::generate(), NodeConfig::default());
    link(&a, &b);

    let id = ObjectId::generate();
    a.register_object(id, Box::new(Counter(0))).unwrap();

    let r1 = b
        .map_object_nb(id, Box::new(Counter(0)), Version::HEAD, Some(a.node_id()))
        .await
        .unwrap();
    b.map_object_sync(r1).await;
    assert_eq!(a.store().subscriber_count(id, b.node_id()), 1);

    b.unmap_object(id).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(a.store().subscriber_count(id, b.node_id()), 0);
}

#[tokio::test]
async fn peer_loss_is_observed_as_remove_node() {
    let a = LocalNode::new(NodeId::generate(), NodeConfig::default());
    let b = LocalNode::new(NodeId::generate(), NodeConfig::default());
    let (conn_a_to_b, _conn_b_to_a) = link(&a, &b);

    let id = ObjectId::generate();
    a.register_object(id, Box::new(Counter(0))).unwrap();
    let request_id = b
        .map_object_nb(id, Box::new(Counter(0)), Version::HEAD, Some(a.node_id()))
        .await
        .unwrap();
    b.map_object_sync(request_id).await;
    assert_eq!(a.store().subscriber_count(id, b.node_id()), 1);

    // A crashes: its outbound half to B goes silent, which B's receive loop
    // observes as a terminal read error on the next poll.
    conn_a_to_b.close();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        b.store().slave_state(id),
        Some(collage_store::SlaveState::Stale)
    );
}
