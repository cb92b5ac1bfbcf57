//! Drives two `ObjectStore`s (a master and a slave) through register,
//! subscribe and commit/apply by hand, simulating the wire transfer a real
//! connection would perform.

use collage_store::{ChangeType, Object, ObjectStore};
use collage_wire::{NodeId, ObjectId, Version};

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

#[test]
fn test_two_node_commit_and_apply() {
    let master_node = NodeId::generate();
    let slave_node = NodeId::generate();
    let master = ObjectStore::new(master_node, 4096);
    let slave = ObjectStore::new(slave_node, 4096);

    let id = ObjectId::generate();
    master.register_object(id, Box::new(Counter(0))).unwrap();
    slave
        .map_object(id, Box::new(Counter(0)), master_node)
        .unwrap();

    let reply = master
        .add_slave(id, slave_node, Version::NONE, false, Version::NONE)
        .unwrap();
    let (version, bytes) = match reply {
        collage_store::SubscribeReply::Stream { version, bytes } => (version, bytes),
        other => panic!("expected a stream reply, got {other:?}"),
    };
    assert_eq!(version, Version::FIRST);
    let applied = slave
        .apply_incoming(id, version, true, master_node, &bytes)
        .unwrap();
    assert!(applied);

    let (committed, delta) = master.commit(id).unwrap();
    assert_eq!(committed, Version::new(2));
    let applied = slave
        .apply_incoming(id, committed, false, master_node, &delta)
        .unwrap();
    assert!(applied);
}

#[test]
fn test_subscribe_with_cache_hit_skips_stream() {
    let master_node = NodeId::generate();
    let master = ObjectStore::new(master_node, 4096);
    let id = ObjectId::generate();
    master.register_object(id, Box::new(Counter(0))).unwrap();
    master.commit(id).unwrap();

    let slave_node = NodeId::generate();
    let reply = master
        .add_slave(id, slave_node, Version::FIRST, true, Version::NONE)
        .unwrap();
    assert_eq!(
        reply,
        collage_store::SubscribeReply::UseCache {
            use_version: Version::FIRST
        }
    );
}

#[test]
fn test_subscribe_oldest_with_cache_hit_returns_min_cached_version() {
    let master_node = NodeId::generate();
    let master = ObjectStore::new(master_node, 4096);
    let id = ObjectId::generate();
    master.register_object(id, Box::new(Counter(0))).unwrap();
    master.commit(id).unwrap();

    let slave_node = NodeId::generate();
    let reply = master
        .add_slave(id, slave_node, Version::OLDEST, true, Version::new(1))
        .unwrap();
    assert_eq!(
        reply,
        collage_store::SubscribeReply::UseCache {
            use_version: Version::new(1)
        }
    );
}

#[test]
fn test_master_discovery_is_local_table_only() {
    let node = NodeId::generate();
    let store = ObjectStore::new(node, 4096);
    let id = ObjectId::generate();

    assert_eq!(store.find_master_node_id(id), None);
    store.register_object(id, Box::new(Counter(0))).unwrap();
    assert_eq!(store.find_master_node_id(id), Some(node));
}

#[test]
fn test_unsubscribe_balance_across_two_mappings() {
    let master_node = NodeId::generate();
    let master = ObjectStore::new(master_node, 4096);
    let id = ObjectId::generate();
    master.register_object(id, Box::new(Counter(0))).unwrap();

    let slave_node = NodeId::generate();
    master.add_slave(id, slave_node, Version::NONE, false, Version::NONE).unwrap();
    master.add_slave(id, slave_node, Version::NONE, false, Version::NONE).unwrap();
    assert_eq!(master.subscriber_count(id, slave_node), 2);

    master.remove_slave(id, slave_node).unwrap();
    assert_eq!(master.subscriber_count(id, slave_node), 1);
    master.remove_slave(id, slave_node).unwrap();
    assert_eq!(master.subscriber_count(id, slave_node), 0);
}

#[test]
fn test_peer_loss_moves_slave_mapping_to_stale_and_clears_master_subscriber() {
    let master_node = NodeId::generate();
    let slave_node = NodeId::generate();
    let master = ObjectStore::new(master_node, 4096);
    let slave = ObjectStore::new(slave_node, 4096);

    let id = ObjectId::generate();
    master.register_object(id, Box::new(Counter(0))).unwrap();
    master.add_slave(id, slave_node, Version::NONE, false, Version::NONE).unwrap();
    slave
        .map_object(id, Box::new(Counter(0)), master_node)
        .unwrap();

    master.remove_node(slave_node);
    assert_eq!(master.subscriber_count(id, slave_node), 0);

    slave.remove_node(master_node);
    assert_eq!(
        slave.slave_state(id),
        Some(collage_store::SlaveState::Stale)
    );
}

#[test]
fn test_buffered_master_replays_backlog_for_oldest_subscriber() {
    let master_node = NodeId::generate();
    let master = ObjectStore::new(master_node, 4096);
    let id = ObjectId::generate();

    struct BufferedCounter(u64);
    impl Object for BufferedCounter {
        fn change_type(&self) -> ChangeType {
            ChangeType::BufferedDelta
        }
        fn get_instance_data(&self) -> Vec<u8> {
            self.0.to_le_bytes().to_vec()
        }
        fn apply_instance_data(&mut self, data: &[u8]) {
            self.0 = u64::from_le_bytes(data.try_into().unwrap());
        }
        fn pack(&mut self) -> Vec<u8> {
            self.0 += 1;
            self.0.to_le_bytes().to_vec()
        }
        fn unpack(&mut self, delta: &[u8]) {
            self.0 = u64::from_le_bytes(delta.try_into().unwrap());
        }
    }

    master.register_object(id, Box::new(BufferedCounter(0))).unwrap();
    let early_slave = NodeId::generate();
    master.add_slave(id, early_slave, Version::NONE, false, Version::NONE).unwrap();
    master.commit(id).unwrap();
    master.commit(id).unwrap();

    let late_slave = NodeId::generate();
    let reply = master
        .add_slave(id, late_slave, Version::OLDEST, false, Version::NONE)
        .unwrap();
    assert_eq!(
        reply,
        collage_store::SubscribeReply::Stream {
            version: Version::new(2),
            bytes: 1u64.to_le_bytes().to_vec()
        }
    );
}
