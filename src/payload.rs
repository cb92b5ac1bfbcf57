//! Fixed-field binary encodings for the object command set (§6.2 of the
//! wire protocol this crate speaks). Each payload is a flat little-endian
//! layout written straight into a command buffer — no framing library, to
//! match the rest of this stack's raw-bytes `Packet` payload.

use collage_wire::{InstanceId, NodeId, ObjectId, Version};

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u128(buf: &mut Vec<u8>, v: u128) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(v as u8);
}
fn put_bytes(buf: &mut Vec<u8>, v: &[u8]) {
    put_u64(buf, v.len() as u64);
    buf.extend_from_slice(v);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }
    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }
    fn u128(&mut self) -> u128 {
        let v = u128::from_le_bytes(self.buf[self.pos..self.pos + 16].try_into().unwrap());
        self.pos += 16;
        v
    }
    fn bool(&mut self) -> bool {
        let v = self.buf[self.pos] != 0;
        self.pos += 1;
        v
    }
    fn bytes(&mut self) -> Vec<u8> {
        let len = self.u64() as usize;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        v
    }
}

pub struct FindMasterNodeId {
    pub id: ObjectId,
    pub request_id: u32,
}

impl FindMasterNodeId {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u128(&mut buf, self.id.as_u128());
        put_u32(&mut buf, self.request_id);
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            id: ObjectId::from_u128(r.u128()),
            request_id: r.u32(),
        }
    }
}

pub struct FindMasterNodeIdReply {
    pub request_id: u32,
    pub node_id: NodeId,
}

impl FindMasterNodeIdReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u32(&mut buf, self.request_id);
        put_u128(&mut buf, self.node_id.as_u128());
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            request_id: r.u32(),
            node_id: NodeId::from_u128(r.u128()),
        }
    }
}

pub struct SubscribeObject {
    pub id: ObjectId,
    pub request_id: u32,
    pub instance_id: InstanceId,
    pub master_instance_id: InstanceId,
    pub min_cached_version: Version,
    pub max_cached_version: Version,
    pub requested_version: Version,
}

impl SubscribeObject {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u128(&mut buf, self.id.as_u128());
        put_u32(&mut buf, self.request_id);
        put_u32(&mut buf, self.instance_id.as_u32());
        put_u32(&mut buf, self.master_instance_id.as_u32());
        put_u64(&mut buf, self.min_cached_version.as_u64());
        put_u64(&mut buf, self.max_cached_version.as_u64());
        put_u64(&mut buf, self.requested_version.as_u64());
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            id: ObjectId::from_u128(r.u128()),
            request_id: r.u32(),
            instance_id: InstanceId::new(r.u32()),
            master_instance_id: InstanceId::new(r.u32()),
            min_cached_version: Version::new(r.u64()),
            max_cached_version: Version::new(r.u64()),
            requested_version: Version::new(r.u64()),
        }
    }
}

/// Outcome tag carried by [`MapObjectReply`]: `Stream` means "wait for an
/// `OBJECT_INSTANCE`/`OBJECT_DELTA` at this version", `UseCache` means "you
/// already have this version cached, apply it locally", `Failed` means the
/// master rejected the subscribe outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapResult {
    Stream,
    UseCache,
    Failed,
}

impl MapResult {
    fn as_u8(self) -> u8 {
        match self {
            MapResult::Stream => 0,
            MapResult::UseCache => 1,
            MapResult::Failed => 2,
        }
    }
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => MapResult::UseCache,
            2 => MapResult::Failed,
            _ => MapResult::Stream,
        }
    }
}

pub struct MapObjectReply {
    pub request_id: u32,
    pub version: Version,
    pub result: MapResult,
    /// The master's own instance id for this object, so the slave can
    /// advertise it on a later re-subscribe and be considered for a
    /// cache hit instead of a fresh stream.
    pub master_instance_id: InstanceId,
}

impl MapObjectReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u32(&mut buf, self.request_id);
        put_u64(&mut buf, self.version.as_u64());
        buf.push(self.result.as_u8());
        put_u32(&mut buf, self.master_instance_id.as_u32());
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        let request_id = r.u32();
        let version = Version::new(r.u64());
        let result = MapResult::from_u8(r.buf[r.pos]);
        r.pos += 1;
        let master_instance_id = InstanceId::new(r.u32());
        Self {
            request_id,
            version,
            result,
            master_instance_id,
        }
    }
}

pub struct UnsubscribeObject {
    pub id: ObjectId,
    pub master_instance_id: InstanceId,
    pub slave_instance_id: InstanceId,
}

impl UnsubscribeObject {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u128(&mut buf, self.id.as_u128());
        put_u32(&mut buf, self.master_instance_id.as_u32());
        put_u32(&mut buf, self.slave_instance_id.as_u32());
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            id: ObjectId::from_u128(r.u128()),
            master_instance_id: InstanceId::new(r.u32()),
            slave_instance_id: InstanceId::new(r.u32()),
        }
    }
}

/// Carries both `OBJECT_INSTANCE` and `OBJECT_DELTA`: the two differ only
/// in whether the receiver calls `apply_instance_data` or `unpack`, which
/// the dispatcher already knows from the command id.
pub struct ObjectData {
    pub id: ObjectId,
    pub version: Version,
    pub last: bool,
    pub source: NodeId,
    pub instance_id: InstanceId,
    pub bytes: Vec<u8>,
}

impl ObjectData {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u128(&mut buf, self.id.as_u128());
        put_u64(&mut buf, self.version.as_u64());
        put_bool(&mut buf, self.last);
        put_u128(&mut buf, self.source.as_u128());
        put_u32(&mut buf, self.instance_id.as_u32());
        put_bytes(&mut buf, &self.bytes);
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            id: ObjectId::from_u128(r.u128()),
            version: Version::new(r.u64()),
            last: r.bool(),
            source: NodeId::from_u128(r.u128()),
            instance_id: InstanceId::new(r.u32()),
            bytes: r.bytes(),
        }
    }
}

pub struct ObjectCommit {
    pub instance_id: InstanceId,
    pub request_id: u32,
}

impl ObjectCommit {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u32(&mut buf, self.instance_id.as_u32());
        put_u32(&mut buf, self.request_id);
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            instance_id: InstanceId::new(r.u32()),
            request_id: r.u32(),
        }
    }
}

pub struct ObjectId32 {
    pub id: ObjectId,
}

impl ObjectId32 {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u128(&mut buf, self.id.as_u128());
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            id: ObjectId::from_u128(r.u128()),
        }
    }
}

pub struct RemoveNode {
    pub node_id: NodeId,
}

impl RemoveNode {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u128(&mut buf, self.node_id.as_u128());
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            node_id: NodeId::from_u128(r.u128()),
        }
    }
}

pub struct ObjectPush {
    pub group_id: u128,
    pub type_id: u32,
    pub bytes: Vec<u8>,
}

impl ObjectPush {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u128(&mut buf, self.group_id);
        put_u32(&mut buf, self.type_id);
        put_bytes(&mut buf, &self.bytes);
        buf
    }
    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = Reader::new(bytes);
        Self {
            group_id: r.u128(),
            type_id: r.u32(),
            bytes: r.bytes(),
        }
    }
}
