use crate::{CommandCache, DataType, NodeId, ObjectHeader, Packet, PacketHeader};
use std::sync::Arc;

/// A refcounted handle around a [`Packet`], carrying the node that sent it
/// and the node that received it.
///
/// `Command::alloc` takes a buffer from a [`CommandCache`]; the last clone
/// to drop returns it. Cloning is cheap (an `Arc` bump); the payload itself
/// is never copied.
#[derive(Clone)]
pub struct Command {
    inner: Arc<CommandInner>,
}

struct CommandInner {
    source: NodeId,
    local: NodeId,
    packet: Packet,
    cache: Option<Arc<CommandCache>>,
}

impl Command {
    /// Allocates a new command buffer of at least `size` bytes from `cache`,
    /// tagged with the given datatype/command id. Refcount starts at 1 (this
    /// handle is the only owner).
    pub fn alloc(
        cache: &Arc<CommandCache>,
        source: NodeId,
        local: NodeId,
        datatype: DataType,
        command: crate::CommandId,
        size: usize,
    ) -> Self {
        let payload = cache.alloc(size);
        let header = PacketHeader {
            size: payload.len() as u64,
            datatype,
            command,
        };
        let object_header = (datatype == DataType::Object).then_some(ObjectHeader {
            object_id: crate::ObjectId::NONE,
            instance_id: crate::InstanceId::INVALID,
        });

        Self {
            inner: Arc::new(CommandInner {
                source,
                local,
                packet: Packet::new(header, object_header, payload),
                cache: Some(Arc::clone(cache)),
            }),
        }
    }

    /// Wraps an already-built packet without cache-backed reuse (e.g. for
    /// tests, or packets assembled by a serializer that doesn't go through
    /// the pool). Dropping the last handle simply frees the payload.
    pub fn from_packet(source: NodeId, local: NodeId, packet: Packet) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                source,
                local,
                packet,
                cache: None,
            }),
        }
    }

    pub fn source(&self) -> NodeId {
        self.inner.source
    }

    pub fn local(&self) -> NodeId {
        self.inner.local
    }

    pub fn header(&self) -> PacketHeader {
        self.inner.packet.header
    }

    pub fn object_header(&self) -> Option<ObjectHeader> {
        self.inner.packet.object_header
    }

    /// Read-only view of the payload, asserting the stored datatype matches
    /// what the caller expects.
    ///
    /// # Panics
    ///
    /// A datatype mismatch is a programming error (the caller has the wrong
    /// idea about what packet it's holding), so this aborts rather than
    /// returning a `Result`.
    pub fn payload(&self, expected: DataType) -> &[u8] {
        debug_assert_eq!(
            self.inner.packet.header.datatype, expected,
            "typed command access with mismatched datatype"
        );
        &self.inner.packet.payload
    }

    /// Mutable payload access, available only while this is the sole handle
    /// (i.e. before any `clone()`). Returns `None` once shared.
    pub fn payload_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.inner).map(|inner| &mut *inner.packet.payload)
    }

    /// Current number of live handles sharing this command's buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Drop for CommandInner {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            let payload = std::mem::take(&mut self.packet.payload);
            cache.release(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandId;

    #[test]
    fn test_alloc_and_drop_returns_to_cache() {
        let cache = Arc::new(CommandCache::new());
        let cmd = Command::alloc(
            &cache,
            NodeId::generate(),
            NodeId::generate(),
            DataType::Object,
            CommandId::ObjectCommit,
            64,
        );
        assert_eq!(cmd.ref_count(), 1);
        drop(cmd);
        assert_eq!(cache.retained_count(), 1);
    }

    #[test]
    fn test_clone_shares_buffer_until_last_drop() {
        let cache = Arc::new(CommandCache::new());
        let cmd = Command::alloc(
            &cache,
            NodeId::ZERO,
            NodeId::ZERO,
            DataType::Node,
            CommandId::FindMasterNodeId,
            32,
        );
        let cmd2 = cmd.clone();
        assert_eq!(cmd.ref_count(), 2);

        drop(cmd);
        assert_eq!(cache.retained_count(), 0, "buffer still held by cmd2");

        drop(cmd2);
        assert_eq!(cache.retained_count(), 1);
    }

    #[test]
    fn test_payload_mut_only_while_unique() {
        let cache = Arc::new(CommandCache::new());
        let mut cmd = Command::alloc(
            &cache,
            NodeId::ZERO,
            NodeId::ZERO,
            DataType::Session,
            CommandId::SubscribeObject,
            16,
        );
        assert!(cmd.payload_mut().is_some());

        let _cmd2 = cmd.clone();
        assert!(cmd.payload_mut().is_none());
    }
}
