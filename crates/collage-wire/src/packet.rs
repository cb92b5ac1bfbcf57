use crate::{InstanceId, ObjectId};

/// Which subsystem a packet's `command` id is scoped to. Used together with
/// `CommandId` to form the dispatch key `(datatype, commandID)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    /// Node-to-node control traffic (master discovery, node removal).
    Node = 0,
    /// Session-level traffic (subscribe/unsubscribe).
    Session = 1,
    /// Object-level traffic (commit, instance/delta streaming, push).
    Object = 2,
}

/// Recognized command ids, see the wire protocol's object command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandId {
    FindMasterNodeId = 0,
    FindMasterNodeIdReply = 1,
    AttachObject = 2,
    DetachObject = 3,
    SubscribeObject = 4,
    MapObjectReply = 5,
    UnsubscribeObject = 6,
    ObjectInstance = 7,
    ObjectDelta = 8,
    ObjectCommit = 9,
    RegisterObject = 10,
    DeregisterObject = 11,
    DisableSendOnRegister = 12,
    RemoveNode = 13,
    ObjectPush = 14,
}

impl DataType {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Recovers a `DataType` from its wire value, for decoding frames that
    /// arrived as raw bytes.
    pub fn try_from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Node),
            1 => Some(Self::Session),
            2 => Some(Self::Object),
            _ => None,
        }
    }
}

impl CommandId {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Recovers a `CommandId` from its wire value, for decoding frames that
    /// arrived as raw bytes.
    pub fn try_from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::FindMasterNodeId),
            1 => Some(Self::FindMasterNodeIdReply),
            2 => Some(Self::AttachObject),
            3 => Some(Self::DetachObject),
            4 => Some(Self::SubscribeObject),
            5 => Some(Self::MapObjectReply),
            6 => Some(Self::UnsubscribeObject),
            7 => Some(Self::ObjectInstance),
            8 => Some(Self::ObjectDelta),
            9 => Some(Self::ObjectCommit),
            10 => Some(Self::RegisterObject),
            11 => Some(Self::DeregisterObject),
            12 => Some(Self::DisableSendOnRegister),
            13 => Some(Self::RemoveNode),
            14 => Some(Self::ObjectPush),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_round_trips_through_wire_value() {
        for id in [
            CommandId::FindMasterNodeId,
            CommandId::ObjectCommit,
            CommandId::ObjectPush,
        ] {
            assert_eq!(CommandId::try_from_u32(id.as_u32()), Some(id));
        }
        assert_eq!(CommandId::try_from_u32(999), None);
    }
}

/// Fixed header every packet begins with: `{size, datatype, commandID}`.
/// `DataType::Object` packets carry a trailing `{objectID, instanceID}`
/// header before the payload proper.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub size: u64,
    pub datatype: DataType,
    pub command: CommandId,
}

/// Trailing header present on every `DataType::Object` packet.
#[derive(Debug, Clone, Copy)]
pub struct ObjectHeader {
    pub object_id: ObjectId,
    pub instance_id: InstanceId,
}

/// A variable-length message: the fixed header plus an opaque payload.
///
/// Payloads are bags of bytes at this layer. Typed views are obtained
/// through [`crate::Command::payload_as`] / `payload_as_mut`, which assert
/// the stored `datatype`/`command` match what the caller expects — a
/// mismatch is a programming error, not a recoverable one (see the error
/// handling design: typed-access mismatch aborts rather than returning
/// `Result`).
pub struct Packet {
    pub header: PacketHeader,
    pub object_header: Option<ObjectHeader>,
    pub payload: Box<[u8]>,
}

impl Packet {
    pub fn new(header: PacketHeader, object_header: Option<ObjectHeader>, payload: Box<[u8]>) -> Self {
        Self {
            header,
            object_header,
            payload,
        }
    }
}
