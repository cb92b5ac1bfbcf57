//! Turns a [`Command`] into a single length-implicit frame suitable for
//! [`collage_net::Connection::write`], and back. `PipeConnection` preserves
//! message boundaries (it is backed by an `mpsc` channel of `Vec<u8>`), so
//! no outer length prefix is needed — one `write` is one frame.

use collage_wire::{Command, CommandId, DataType, InstanceId, NodeId, ObjectHeader, ObjectId, Packet, PacketHeader};

pub fn encode(
    datatype: DataType,
    command: CommandId,
    object_header: Option<ObjectHeader>,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + 20 + payload.len());
    buf.extend_from_slice(&datatype.as_u32().to_le_bytes());
    buf.extend_from_slice(&command.as_u32().to_le_bytes());
    match object_header {
        Some(h) => {
            buf.push(1);
            buf.extend_from_slice(&h.object_id.as_u128().to_le_bytes());
            buf.extend_from_slice(&h.instance_id.as_u32().to_le_bytes());
        }
        None => buf.push(0),
    }
    buf.extend_from_slice(payload);
    buf
}

/// Decodes a frame into a [`Command`] attributed to `source`, addressed to
/// `local`. Returns `None` for a frame with an unrecognized datatype or
/// command id — a protocol violation the caller should log and drop.
pub fn decode(source: NodeId, local: NodeId, frame: &[u8]) -> Option<Command> {
    if frame.len() < 9 {
        return None;
    }
    let datatype = DataType::try_from_u32(u32::from_le_bytes(frame[0..4].try_into().unwrap()))?;
    let command = CommandId::try_from_u32(u32::from_le_bytes(frame[4..8].try_into().unwrap()))?;
    let has_header = frame[8] != 0;
    let mut pos = 9;
    let object_header = if has_header {
        if frame.len() < pos + 20 {
            return None;
        }
        let object_id = ObjectId::from_u128(u128::from_le_bytes(frame[pos..pos + 16].try_into().unwrap()));
        pos += 16;
        let instance_id = InstanceId::new(u32::from_le_bytes(frame[pos..pos + 4].try_into().unwrap()));
        pos += 4;
        Some(ObjectHeader { object_id, instance_id })
    } else {
        None
    };
    let payload = frame[pos..].to_vec().into_boxed_slice();
    let header = PacketHeader {
        size: payload.len() as u64,
        datatype,
        command,
    };
    Some(Command::from_packet(source, local, Packet::new(header, object_header, payload)))
}
