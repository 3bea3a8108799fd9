use crate::ids::{GroupId, MessageId, NodeId, SessionId};
use crate::noc::WireError;

/// `sessionType` discriminant of a [`PacketHeader`] (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionType {
    Unicast = 0,
    Group = 1,
}

impl SessionType {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Unicast),
            1 => Ok(Self::Group),
            other => Err(WireError::InvalidSessionType(other)),
        }
    }
}

/// Destination field of a [`PacketHeader`]: a unicast node or a multicast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Node(NodeId),
    Group(GroupId),
    None,
}

/// Matter message (packet) header (spec §6.1).
///
/// TLV/privacy-enhanced message extensions are out of scope (spec §1
/// Non-goals); this header only carries the fields the exchange/fabric layers
/// consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub session_id: SessionId,
    pub session_type: SessionType,
    pub message_id: MessageId,
    pub source_node_id: Option<NodeId>,
    pub destination: Destination,
    pub has_privacy_enhancements: bool,
    pub is_control_message: bool,
    pub has_message_extensions: bool,
}

const FLAG_HAS_SOURCE: u8 = 0b0000_0100;
const FLAG_DEST_NODE: u8 = 0b0000_0001;
const FLAG_DEST_GROUP: u8 = 0b0000_0010;
const FLAG_PRIVACY: u8 = 0b0001_0000;
const FLAG_CONTROL: u8 = 0b0010_0000;
const FLAG_MSG_EXT: u8 = 0b0100_0000;

impl PacketHeader {
    /// Encode into the wire byte layout: `flags(1) session_id(2) session_type(1)
    /// message_id(4) [source_node_id(8)] [dest(8|2)]`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.source_node_id.is_some() {
            flags |= FLAG_HAS_SOURCE;
        }
        match self.destination {
            Destination::Node(_) => flags |= FLAG_DEST_NODE,
            Destination::Group(_) => flags |= FLAG_DEST_GROUP,
            Destination::None => {}
        }
        if self.has_privacy_enhancements {
            flags |= FLAG_PRIVACY;
        }
        if self.is_control_message {
            flags |= FLAG_CONTROL;
        }
        if self.has_message_extensions {
            flags |= FLAG_MSG_EXT;
        }

        out.push(flags);
        out.extend_from_slice(&self.session_id.get().to_le_bytes());
        out.push(self.session_type as u8);
        out.extend_from_slice(&self.message_id.get().to_le_bytes());
        if let Some(source) = self.source_node_id {
            out.extend_from_slice(&source.get().to_le_bytes());
        }
        match self.destination {
            Destination::Node(node) => out.extend_from_slice(&node.get().to_le_bytes()),
            Destination::Group(group) => out.extend_from_slice(&group.get().to_le_bytes()),
            Destination::None => {}
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut pos = 0usize;
        let take = |buf: &[u8], pos: &mut usize, n: usize| -> Result<&[u8], WireError> {
            let end = *pos + n;
            let slice = buf.get(*pos..end).ok_or(WireError::Truncated)?;
            *pos = end;
            Ok(slice)
        };

        let flags = *take(buf, &mut pos, 1)?.first().unwrap();
        let session_id = SessionId(u16::from_le_bytes(
            take(buf, &mut pos, 2)?.try_into().unwrap(),
        ));
        let session_type = SessionType::from_u8(*take(buf, &mut pos, 1)?.first().unwrap())?;
        let message_id = MessageId(u32::from_le_bytes(
            take(buf, &mut pos, 4)?.try_into().unwrap(),
        ));

        let source_node_id = if flags & FLAG_HAS_SOURCE != 0 {
            Some(NodeId(u64::from_le_bytes(
                take(buf, &mut pos, 8)?.try_into().unwrap(),
            )))
        } else {
            None
        };

        let destination = if flags & FLAG_DEST_NODE != 0 {
            Destination::Node(NodeId(u64::from_le_bytes(
                take(buf, &mut pos, 8)?.try_into().unwrap(),
            )))
        } else if flags & FLAG_DEST_GROUP != 0 {
            Destination::Group(GroupId(u16::from_le_bytes(
                take(buf, &mut pos, 2)?.try_into().unwrap(),
            )))
        } else {
            Destination::None
        };

        Ok(Self {
            session_id,
            session_type,
            message_id,
            source_node_id,
            destination,
            has_privacy_enhancements: flags & FLAG_PRIVACY != 0,
            is_control_message: flags & FLAG_CONTROL != 0,
            has_message_extensions: flags & FLAG_MSG_EXT != 0,
        })
    }
}
