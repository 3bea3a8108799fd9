use crate::ids::{ExchangeId, MessageId, ProtocolId};
use crate::noc::WireError;

/// Matter payload header (spec §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub exchange_id: ExchangeId,
    pub protocol_id: ProtocolId,
    pub message_type: u8,
    pub is_initiator_message: bool,
    pub requires_ack: bool,
    pub has_secured_extension: bool,
    pub acked_message_id: Option<MessageId>,
}

const FLAG_INITIATOR: u8 = 0b0000_0001;
const FLAG_REQUIRES_ACK: u8 = 0b0000_0010;
const FLAG_SECURED_EXT: u8 = 0b0000_0100;
const FLAG_ACK_PRESENT: u8 = 0b0000_1000;

impl PayloadHeader {
    /// Encode into `flags(1) exchange_id(2) protocol_id(4) message_type(1)
    /// [acked_message_id(4)]`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.is_initiator_message {
            flags |= FLAG_INITIATOR;
        }
        if self.requires_ack {
            flags |= FLAG_REQUIRES_ACK;
        }
        if self.has_secured_extension {
            flags |= FLAG_SECURED_EXT;
        }
        if self.acked_message_id.is_some() {
            flags |= FLAG_ACK_PRESENT;
        }

        out.push(flags);
        out.extend_from_slice(&self.exchange_id.get().to_le_bytes());
        out.extend_from_slice(&self.protocol_id.get().to_le_bytes());
        out.push(self.message_type);
        if let Some(acked) = self.acked_message_id {
            out.extend_from_slice(&acked.get().to_le_bytes());
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
        let exchange_id = ExchangeId(u16::from_le_bytes(
            take(buf, &mut pos, 2)?.try_into().unwrap(),
        ));
        let protocol_id = ProtocolId(u32::from_le_bytes(
            take(buf, &mut pos, 4)?.try_into().unwrap(),
        ));
        let message_type = *take(buf, &mut pos, 1)?.first().unwrap();

        let acked_message_id = if flags & FLAG_ACK_PRESENT != 0 {
            Some(MessageId(u32::from_le_bytes(
                take(buf, &mut pos, 4)?.try_into().unwrap(),
            )))
        } else {
            None
        };

        Ok(Self {
            exchange_id,
            protocol_id,
            message_type,
            is_initiator_message: flags & FLAG_INITIATOR != 0,
            requires_ack: flags & FLAG_REQUIRES_ACK != 0,
            has_secured_extension: flags & FLAG_SECURED_EXT != 0,
            acked_message_id,
        })
    }
}
