//! Wire-level types for the Matter (CHIP) message layer.
//!
//! This crate has no protocol logic: it only defines the identifiers and
//! header layouts that `matter-fabric` and `matter-exchange` build on, the
//! same way `proxmox-sdn-types` underpins the rest of that workspace.

pub mod ids;
pub mod noc;
pub mod packet_header;
pub mod payload_header;

pub use ids::{
    ExchangeId, FabricId, FabricIndex, FabricIndexError, GlobalFabricId, GroupId, MessageId,
    NodeId, ProtocolId, SessionId,
};
pub use noc::{FabricDescriptorStruct, NocStruct, WireError};
pub use packet_header::{Destination, PacketHeader, SessionType};
pub use payload_header::PayloadHeader;

/// Matter message header overhead: 26 bytes message header + 12 bytes payload
/// header + 16 bytes AEAD MIC (spec §4.4.7).
pub const MATTER_MESSAGE_OVERHEAD: usize = 26 + 12 + 16;
