//! The `Channel` and `Session` collaborators (spec §1, §3, §6) — both
//! black-boxed per the parent spec ("the UDP/TCP transports (`Channel`)"
//! and "`Session`... opaque to this spec except for the properties" listed
//! in §3). Only the properties and operations the exchange layer actually
//! touches are named here.

use std::time::Duration;

use thiserror::Error;

use matter_wire::{FabricIndex, GroupId, MessageId, NodeId, PacketHeader, PayloadHeader, SessionId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("session underlying this channel has closed")]
    SessionClosed,
    #[error("peer node id resolves to no group (destination was zero)")]
    NoGroupForDestination,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Session-establishment parameters that feed MRP timing (spec §3:
/// "`parameters` (SII/SAI/SAT)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParameters {
    /// Session Idle Interval: expected responsiveness while the peer is idle.
    pub session_idle_interval: Duration,
    /// Session Active Interval: expected responsiveness while the peer is active.
    pub session_active_interval: Duration,
    /// Session Active Threshold: how long a session is considered active
    /// after its last message.
    pub session_active_threshold: Duration,
}

/// Discriminant of the transport session backing an exchange (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Unicast,
    Group,
}

/// A transport session, opaque except for the properties named in spec §3.
pub trait Session: Send + Sync {
    fn id(&self) -> SessionId;
    fn peer_session_id(&self) -> SessionId;
    fn node_id(&self) -> Option<NodeId>;
    fn peer_node_id(&self) -> Option<NodeId>;
    fn uses_mrp(&self) -> bool;
    fn is_secure(&self) -> bool;
    fn kind(&self) -> SessionKind;
    fn parameters(&self) -> SessionParameters;
    /// The local fabric index this session is scoped to, once established
    /// (component 3: "fabric-scoped session/exchange dispatch").
    fn accessing_fabric_index(&self) -> Option<FabricIndex>;

    /// Allocates the next message ID from this session's monotonically
    /// increasing counter (spec §5: "`MessageId`s on the same session are
    /// strictly increasing").
    fn next_message_id(&self) -> MessageId;

    /// Marks the session as recently active, whether peer- or locally-
    /// initiated (spec §4.4.1 rule 3).
    fn mark_activity(&self);

    /// True once a message with this ID has already been observed on this
    /// session (spec §4.4.1's `duplicate` parameter is resolved here).
    fn is_duplicate(&self, message_id: MessageId) -> bool;

    /// Resolves the destination group for a group session send. Only called
    /// when `kind() == SessionKind::Group`.
    fn group_id_for(&self, peer_node_id: NodeId) -> Result<GroupId, ChannelError>;
}

/// The underlying transport (spec §1: "the UDP/TCP transports (`Channel`)").
pub trait Channel: Send + Sync {
    /// `channel.maxPayloadSize` (spec §4.4.7).
    fn max_payload_size(&self) -> usize;

    /// Exponential MRP back-off for the given (zero-based) retransmission
    /// attempt (spec §4.4.3).
    fn mrp_resubmission_backoff(&self, retransmission_count: u8) -> Duration;

    /// Sends one already-encoded message. Implementations encode
    /// `packet_header`/`payload_header`/`payload` and hand them to the
    /// transport.
    fn send(
        &self,
        packet_header: &PacketHeader,
        payload_header: &PayloadHeader,
        payload: &[u8],
    ) -> Result<(), ChannelError>;
}
