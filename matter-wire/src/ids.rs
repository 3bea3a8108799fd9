use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fabric's index into the local fabric table.
///
/// Valid range is `1..=254`; `0` is reserved and `255` is forbidden (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct FabricIndex(u8);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricIndexError {
    #[error("fabric index {0} is reserved")]
    Reserved(u8),
}

impl FabricIndex {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 254;

    pub fn new(value: u8) -> Result<Self, FabricIndexError> {
        if value == 0 || value == 255 {
            return Err(FabricIndexError::Reserved(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Next index after `self`, wrapping `254 -> 1`. Does not consult the
    /// table for occupancy; callers loop this with `FabricManager`.
    pub fn wrapping_next(self) -> Self {
        if self.0 >= Self::MAX {
            Self(Self::MIN)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl TryFrom<u8> for FabricIndex {
    type Error = FabricIndexError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FabricIndex> for u8 {
    fn from(value: FabricIndex) -> Self {
        value.0
    }
}

impl fmt::Display for FabricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! u64_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }

            pub fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

u64_id!(NodeId, "A node's operational identifier on a fabric.");
u64_id!(FabricId, "A fabric's 64-bit operational identifier.");
u64_id!(
    GlobalFabricId,
    "`H(fabricId ‖ rootPublicKey)` — stable across local `FabricIndex` reassignment."
);

macro_rules! u16_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u16);

        impl $name {
            pub fn get(self) -> u16 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u16> for $name {
            fn from(value: u16) -> Self {
                Self(value)
            }
        }
    };
}

u16_id!(SessionId, "Local identifier of a secure or unsecured session.");
u16_id!(ExchangeId, "Identifier of a message exchange, scoped to a session.");
u16_id!(GroupId, "Multicast group identifier used as a group-session destination.");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolId(pub u32);

impl ProtocolId {
    /// Protocol ID of the Secure Channel protocol, which carries standalone acks.
    pub const SECURE_CHANNEL: ProtocolId = ProtocolId(0x0000);

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for ProtocolId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A message counter value, monotonically increasing per session (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u32);

impl MessageId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MessageId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
