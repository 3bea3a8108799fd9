use thiserror::Error;

use matter_wire::FabricIndex;

/// Errors raised while constructing or mutating a single [`crate::fabric::Fabric`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("label is {0} bytes, outside the 1..=32 range")]
    InvalidLabelLength(usize),
    #[error("VID verification statement is {0} bytes, must be 0 or 85")]
    InvalidVidVerificationStatementLength(usize),
    #[error("intermediate CA certificate and VVSC are mutually exclusive")]
    IcacAndVvscBothPresent,
    #[error("VendorID {given} does not match the fabric's root vendor ID {expected}")]
    VendorIdMismatch { given: u16, expected: u16 },
    #[error("operational certificate public key does not match the fabric keypair")]
    PublicKeyMismatch,
    #[error("a required field was not set before building the fabric")]
    IncompleteBuilder(&'static str),
    #[error("certificate chain did not validate: {0}")]
    CertificateError(String),
}

/// Errors raised by [`crate::manager::FabricManager`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("fabric index {0} is already present in the table")]
    Conflict(FabricIndex),
    #[error("no fabric found for the given lookup key")]
    NotFound,
    #[error("fabric table is full (254 entries in use)")]
    TableFull,
    #[error(transparent)]
    Fabric(#[from] FabricError),
}
