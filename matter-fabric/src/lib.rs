pub mod acl;
pub mod crypto;
pub mod error;
pub mod fabric;
pub mod failsafe;
pub mod group;
pub mod manager;
pub mod opcreds;
pub mod storage;

pub use acl::{AclEntry, AclSink, AclStore, AclTarget, AuthMode, Privilege};
pub use crypto::{CertificateCodec, CertificateError, Crypto, CryptoError, Sha256Crypto};
pub use error::{FabricError, ManagerError};
pub use fabric::{Fabric, FabricBuilder};
pub use failsafe::FailSafeContext;
pub use group::{GroupKeyManager, GroupKeySet};
pub use manager::{FabricEvent, FabricManager};
pub use opcreds::{
    AddNocRequest, CsrResponse, NocResponse, NocStatusCode, OpCredsError,
    OperationalCredentialsStateMachine, SignVidVerificationResponse, UpdateNocRequest,
};
pub use storage::{MemoryStorage, Storage};
