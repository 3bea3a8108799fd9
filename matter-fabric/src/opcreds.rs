//! The Operational Credentials state machine (spec §4.3, §6.4).
//!
//! Sequences `AddTrustedRootCertificate`, `CSRRequest`, `AddNOC`/`UpdateNOC`,
//! `UpdateFabricLabel`, `RemoveFabric`, `SetVIDVerificationStatement` and
//! `SignVIDVerificationRequest` against a single [`FabricManager`], gated by
//! a [`FailSafeContext`]. All window-scoped bookkeeping (which root was
//! added, which CSR is pending, whether a NOC commit already happened) is
//! kept here rather than inside the fail-safe context, which per spec §9 is
//! an external collaborator exposing only `{ isArmed, fabricIndex, mark }`.

use std::sync::Arc;

use thiserror::Error;

use matter_wire::{FabricId, FabricIndex, NodeId};

use crate::acl::AclSink;
use crate::crypto::{CertificateCodec, Crypto};
use crate::error::ManagerError;
use crate::fabric::FabricBuilder;
use crate::failsafe::FailSafeContext;
use crate::group::GroupKeyManager;
use crate::manager::FabricManager;

const OPERATIONAL_NODE_ID_MIN: u64 = 0x0000_0000_0000_0001;
const OPERATIONAL_NODE_ID_MAX: u64 = 0xFFFF_FFEF_FFFF_FFFF;
const CASE_AUTHENTICATED_TAG_MIN: u64 = 0xFFFF_FFFD_0000_0000;
const CASE_AUTHENTICATED_TAG_MAX: u64 = 0xFFFF_FFFD_FFFF_FFFF;

fn is_valid_case_admin_subject(subject: u64) -> bool {
    (OPERATIONAL_NODE_ID_MIN..=OPERATIONAL_NODE_ID_MAX).contains(&subject)
        || (CASE_AUTHENTICATED_TAG_MIN..=CASE_AUTHENTICATED_TAG_MAX).contains(&subject)
}

fn is_reserved_vendor_id(vendor_id: u16) -> bool {
    vendor_id == 0x0000 || vendor_id == 0xFFFF
}

/// Interaction-layer errors (spec §7): these abort the command entirely,
/// as opposed to the credential-specific failures reported inside a
/// [`NocResponse`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpCredsError {
    #[error("fail-safe context is not armed")]
    FailsafeRequired,
    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),
    #[error("constraint error: {0}")]
    ConstraintError(String),
    #[error("failure: {0}")]
    Failure(String),
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NocStatusCode {
    Ok,
    InvalidPublicKey,
    InvalidNodeOpId,
    InvalidNoc,
    MissingCsr,
    TableFull,
    InvalidAdminSubject,
    FabricConflict,
    LabelConflict,
    InvalidFabricIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NocResponse {
    pub status_code: NocStatusCode,
    pub fabric_index: Option<FabricIndex>,
    pub debug_text: Option<String>,
}

impl NocResponse {
    fn ok(fabric_index: FabricIndex) -> Self {
        Self {
            status_code: NocStatusCode::Ok,
            fabric_index: Some(fabric_index),
            debug_text: None,
        }
    }

    fn status(status_code: NocStatusCode) -> Self {
        Self {
            status_code,
            fabric_index: None,
            debug_text: None,
        }
    }
}

/// Tags the pending CSR's purpose (spec §9: "a two-variant enum on the
/// pending-CSR state ... not a boolean, to make illegal transitions
/// representable only by construction").
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingCsr {
    None,
    ForAdd { public_key: Vec<u8>, private_key: Vec<u8> },
    ForUpdate { public_key: Vec<u8>, private_key: Vec<u8> },
}

#[derive(Debug, Clone, Default)]
struct WindowState {
    root_cert_added: Option<Vec<u8>>,
    csr: PendingCsrState,
    committed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PendingCsrState(Option<PendingCsrInner>);

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingCsrInner {
    ForAdd { public_key: Vec<u8>, private_key: Vec<u8> },
    ForUpdate { public_key: Vec<u8>, private_key: Vec<u8> },
}

impl From<PendingCsr> for PendingCsrState {
    fn from(csr: PendingCsr) -> Self {
        match csr {
            PendingCsr::None => PendingCsrState(None),
            PendingCsr::ForAdd { public_key, private_key } => {
                PendingCsrState(Some(PendingCsrInner::ForAdd { public_key, private_key }))
            }
            PendingCsr::ForUpdate { public_key, private_key } => {
                PendingCsrState(Some(PendingCsrInner::ForUpdate { public_key, private_key }))
            }
        }
    }
}

pub struct CsrResponse {
    pub public_key: Vec<u8>,
    pub csr_nonce: [u8; 32],
}

pub struct AddNocRequest {
    pub noc: Vec<u8>,
    pub icac: Option<Vec<u8>>,
    pub ipk: [u8; 16],
    pub case_admin_subject: u64,
    pub admin_vendor_id: u16,
    pub accessing_session_is_pase: bool,
}

pub struct UpdateNocRequest {
    pub noc: Vec<u8>,
    pub icac: Option<Vec<u8>>,
    pub accessing_fabric_index: FabricIndex,
}

pub struct SignVidVerificationResponse {
    pub fabric_index: FabricIndex,
    pub signature: Vec<u8>,
}

/// Owns one fail-safe window's worth of Operational Credentials state.
/// Callers construct one per fail-safe arm and discard it on commit/expiry,
/// or call [`Self::reset`] to reuse the instance.
pub struct OperationalCredentialsStateMachine {
    window: WindowState,
}

impl OperationalCredentialsStateMachine {
    pub fn new() -> Self {
        Self {
            window: WindowState::default(),
        }
    }

    /// Clears per-window state. Call when the fail-safe arms, commits, or
    /// expires (spec §4.3 state diagram: every edge into `IDLE`/`IDLE'`).
    pub fn reset(&mut self) {
        self.window = WindowState::default();
    }

    /// Handles `CommissioningComplete`: commits the fail-safe window,
    /// making any NOC/root-cert mutation made under it permanent (spec §4.3
    /// state diagram: `COMMITTED` → `IDLE'`).
    pub fn handle_commissioning_complete(
        &mut self,
        failsafe: &mut FailSafeContext,
    ) -> Result<(), OpCredsError> {
        self.require_armed(failsafe)?;
        failsafe.commit();
        self.reset();
        Ok(())
    }

    /// Drives fail-safe expiry (timeout or explicit `ArmFailSafe(0)`),
    /// rolling back any fabric this window tentatively installed (spec §4.3
    /// state diagram: any state → `IDLE`). The caller owns the timer; this
    /// just applies the rollback once it fires.
    pub fn handle_failsafe_expiry(&mut self, failsafe: &mut FailSafeContext, manager: &FabricManager) {
        if let Some(fabric_index) = failsafe.expire() {
            let _ = manager.delete(fabric_index);
        }
        self.reset();
    }

    fn require_armed(&self, failsafe: &FailSafeContext) -> Result<(), OpCredsError> {
        if !failsafe.is_armed() {
            return Err(OpCredsError::FailsafeRequired);
        }
        Ok(())
    }

    pub fn add_trusted_root_certificate(
        &mut self,
        failsafe: &FailSafeContext,
        codec: &dyn CertificateCodec,
        root_cert: Vec<u8>,
    ) -> Result<(), OpCredsError> {
        self.require_armed(failsafe)?;

        if self.window.committed {
            return Err(OpCredsError::ConstraintError(
                "a NOC was already committed this fail-safe window".to_string(),
            ));
        }

        if let Some(existing) = &self.window.root_cert_added {
            if existing == &root_cert {
                return Ok(());
            }
            return Err(OpCredsError::ConstraintError(
                "a trusted root was already added this fail-safe window".to_string(),
            ));
        }

        codec
            .validate_root(&root_cert)
            .map_err(|_| OpCredsError::Failure("root certificate is structurally invalid".to_string()))?;

        self.window.root_cert_added = Some(root_cert);
        Ok(())
    }

    pub fn csr_request(
        &mut self,
        failsafe: &FailSafeContext,
        manager: &FabricManager,
        crypto: &dyn Crypto,
        is_for_update_noc: bool,
        accessing_session_is_pase: bool,
    ) -> Result<CsrResponse, OpCredsError> {
        self.require_armed(failsafe)?;

        if self.window.committed {
            return Err(OpCredsError::ConstraintError(
                "a NOC was already committed this fail-safe window".to_string(),
            ));
        }

        if is_for_update_noc && accessing_session_is_pase {
            return Err(OpCredsError::InvalidCommand(
                "CSRRequest(IsForUpdateNOC=true) is not allowed over a PASE session",
            ));
        }

        // Key generation is black-boxed behind `Crypto::random_bytes`: this
        // core does not choose a curve or keypair format for the node.
        let private_key = crypto.random_bytes(32);
        let public_key = crypto.random_bytes(65);
        let csr_nonce: [u8; 32] = crypto
            .random_bytes(32)
            .try_into()
            .expect("random_bytes(32) returns 32 bytes");

        if manager.find_by_keypair(&public_key, &private_key).is_some() {
            return Err(OpCredsError::Failure(
                "generated operational keypair collides with one already installed".to_string(),
            ));
        }

        self.window.csr = if is_for_update_noc {
            PendingCsr::ForUpdate {
                public_key: public_key.clone(),
                private_key,
            }
        } else {
            PendingCsr::ForAdd {
                public_key: public_key.clone(),
                private_key,
            }
        }
        .into();

        Ok(CsrResponse { public_key, csr_nonce })
    }

    pub fn add_noc(
        &mut self,
        failsafe: &mut FailSafeContext,
        manager: &FabricManager,
        acl: &dyn AclSink,
        group_keys: &GroupKeyManager,
        crypto: &dyn Crypto,
        codec: &dyn CertificateCodec,
        request: AddNocRequest,
    ) -> Result<NocResponse, OpCredsError> {
        self.require_armed(failsafe)?;

        let Some(root_cert) = self.window.root_cert_added.clone() else {
            return Ok(NocResponse::status(NocStatusCode::MissingCsr));
        };
        let Some(PendingCsrInner::ForAdd { public_key, private_key }) = self.window.csr.0.clone() else {
            return Ok(NocResponse::status(NocStatusCode::MissingCsr));
        };

        if !is_valid_case_admin_subject(request.case_admin_subject) {
            return Ok(NocResponse::status(NocStatusCode::InvalidAdminSubject));
        }
        if is_reserved_vendor_id(request.admin_vendor_id) {
            return Ok(NocResponse::status(NocStatusCode::InvalidAdminSubject));
        }

        let root_public_key = codec
            .root_public_key(&root_cert)
            .map_err(|_| OpCredsError::Failure("trusted root does not parse".to_string()))?;
        let root_vendor_id = codec
            .root_vendor_id(&root_cert)
            .map_err(|_| OpCredsError::Failure("trusted root does not parse".to_string()))?;
        let fabric_id = codec
            .noc_subject_fabric_id(&request.noc)
            .map_err(|_| OpCredsError::Failure("NOC does not parse".to_string()))?;
        let node_id = codec
            .noc_subject_node_id(&request.noc)
            .map_err(|_| OpCredsError::Failure("NOC does not parse".to_string()))?;

        if manager.for_descriptor(fabric_id, &root_public_key).is_some() {
            return Ok(NocResponse::status(NocStatusCode::FabricConflict));
        }
        if manager.commissioned_fabrics() >= crate::manager::MAX_FABRICS {
            return Ok(NocResponse::status(NocStatusCode::TableFull));
        }

        if codec
            .verify_chain(&request.noc, request.icac.as_deref(), &root_cert)
            .is_err()
        {
            return Ok(NocResponse::status(NocStatusCode::InvalidNoc));
        }
        let noc_public_key = codec
            .public_key(&request.noc)
            .map_err(|_| OpCredsError::Failure("NOC does not parse".to_string()))?;
        if noc_public_key != public_key {
            return Ok(NocResponse::status(NocStatusCode::InvalidPublicKey));
        }

        let fabric_index = manager.allocate_fabric_index()?;

        let fabric = FabricBuilder::new()
            .fabric_id(fabric_id)
            .node_id(node_id)
            .root_cert(root_cert)
            .operational_cert(request.noc)
            .operational_keypair(public_key, private_key)
            .root_public_key(root_public_key)
            .root_vendor_id(root_vendor_id);
        let fabric = if let Some(icac) = request.icac {
            fabric.intermediate_ca_cert(icac)
        } else {
            fabric
        };
        let fabric = fabric
            .identity_protection_key(request.ipk)
            .build(crypto, fabric_index)
            .map_err(|e| OpCredsError::Failure(e.to_string()))?;

        manager.add_fabric(Arc::clone(&fabric))?;
        group_keys.install_ipk(fabric_index, request.ipk);
        acl.install_initial_entry(fabric_index, request.case_admin_subject);
        failsafe.set_fabric_index(fabric_index);

        self.window.committed = true;

        Ok(NocResponse::ok(fabric_index))
    }

    pub fn update_noc(
        &mut self,
        failsafe: &FailSafeContext,
        manager: &FabricManager,
        crypto: &dyn Crypto,
        codec: &dyn CertificateCodec,
        request: UpdateNocRequest,
    ) -> Result<NocResponse, OpCredsError> {
        self.require_armed(failsafe)?;

        let Some(PendingCsrInner::ForUpdate { public_key, .. }) = self.window.csr.0.clone() else {
            return Ok(NocResponse::status(NocStatusCode::MissingCsr));
        };
        if self.window.root_cert_added.is_some() {
            return Err(OpCredsError::ConstraintError(
                "UpdateNOC requires no AddTrustedRootCertificate this window".to_string(),
            ));
        }

        let existing = manager.for_index(request.accessing_fabric_index)?;

        let new_fabric_id = codec
            .noc_subject_fabric_id(&request.noc)
            .map_err(|_| OpCredsError::Failure("NOC does not parse".to_string()))?;
        if new_fabric_id != existing.fabric_id() {
            return Ok(NocResponse::status(NocStatusCode::InvalidNoc));
        }
        if let Some(icac) = &request.icac {
            let icac_fabric_id = codec
                .noc_subject_fabric_id(icac)
                .map_err(|_| OpCredsError::Failure("ICAC does not parse".to_string()))?;
            if icac_fabric_id != existing.fabric_id() {
                return Ok(NocResponse::status(NocStatusCode::InvalidNoc));
            }
        }
        if codec
            .verify_chain(&request.noc, request.icac.as_deref(), existing.operational_cert())
            .is_err()
        {
            return Ok(NocResponse::status(NocStatusCode::InvalidNoc));
        }
        let noc_public_key = codec
            .public_key(&request.noc)
            .map_err(|_| OpCredsError::Failure("NOC does not parse".to_string()))?;
        if noc_public_key != public_key {
            return Ok(NocResponse::status(NocStatusCode::InvalidPublicKey));
        }

        let new_node_id = codec
            .noc_subject_node_id(&request.noc)
            .map_err(|_| OpCredsError::Failure("NOC does not parse".to_string()))?;
        let private_key = match self.window.csr.0.clone() {
            Some(PendingCsrInner::ForUpdate { private_key, .. }) => private_key,
            _ => unreachable!("checked above"),
        };

        let replacement = FabricBuilder::new()
            .fabric_id(existing.fabric_id())
            .node_id(new_node_id)
            .root_node_id(existing.root_node_id())
            .root_cert(existing.root_cert().to_vec())
            .operational_cert(request.noc)
            .operational_keypair(noc_public_key, private_key)
            .root_public_key(existing.root_public_key().to_vec())
            .root_vendor_id(existing.root_vendor_id())
            .identity_protection_key(existing.identity_protection_key())
            .label(existing.label().to_string())
            .build(crypto, existing.fabric_index())
            .map_err(|e| OpCredsError::Failure(e.to_string()))?;

        manager.replace_fabric(Arc::clone(&replacement))?;
        self.window.committed = true;

        Ok(NocResponse::ok(replacement.fabric_index()))
    }

    pub fn update_fabric_label(
        &mut self,
        failsafe: &FailSafeContext,
        manager: &FabricManager,
        storage: &dyn crate::storage::Storage,
        fabric_index: FabricIndex,
        label: String,
    ) -> Result<NocResponse, OpCredsError> {
        self.require_armed(failsafe)?;

        let fabric = manager.for_index(fabric_index)?;

        if manager_has_label_conflict(manager, fabric_index, &label) {
            return Ok(NocResponse::status(NocStatusCode::LabelConflict));
        }

        fabric
            .set_label(storage, label)
            .map_err(|e| OpCredsError::ConstraintError(e.to_string()))?;

        Ok(NocResponse::ok(fabric_index))
    }

    pub fn remove_fabric(
        &mut self,
        failsafe: &FailSafeContext,
        manager: &FabricManager,
        acl: &dyn AclSink,
        group_keys: &GroupKeyManager,
        fabric_index: FabricIndex,
    ) -> Result<NocResponse, OpCredsError> {
        self.require_armed(failsafe)?;

        if manager.maybe_for_index(fabric_index).is_none() {
            return Ok(NocResponse::status(NocStatusCode::InvalidFabricIndex));
        }

        let last_remaining = manager.is_last_remaining(fabric_index);
        manager.delete(fabric_index)?;
        acl.remove_fabric(fabric_index);
        group_keys.remove_fabric(fabric_index);

        if last_remaining {
            manager.clear();
        }

        Ok(NocResponse::ok(fabric_index))
    }

    pub fn set_vid_verification_statement(
        &mut self,
        failsafe: &FailSafeContext,
        manager: &FabricManager,
        storage: &dyn crate::storage::Storage,
        fabric_index: FabricIndex,
        vendor_id: Option<u16>,
        statement: Option<Vec<u8>>,
        vvsc: Option<Vec<u8>>,
    ) -> Result<(), OpCredsError> {
        self.require_armed(failsafe)?;

        let fabric = manager.for_index(fabric_index)?;

        if vvsc.is_some() && fabric.intermediate_ca_cert().is_some() {
            return Err(OpCredsError::InvalidCommand(
                "VVSC is mutually exclusive with an intermediate CA certificate",
            ));
        }
        if let Some(statement) = &statement {
            if !statement.is_empty() && statement.len() != 85 {
                return Err(OpCredsError::ConstraintError(
                    "VID verification statement must be 0 or 85 bytes".to_string(),
                ));
            }
        }

        fabric
            .update_vendor_verification_data(storage, vendor_id, statement, vvsc)
            .map_err(|e| OpCredsError::ConstraintError(e.to_string()))
    }

    pub fn sign_vid_verification_request(
        &mut self,
        failsafe: &FailSafeContext,
        manager: &FabricManager,
        crypto: &dyn Crypto,
        fabric_index: FabricIndex,
        fabric_binding_version: u8,
        client_challenge: [u8; 32],
        attestation_challenge: &[u8],
        vendor_fabric_binding_message: &[u8],
    ) -> Result<SignVidVerificationResponse, OpCredsError> {
        self.require_armed(failsafe)?;

        let fabric = manager
            .maybe_for_index(fabric_index)
            .ok_or_else(|| OpCredsError::ConstraintError("unknown FabricIndex".to_string()))?;

        let mut message = Vec::new();
        message.push(fabric_binding_version);
        message.extend_from_slice(&client_challenge);
        message.extend_from_slice(attestation_challenge);
        message.push(fabric_index.get());
        message.extend_from_slice(vendor_fabric_binding_message);
        if let Some(statement) = fabric.vid_verification_statement() {
            message.extend_from_slice(&statement);
        }

        let signature = crypto
            .sign(fabric.operational_identity_protection_key(), &message)
            .map_err(|_| OpCredsError::Failure("signing failed".to_string()))?;

        Ok(SignVidVerificationResponse { fabric_index, signature })
    }
}

impl Default for OperationalCredentialsStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn manager_has_label_conflict(manager: &FabricManager, fabric_index: FabricIndex, label: &str) -> bool {
    // `FabricManager` does not expose an iterator outside this crate; the
    // check walks indices in the valid range and skips the one being
    // updated, which is sufficient for the table sizes this core handles.
    for raw in FabricIndex::MIN..=FabricIndex::MAX {
        let Ok(index) = FabricIndex::new(raw) else { continue };
        if index == fabric_index {
            continue;
        }
        if let Some(fabric) = manager.maybe_for_index(index) {
            if fabric.label().as_str() == label {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclStore;
    use crate::crypto::Sha256Crypto;
    use crate::group::GroupKeyManager;
    use crate::storage::MemoryStorage;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A `CertificateCodec` test double that treats certs as
    /// `fabric_id:node_id` ASCII tuples and "verifies" anything non-empty.
    struct FakeCodec {
        public_keys: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    }

    impl FakeCodec {
        fn new() -> Self {
            Self {
                public_keys: Mutex::new(HashMap::new()),
            }
        }

        fn register(&self, cert: &[u8], public_key: Vec<u8>) {
            self.public_keys
                .lock()
                .unwrap()
                .insert(cert.to_vec(), public_key);
        }
    }

    fn parse_fields(cert: &[u8]) -> (u64, u64) {
        let text = String::from_utf8_lossy(cert);
        let mut parts = text.split(':');
        let fabric_id: u64 = parts.next().unwrap().parse().unwrap();
        let node_id: u64 = parts.next().unwrap().parse().unwrap();
        (fabric_id, node_id)
    }

    impl CertificateCodec for FakeCodec {
        fn validate_root(&self, root_cert: &[u8]) -> Result<(), crate::crypto::CertificateError> {
            if root_cert.is_empty() {
                return Err(crate::crypto::CertificateError::Malformed("empty".into()));
            }
            Ok(())
        }

        fn root_public_key(&self, root_cert: &[u8]) -> Result<Vec<u8>, crate::crypto::CertificateError> {
            Ok(root_cert.to_vec())
        }

        fn root_vendor_id(&self, _root_cert: &[u8]) -> Result<u16, crate::crypto::CertificateError> {
            Ok(0xFFF1)
        }

        fn noc_subject_fabric_id(&self, noc: &[u8]) -> Result<FabricId, crate::crypto::CertificateError> {
            Ok(FabricId(parse_fields(noc).0))
        }

        fn noc_subject_node_id(&self, noc: &[u8]) -> Result<NodeId, crate::crypto::CertificateError> {
            Ok(NodeId(parse_fields(noc).1))
        }

        fn public_key(&self, cert: &[u8]) -> Result<Vec<u8>, crate::crypto::CertificateError> {
            Ok(self
                .public_keys
                .lock()
                .unwrap()
                .get(cert)
                .cloned()
                .unwrap_or_default())
        }

        fn verify_chain(
            &self,
            noc: &[u8],
            _icac: Option<&[u8]>,
            root: &[u8],
        ) -> Result<(), crate::crypto::CertificateError> {
            if noc.is_empty() || root.is_empty() {
                return Err(crate::crypto::CertificateError::ChainInvalid);
            }
            Ok(())
        }
    }

    fn armed_failsafe() -> FailSafeContext {
        let mut ctx = FailSafeContext::new();
        ctx.arm();
        ctx
    }

    /// A `Crypto` test double whose `random_bytes` is deterministic, so a
    /// test can force the exact keypair `csr_request` will generate.
    struct FakeCrypto;

    impl Crypto for FakeCrypto {
        fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32] {
            Sha256Crypto.hmac_sha256(key, data)
        }

        fn hkdf_sha256(&self, ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Vec<u8> {
            Sha256Crypto.hkdf_sha256(ikm, salt, info, out_len)
        }

        fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, crate::crypto::CryptoError> {
            Sha256Crypto.sign(private_key, message)
        }

        fn verify(
            &self,
            public_key: &[u8],
            message: &[u8],
            signature: &[u8],
        ) -> Result<(), crate::crypto::CryptoError> {
            Sha256Crypto.verify(public_key, message, signature)
        }

        fn random_bytes(&self, len: usize) -> Vec<u8> {
            vec![0xEEu8; len]
        }
    }

    #[test]
    fn add_noc_happy_path_commissions_fabric_and_installs_collaborators() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let acl = AclStore::new();
        let group_keys = GroupKeyManager::new();
        let crypto = Sha256Crypto;
        let codec = FakeCodec::new();
        let mut failsafe = armed_failsafe();
        let mut machine = OperationalCredentialsStateMachine::new();

        machine
            .add_trusted_root_certificate(&failsafe, &codec, b"root-cert".to_vec())
            .unwrap();
        let csr = machine
            .csr_request(&failsafe, &manager, &crypto, false, false)
            .unwrap();

        let noc = b"5:1".to_vec();
        codec.register(&noc, csr.public_key.clone());

        let response = machine
            .add_noc(
                &mut failsafe,
                &manager,
                &acl,
                &group_keys,
                &crypto,
                &codec,
                AddNocRequest {
                    noc,
                    icac: None,
                    ipk: [0u8; 16],
                    case_admin_subject: 1,
                    admin_vendor_id: 0xFFF1,
                    accessing_session_is_pase: true,
                },
            )
            .unwrap();

        assert_eq!(response.status_code, NocStatusCode::Ok);
        let fabric_index = response.fabric_index.unwrap();
        assert_eq!(manager.commissioned_fabrics(), 1);
        assert_eq!(acl.entries_for(fabric_index).len(), 1);
        assert!(group_keys.operational_keys(fabric_index).is_some());
        assert_eq!(failsafe.fabric_index(), Some(fabric_index));
    }

    #[test]
    fn update_noc_replaces_fabric_keeping_its_index() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let crypto = Sha256Crypto;
        let codec = FakeCodec::new();

        let existing = crate::fabric::tests_support::build_test_fabric(
            FabricIndex::new(1).unwrap(),
            FabricId(7),
            NodeId(1),
        );
        manager.add_fabric(existing.clone()).unwrap();

        let failsafe = armed_failsafe();
        let mut machine = OperationalCredentialsStateMachine::new();
        let csr = machine
            .csr_request(&failsafe, &manager, &crypto, true, false)
            .unwrap();

        let new_noc = b"7:2".to_vec();
        codec.register(&new_noc, csr.public_key);

        let response = machine
            .update_noc(
                &failsafe,
                &manager,
                &crypto,
                &codec,
                UpdateNocRequest {
                    noc: new_noc,
                    icac: None,
                    accessing_fabric_index: FabricIndex::new(1).unwrap(),
                },
            )
            .unwrap();

        assert_eq!(response, NocResponse::ok(FabricIndex::new(1).unwrap()));
        let replaced = manager.for_index(FabricIndex::new(1).unwrap()).unwrap();
        assert_eq!(replaced.node_id(), NodeId(2));
        assert_eq!(replaced.fabric_id(), FabricId(7));
    }

    #[test]
    fn add_noc_without_csr_reports_missing_csr() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let acl = AclStore::new();
        let group_keys = GroupKeyManager::new();
        let crypto = Sha256Crypto;
        let codec = FakeCodec::new();
        let mut failsafe = armed_failsafe();
        let mut machine = OperationalCredentialsStateMachine::new();

        machine
            .add_trusted_root_certificate(&failsafe, &codec, b"root-cert".to_vec())
            .unwrap();

        let response = machine
            .add_noc(
                &mut failsafe,
                &manager,
                &acl,
                &group_keys,
                &crypto,
                &codec,
                AddNocRequest {
                    noc: b"5:1".to_vec(),
                    icac: None,
                    ipk: [0u8; 16],
                    case_admin_subject: 1,
                    admin_vendor_id: 0xFFF1,
                    accessing_session_is_pase: true,
                },
            )
            .unwrap();

        assert_eq!(response.status_code, NocStatusCode::MissingCsr);
    }

    #[test]
    fn add_noc_fabric_conflict_when_pair_already_present() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let acl = AclStore::new();
        let group_keys = GroupKeyManager::new();
        let crypto = Sha256Crypto;
        let codec = FakeCodec::new();

        let existing = crate::fabric::tests_support::build_test_fabric(
            FabricIndex::new(1).unwrap(),
            FabricId(5),
            NodeId(1),
        );
        manager.add_fabric(existing.clone()).unwrap();

        let mut failsafe = armed_failsafe();
        let mut machine = OperationalCredentialsStateMachine::new();
        machine
            .add_trusted_root_certificate(&failsafe, &codec, existing.root_public_key().to_vec())
            .unwrap();
        let csr = machine
            .csr_request(&failsafe, &manager, &crypto, false, false)
            .unwrap();
        let noc = b"5:2".to_vec();
        codec.register(&noc, csr.public_key);

        let response = machine
            .add_noc(
                &mut failsafe,
                &manager,
                &acl,
                &group_keys,
                &crypto,
                &codec,
                AddNocRequest {
                    noc,
                    icac: None,
                    ipk: [0u8; 16],
                    case_admin_subject: 1,
                    admin_vendor_id: 0xFFF1,
                    accessing_session_is_pase: false,
                },
            )
            .unwrap();

        assert_eq!(response.status_code, NocStatusCode::FabricConflict);
        assert_eq!(manager.commissioned_fabrics(), 1);
    }

    #[test]
    fn csr_request_for_update_over_pase_is_invalid_command() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let crypto = Sha256Crypto;
        let failsafe = armed_failsafe();
        let mut machine = OperationalCredentialsStateMachine::new();

        let result = machine.csr_request(&failsafe, &manager, &crypto, true, true);
        assert_eq!(
            result,
            Err(OpCredsError::InvalidCommand(
                "CSRRequest(IsForUpdateNOC=true) is not allowed over a PASE session"
            ))
        );
    }

    #[test]
    fn operations_without_armed_failsafe_fail() {
        let codec = FakeCodec::new();
        let failsafe = FailSafeContext::new();
        let mut machine = OperationalCredentialsStateMachine::new();

        assert_eq!(
            machine.add_trusted_root_certificate(&failsafe, &codec, vec![1]),
            Err(OpCredsError::FailsafeRequired)
        );
    }

    #[test]
    fn remove_last_fabric_clears_the_whole_table() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let acl = AclStore::new();
        let group_keys = GroupKeyManager::new();
        let fabric = crate::fabric::tests_support::build_test_fabric(
            FabricIndex::new(1).unwrap(),
            FabricId(1),
            NodeId(1),
        );
        manager.add_fabric(fabric).unwrap();
        acl.install_initial_entry(FabricIndex::new(1).unwrap(), 1);

        let failsafe = armed_failsafe();
        let mut machine = OperationalCredentialsStateMachine::new();

        let response = machine
            .remove_fabric(&failsafe, &manager, &acl, &group_keys, FabricIndex::new(1).unwrap())
            .unwrap();

        assert_eq!(response.status_code, NocStatusCode::Ok);
        assert_eq!(manager.commissioned_fabrics(), 0);
    }

    #[test]
    fn csr_request_fails_when_generated_keypair_collides_with_an_installed_fabric() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let colliding = FabricBuilder::new()
            .fabric_id(FabricId(9))
            .node_id(NodeId(1))
            .root_cert(b"root".to_vec())
            .operational_cert(b"noc".to_vec())
            .operational_keypair(vec![0xEEu8; 65], vec![0xEEu8; 32])
            .root_public_key(b"root-pub".to_vec())
            .root_vendor_id(0xFFF1)
            .identity_protection_key([0u8; 16])
            .build(&FakeCrypto, FabricIndex::new(1).unwrap())
            .unwrap();
        manager.add_fabric(colliding).unwrap();

        let failsafe = armed_failsafe();
        let mut machine = OperationalCredentialsStateMachine::new();

        let result = machine.csr_request(&failsafe, &manager, &FakeCrypto, false, false);
        assert!(matches!(result, Err(OpCredsError::Failure(_))));
    }

    #[test]
    fn commissioning_complete_commits_the_failsafe_window() {
        let mut failsafe = armed_failsafe();
        failsafe.set_fabric_index(FabricIndex::new(3).unwrap());
        let mut machine = OperationalCredentialsStateMachine::new();

        machine.handle_commissioning_complete(&mut failsafe).unwrap();

        assert!(!failsafe.is_armed());
        assert_eq!(failsafe.fabric_index(), None);
    }

    #[test]
    fn failsafe_expiry_rolls_back_the_tentative_fabric() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let tentative = crate::fabric::tests_support::build_test_fabric(
            FabricIndex::new(1).unwrap(),
            FabricId(1),
            NodeId(1),
        );
        manager.add_fabric(tentative).unwrap();

        let mut failsafe = armed_failsafe();
        failsafe.set_fabric_index(FabricIndex::new(1).unwrap());
        let mut machine = OperationalCredentialsStateMachine::new();

        machine.handle_failsafe_expiry(&mut failsafe, &manager);

        assert!(!failsafe.is_armed());
        assert_eq!(manager.commissioned_fabrics(), 0);
    }
}
