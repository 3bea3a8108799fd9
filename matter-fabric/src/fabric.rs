//! A single commissioned identity (spec §3, §4.1).
//!
//! `Fabric` is built once by [`FabricBuilder`] and is append-only after
//! that: the handful of fields that legitimately change post-construction
//! (label, VID verification data, the deleting flag) go through explicit
//! setters that validate and persist, mirroring how the teacher's
//! `FabricConfig`/`FabricEntry` pair separates one-shot construction
//! (`from_section_config`) from in-place mutation (`update_fabric`).

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use matter_wire::{FabricId, FabricIndex, NodeId};

use crate::crypto::{self, CertificateCodec, Crypto, GROUP_SECURITY_INFO, SYMMETRIC_KEY_LENGTH_BYTES};
use crate::error::FabricError;
use crate::storage::{fabric_scope, Storage};

const VVSC_STATEMENT_LEN: usize = 85;

/// A fabric's user-assigned label: 1..32 UTF-8 bytes (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FabricLabel(String);

impl FabricLabel {
    pub fn new(label: String) -> Result<Self, FabricError> {
        if label.is_empty() || label.len() > 32 {
            return Err(FabricError::InvalidLabelLength(label.len()));
        }
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FabricLabel {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_owned())
    }
}

impl fmt::Display for FabricLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FabricLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fields mutated through [`Fabric::set_label`]/[`Fabric::update_vendor_verification_data`],
/// kept behind a lock since other holders only ever see a shared reference
/// to the `Fabric` (spec §9: "other holders getting an opaque reference").
#[derive(Debug, Clone, Default)]
struct MutableState {
    label: FabricLabel,
    vid_verification_statement: Option<Vec<u8>>,
    vvsc: Option<Vec<u8>>,
    is_deleting: bool,
}

/// One commissioned identity. Identity and credential fields are immutable
/// after [`FabricBuilder::build`]; see [`MutableState`] for what isn't.
#[derive(Debug)]
pub struct Fabric {
    fabric_index: FabricIndex,
    fabric_id: FabricId,
    node_id: NodeId,
    root_node_id: NodeId,
    global_id: u64,

    root_cert: Vec<u8>,
    intermediate_ca_cert: Option<Vec<u8>>,
    operational_cert: Vec<u8>,
    operational_public_key: Vec<u8>,
    operational_private_key: Vec<u8>,
    root_public_key: Vec<u8>,
    root_vendor_id: u16,

    identity_protection_key: [u8; SYMMETRIC_KEY_LENGTH_BYTES],
    operational_identity_protection_key: Vec<u8>,

    storage_scope: String,
    mutable: RwLock<MutableState>,
}

impl Fabric {
    pub fn fabric_index(&self) -> FabricIndex {
        self.fabric_index
    }

    pub fn fabric_id(&self) -> FabricId {
        self.fabric_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn root_node_id(&self) -> NodeId {
        self.root_node_id
    }

    pub fn global_id(&self) -> u64 {
        self.global_id
    }

    pub fn root_public_key(&self) -> &[u8] {
        &self.root_public_key
    }

    pub fn root_cert(&self) -> &[u8] {
        &self.root_cert
    }

    pub fn identity_protection_key(&self) -> [u8; SYMMETRIC_KEY_LENGTH_BYTES] {
        self.identity_protection_key
    }

    pub fn root_vendor_id(&self) -> u16 {
        self.root_vendor_id
    }

    pub fn operational_cert(&self) -> &[u8] {
        &self.operational_cert
    }

    pub fn intermediate_ca_cert(&self) -> Option<&[u8]> {
        self.intermediate_ca_cert.as_deref()
    }

    pub fn operational_identity_protection_key(&self) -> &[u8] {
        &self.operational_identity_protection_key
    }

    pub fn storage_scope(&self) -> &str {
        &self.storage_scope
    }

    pub fn label(&self) -> FabricLabel {
        self.mutable.read().expect("fabric lock poisoned").label.clone()
    }

    pub fn vid_verification_statement(&self) -> Option<Vec<u8>> {
        self.mutable
            .read()
            .expect("fabric lock poisoned")
            .vid_verification_statement
            .clone()
    }

    pub fn vvsc(&self) -> Option<Vec<u8>> {
        self.mutable.read().expect("fabric lock poisoned").vvsc.clone()
    }

    pub fn is_deleting(&self) -> bool {
        self.mutable.read().expect("fabric lock poisoned").is_deleting
    }

    /// Spec §4.1: validates length 1..32, writes through to persistence.
    pub fn set_label(&self, storage: &dyn Storage, label: String) -> Result<(), FabricError> {
        let label = FabricLabel::new(label)?;
        storage.write(&self.storage_scope, "label", label.as_str().as_bytes().to_vec());
        self.mutable.write().expect("fabric lock poisoned").label = label;
        Ok(())
    }

    /// Spec §4.1: honors ICAC/VVSC mutual exclusion, rejects statements of
    /// length outside `{0, 85}`, and rejects a `VendorID` that does not match
    /// the fabric's root vendor ID; a zero-length statement erases the field.
    pub fn update_vendor_verification_data(
        &self,
        storage: &dyn Storage,
        vendor_id: Option<u16>,
        statement: Option<Vec<u8>>,
        vvsc: Option<Vec<u8>>,
    ) -> Result<(), FabricError> {
        if let Some(statement) = &statement {
            if !statement.is_empty() && statement.len() != VVSC_STATEMENT_LEN {
                return Err(FabricError::InvalidVidVerificationStatementLength(
                    statement.len(),
                ));
            }
        }
        if vvsc.is_some() && self.intermediate_ca_cert.is_some() {
            return Err(FabricError::IcacAndVvscBothPresent);
        }
        if let Some(vendor_id) = vendor_id {
            if vendor_id != self.root_vendor_id {
                return Err(FabricError::VendorIdMismatch {
                    given: vendor_id,
                    expected: self.root_vendor_id,
                });
            }
        }

        let mut mutable = self.mutable.write().expect("fabric lock poisoned");
        if let Some(statement) = statement {
            mutable.vid_verification_statement = if statement.is_empty() {
                None
            } else {
                storage.write(&self.storage_scope, "vid-verification-statement", statement.clone());
                Some(statement)
            };
            if mutable.vid_verification_statement.is_none() {
                storage.remove(&self.storage_scope, "vid-verification-statement");
            }
        }
        if let Some(vvsc) = vvsc {
            storage.write(&self.storage_scope, "vvsc", vvsc.clone());
            mutable.vvsc = Some(vvsc);
        }

        Ok(())
    }

    pub(crate) fn mark_deleting(&self) {
        self.mutable.write().expect("fabric lock poisoned").is_deleting = true;
    }

    /// Validates `icac` (if present) against the root, then `noc` against
    /// the root-with-ICAC (spec §4.1).
    pub fn verify_credentials(
        &self,
        codec: &dyn CertificateCodec,
        noc: &[u8],
        icac: Option<&[u8]>,
    ) -> Result<(), FabricError> {
        codec
            .verify_chain(noc, icac, &self.root_cert)
            .map_err(|e| FabricError::CertificateError(e.to_string()))
    }

    /// Collision check used by `AddNOC`'s `FabricConflict` test (spec §4.3).
    pub fn matches_fabric_id_and_root_public_key(
        &self,
        fabric_id: FabricId,
        root_public_key: &[u8],
    ) -> bool {
        self.fabric_id == fabric_id && self.root_public_key == root_public_key
    }

    pub fn matches_keypair(&self, public_key: &[u8], private_key: &[u8]) -> bool {
        self.operational_public_key == public_key && self.operational_private_key == private_key
    }

    /// HMAC-SHA256 over `random ‖ rootPublicKey ‖ fabricId ‖ nodeId` under
    /// every IPK in the fabric's group-key slot, supporting in-flight IPK
    /// rotation (spec §4.1).
    pub fn destination_ids_for(
        &self,
        crypto: &dyn Crypto,
        group_keys: &crate::group::GroupKeyManager,
        node_id: NodeId,
        random: &[u8],
    ) -> Vec<[u8; 32]> {
        let Some(set) = group_keys.operational_keys(self.fabric_index) else {
            return Vec::new();
        };
        let mut ids = Vec::with_capacity(2);
        ids.push(crypto::destination_id(
            crypto,
            &set.current_epoch_key,
            random,
            &self.root_public_key,
            self.fabric_id,
            node_id,
        ));
        if let Some(previous) = set.previous_epoch_key {
            ids.push(crypto::destination_id(
                crypto,
                &previous,
                random,
                &self.root_public_key,
                self.fabric_id,
                node_id,
            ));
        }
        ids
    }

    /// The destination ID under only the current operational IPK.
    pub fn current_destination_id_for(
        &self,
        crypto: &dyn Crypto,
        group_keys: &crate::group::GroupKeyManager,
        node_id: NodeId,
        random: &[u8],
    ) -> Option<[u8; 32]> {
        let set = group_keys.operational_keys(self.fabric_index)?;
        Some(crypto::destination_id(
            crypto,
            &set.current_epoch_key,
            random,
            &self.root_public_key,
            self.fabric_id,
            node_id,
        ))
    }
}

/// Builds a [`Fabric`] from the materials gathered over an Operational
/// Credentials exchange (`AddTrustedRootCertificate`, `CSRRequest`,
/// `AddNOC`). [`FabricBuilder::build`] is the only constructor.
#[derive(Default)]
pub struct FabricBuilder {
    fabric_id: Option<FabricId>,
    node_id: Option<NodeId>,
    root_node_id: Option<NodeId>,
    root_cert: Option<Vec<u8>>,
    intermediate_ca_cert: Option<Vec<u8>>,
    operational_cert: Option<Vec<u8>>,
    operational_public_key: Option<Vec<u8>>,
    operational_private_key: Option<Vec<u8>>,
    root_public_key: Option<Vec<u8>>,
    root_vendor_id: Option<u16>,
    identity_protection_key: Option<[u8; SYMMETRIC_KEY_LENGTH_BYTES]>,
    label: String,
}

impl FabricBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fabric_id(mut self, fabric_id: FabricId) -> Self {
        self.fabric_id = Some(fabric_id);
        self
    }

    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn root_node_id(mut self, root_node_id: NodeId) -> Self {
        self.root_node_id = Some(root_node_id);
        self
    }

    pub fn root_cert(mut self, root_cert: Vec<u8>) -> Self {
        self.root_cert = Some(root_cert);
        self
    }

    pub fn intermediate_ca_cert(mut self, cert: Vec<u8>) -> Self {
        self.intermediate_ca_cert = Some(cert);
        self
    }

    pub fn operational_cert(mut self, cert: Vec<u8>) -> Self {
        self.operational_cert = Some(cert);
        self
    }

    pub fn operational_keypair(mut self, public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        self.operational_public_key = Some(public_key);
        self.operational_private_key = Some(private_key);
        self
    }

    pub fn root_public_key(mut self, key: Vec<u8>) -> Self {
        self.root_public_key = Some(key);
        self
    }

    pub fn root_vendor_id(mut self, vendor_id: u16) -> Self {
        self.root_vendor_id = Some(vendor_id);
        self
    }

    pub fn identity_protection_key(mut self, ipk: [u8; SYMMETRIC_KEY_LENGTH_BYTES]) -> Self {
        self.identity_protection_key = Some(ipk);
        self
    }

    pub fn label(mut self, label: String) -> Self {
        self.label = label;
        self
    }

    fn require<T>(field: Option<T>, name: &'static str) -> Result<T, FabricError> {
        field.ok_or(FabricError::IncompleteBuilder(name))
    }

    /// Builds the fabric, deriving `globalId` and the operational IPK.
    pub fn build(self, crypto: &dyn Crypto, fabric_index: FabricIndex) -> Result<Arc<Fabric>, FabricError> {
        let fabric_id = Self::require(self.fabric_id, "fabric_id")?;
        let node_id = Self::require(self.node_id, "node_id")?;
        let root_node_id = self.root_node_id.unwrap_or(node_id);
        let root_cert = Self::require(self.root_cert, "root_cert")?;
        let operational_cert = Self::require(self.operational_cert, "operational_cert")?;
        let operational_public_key = Self::require(self.operational_public_key, "operational_public_key")?;
        let operational_private_key =
            Self::require(self.operational_private_key, "operational_private_key")?;
        let root_public_key = Self::require(self.root_public_key, "root_public_key")?;
        let root_vendor_id = Self::require(self.root_vendor_id, "root_vendor_id")?;
        let identity_protection_key =
            Self::require(self.identity_protection_key, "identity_protection_key")?;

        let label = FabricLabel::new(self.label)?;

        let global_id = crypto::global_fabric_id(crypto, fabric_id, &root_public_key);

        let operational_identity_protection_key = crypto.hkdf_sha256(
            &identity_protection_key,
            &global_id.to_be_bytes(),
            GROUP_SECURITY_INFO,
            SYMMETRIC_KEY_LENGTH_BYTES,
        );

        Ok(Arc::new(Fabric {
            fabric_index,
            fabric_id,
            node_id,
            root_node_id,
            global_id,
            root_cert,
            intermediate_ca_cert: self.intermediate_ca_cert,
            operational_cert,
            operational_public_key,
            operational_private_key,
            root_public_key,
            root_vendor_id,
            identity_protection_key,
            operational_identity_protection_key,
            storage_scope: fabric_scope(fabric_index),
            mutable: RwLock::new(MutableState {
                label,
                vid_verification_statement: None,
                vvsc: None,
                is_deleting: false,
            }),
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::build_test_fabric;
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn set_label_rejects_out_of_range_lengths() {
        let fabric = build_test_fabric(
            FabricIndex::new(1).unwrap(),
            FabricId(1),
            NodeId(1),
        );
        let storage = MemoryStorage::new();

        assert_eq!(
            fabric.set_label(&storage, String::new()),
            Err(FabricError::InvalidLabelLength(0))
        );
        assert!(fabric.set_label(&storage, "a".repeat(33)).is_err());
        assert!(fabric.set_label(&storage, "kitchen".to_string()).is_ok());
        assert_eq!(fabric.label().as_str(), "kitchen");
    }

    #[test]
    fn vid_verification_statement_must_be_0_or_85_bytes() {
        let fabric = build_test_fabric(
            FabricIndex::new(1).unwrap(),
            FabricId(1),
            NodeId(1),
        );
        let storage = MemoryStorage::new();

        let bad = fabric.update_vendor_verification_data(&storage, None, Some(vec![1, 2, 3]), None);
        assert_eq!(
            bad,
            Err(FabricError::InvalidVidVerificationStatementLength(3))
        );

        let ok = fabric.update_vendor_verification_data(&storage, None, Some(vec![7u8; 85]), None);
        assert!(ok.is_ok());
        assert_eq!(fabric.vid_verification_statement().unwrap().len(), 85);
    }

    #[test]
    fn update_vendor_verification_data_rejects_mismatched_vendor_id() {
        let fabric = build_test_fabric(
            FabricIndex::new(1).unwrap(),
            FabricId(1),
            NodeId(1),
        );
        let storage = MemoryStorage::new();

        assert_eq!(
            fabric.update_vendor_verification_data(&storage, Some(0x1234), None, None),
            Err(FabricError::VendorIdMismatch {
                given: 0x1234,
                expected: fabric.root_vendor_id(),
            })
        );
        assert!(fabric
            .update_vendor_verification_data(&storage, Some(fabric.root_vendor_id()), None, None)
            .is_ok());
    }

    #[test]
    fn matches_fabric_id_and_root_public_key_compares_both_fields() {
        let fabric = FabricBuilder::new()
            .fabric_id(FabricId(5))
            .node_id(NodeId(1))
            .root_cert(vec![0xAA; 32])
            .operational_cert(vec![0xBB; 32])
            .operational_keypair(vec![0x01; 32], vec![0x02; 32])
            .root_public_key(b"root-key".to_vec())
            .root_vendor_id(0xFFF1)
            .identity_protection_key([0x10; SYMMETRIC_KEY_LENGTH_BYTES])
            .label("home".to_string())
            .build(&crate::crypto::Sha256Crypto, FabricIndex::new(1).unwrap())
            .unwrap();

        assert!(fabric.matches_fabric_id_and_root_public_key(FabricId(5), b"root-key"));
        assert!(!fabric.matches_fabric_id_and_root_public_key(FabricId(6), b"root-key"));
    }
}
