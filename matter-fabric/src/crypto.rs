//! The `Crypto` and `CertificateCodec` collaborators named in spec §1/§6.
//!
//! Certificate parsing and chain verification, and asymmetric sign/verify,
//! are black-boxed per the parent spec and only available as trait objects
//! here. HMAC-SHA256 and HKDF-SHA256 are named explicitly by the spec
//! (destination-ID derivation, operational IPK derivation) and so are
//! implemented concretely using `sha2`/`hmac`/`hkdf` — the same crates
//! `rs-matter` reaches for in the retrieval pack.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use matter_wire::{FabricId, NodeId};

/// Info string used to derive an operational IPK from a fabric's epoch IPK
/// (spec §3: `operationalIdentityProtectionKey = HKDF(IPK, globalId_be64,
/// GROUP_SECURITY_INFO)`).
pub const GROUP_SECURITY_INFO: &[u8] = b"GroupKey v1.0";

pub const SYMMETRIC_KEY_LENGTH_BYTES: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("signing failed")]
    SignFailed,
    #[error("signature did not verify")]
    VerifyFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("certificate is structurally invalid: {0}")]
    Malformed(String),
    #[error("certificate chain does not validate against the trusted root")]
    ChainInvalid,
    #[error("certificate public key does not match the expected keypair")]
    PublicKeyMismatch,
}

/// HMAC/HKDF and asymmetric sign/verify, injected by the node hosting this
/// core (spec §1: "raw crypto primitives (`Crypto`) assumed available as a
/// black-box").
pub trait Crypto: Send + Sync {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32];

    fn hkdf_sha256(&self, ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Vec<u8>;

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8])
        -> Result<(), CryptoError>;

    fn random_bytes(&self, len: usize) -> Vec<u8>;
}

/// Certificate parsing and chain verification, injected by the node (spec
/// §1: "certificate parsing... assumed available as a black-box
/// `CertificateCodec`").
pub trait CertificateCodec: Send + Sync {
    fn validate_root(&self, root_cert: &[u8]) -> Result<(), CertificateError>;

    fn root_public_key(&self, root_cert: &[u8]) -> Result<Vec<u8>, CertificateError>;

    fn root_vendor_id(&self, root_cert: &[u8]) -> Result<u16, CertificateError>;

    fn noc_subject_fabric_id(&self, noc: &[u8]) -> Result<FabricId, CertificateError>;

    fn noc_subject_node_id(&self, noc: &[u8]) -> Result<NodeId, CertificateError>;

    fn public_key(&self, cert: &[u8]) -> Result<Vec<u8>, CertificateError>;

    /// Verifies `noc` (optionally through `icac`) chains to `root`.
    fn verify_chain(
        &self,
        noc: &[u8],
        icac: Option<&[u8]>,
        root: &[u8],
    ) -> Result<(), CertificateError>;
}

/// HMAC-SHA256/HKDF-SHA256 backed by `sha2`/`hmac`/`hkdf`. Sign/verify are
/// intentionally unimplemented: this core never picks an asymmetric scheme
/// on the node's behalf, matching spec §1's black-boxing of raw crypto.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Crypto;

impl Crypto for Sha256Crypto {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32] {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(data);
        let result = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }

    fn hkdf_sha256(&self, ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Vec<u8> {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut out = vec![0u8; out_len];
        hk.expand(info, &mut out)
            .expect("out_len is well within HKDF-SHA256's 8160-byte limit");
        out
    }

    fn sign(&self, _private_key: &[u8], _message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::SignFailed)
    }

    fn verify(
        &self,
        _public_key: &[u8],
        _message: &[u8],
        _signature: &[u8],
    ) -> Result<(), CryptoError> {
        Err(CryptoError::VerifyFailed)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut out);
        out
    }
}

/// Computes the 64-bit `H(fabricId ‖ rootPublicKey)` global fabric ID (spec
/// §3). Truncates the HMAC output (keyed with an all-zero key, since this is
/// a plain hash, not a MAC over a shared secret) to its first 8 bytes.
pub fn global_fabric_id(
    crypto: &dyn Crypto,
    fabric_id: FabricId,
    root_public_key: &[u8],
) -> u64 {
    let mut data = Vec::with_capacity(8 + root_public_key.len());
    data.extend_from_slice(&fabric_id.to_be_bytes());
    data.extend_from_slice(root_public_key);
    let digest = crypto.hmac_sha256(&[0u8; 32], &data);
    u64::from_be_bytes(digest[..8].try_into().unwrap())
}

/// Computes one destination ID: `HMAC_IPK(random ‖ rootPublicKey ‖ fabricId
/// ‖ nodeId)` (spec §4.1, glossary).
pub fn destination_id(
    crypto: &dyn Crypto,
    ipk: &[u8],
    random: &[u8],
    root_public_key: &[u8],
    fabric_id: FabricId,
    node_id: NodeId,
) -> [u8; 32] {
    let mut data = Vec::with_capacity(random.len() + root_public_key.len() + 16);
    data.extend_from_slice(random);
    data.extend_from_slice(root_public_key);
    data.extend_from_slice(&fabric_id.to_be_bytes());
    data.extend_from_slice(&node_id.to_be_bytes());
    crypto.hmac_sha256(ipk, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_fabric_id_is_deterministic() {
        let crypto = Sha256Crypto;
        let a = global_fabric_id(&crypto, FabricId(5), b"root-key");
        let b = global_fabric_id(&crypto, FabricId(5), b"root-key");
        assert_eq!(a, b);

        let c = global_fabric_id(&crypto, FabricId(6), b"root-key");
        assert_ne!(a, c);
    }

    #[test]
    fn destination_id_changes_with_node_id() {
        let crypto = Sha256Crypto;
        let ipk = [0x11u8; 16];
        let random = [0x22u8; 32];
        let root_key = b"root-public-key";

        let d1 = destination_id(&crypto, &ipk, &random, root_key, FabricId(1), NodeId(1));
        let d2 = destination_id(&crypto, &ipk, &random, root_key, FabricId(1), NodeId(2));
        assert_ne!(d1, d2);
    }

    #[test]
    fn random_bytes_are_not_all_zero_and_vary_between_calls() {
        let crypto = Sha256Crypto;
        let a = crypto.random_bytes(32);
        let b = crypto.random_bytes(32);
        assert_ne!(a, vec![0u8; 32]);
        assert_ne!(a, b);
    }
}
