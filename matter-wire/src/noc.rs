use thiserror::Error;

use crate::ids::{FabricId, FabricIndex, NodeId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer is truncated")]
    Truncated,
    #[error("invalid session type byte {0:#04x}")]
    InvalidSessionType(u8),
    #[error("label is {0} bytes, outside the 1..=32 range")]
    InvalidLabelLength(usize),
    #[error("field is not valid UTF-8")]
    InvalidUtf8,
}

/// Operational certificate payload as carried on the wire.
///
/// Real Matter NOC/ICAC/RCAC certificates are TLV-encoded X.509-like
/// structures; TLV grammar is out of scope here (spec §1 Non-goals), so this
/// crate treats the certificate as an opaque, length-prefixed byte string
/// and leaves parsing to the `CertificateCodec` collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NocStruct {
    pub cert_bytes: Vec<u8>,
}

impl NocStruct {
    pub fn new(cert_bytes: Vec<u8>) -> Self {
        Self { cert_bytes }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.cert_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.cert_bytes);
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        let len_bytes = buf.get(0..4).ok_or(WireError::Truncated)?;
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        let rest = &buf[4..];
        let cert_bytes = rest.get(0..len).ok_or(WireError::Truncated)?.to_vec();
        Ok((Self { cert_bytes }, &rest[len..]))
    }
}

/// `FabricDescriptorStruct` — the fabric-identifying fields a commissioner
/// reads back from `Fabrics` attribute entries (spec §4.1, §6.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricDescriptorStruct {
    pub root_public_key: Vec<u8>,
    pub vendor_id: u16,
    pub fabric_id: FabricId,
    pub node_id: NodeId,
    pub label: String,
    pub fabric_index: FabricIndex,
}

impl FabricDescriptorStruct {
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        if self.label.len() > u16::MAX as usize {
            return Err(WireError::InvalidLabelLength(self.label.len()));
        }

        out.extend_from_slice(&(self.root_public_key.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.root_public_key);
        out.extend_from_slice(&self.vendor_id.to_le_bytes());
        out.extend_from_slice(&self.fabric_id.to_be_bytes());
        out.extend_from_slice(&self.node_id.to_be_bytes());
        out.extend_from_slice(&(self.label.len() as u16).to_le_bytes());
        out.extend_from_slice(self.label.as_bytes());
        out.push(self.fabric_index.get());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut pos = 0usize;
        let take = |buf: &[u8], pos: &mut usize, n: usize| -> Result<&[u8], WireError> {
            let end = *pos + n;
            let slice = buf.get(*pos..end).ok_or(WireError::Truncated)?;
            *pos = end;
            Ok(slice)
        };

        let key_len = u16::from_le_bytes(take(buf, &mut pos, 2)?.try_into().unwrap()) as usize;
        let root_public_key = take(buf, &mut pos, key_len)?.to_vec();
        let vendor_id = u16::from_le_bytes(take(buf, &mut pos, 2)?.try_into().unwrap());
        let fabric_id = FabricId(u64::from_be_bytes(
            take(buf, &mut pos, 8)?.try_into().unwrap(),
        ));
        let node_id = NodeId(u64::from_be_bytes(
            take(buf, &mut pos, 8)?.try_into().unwrap(),
        ));
        let label_len = u16::from_le_bytes(take(buf, &mut pos, 2)?.try_into().unwrap()) as usize;
        let label = String::from_utf8(take(buf, &mut pos, label_len)?.to_vec())
            .map_err(|_| WireError::InvalidUtf8)?;
        let fabric_index = FabricIndex::new(*take(buf, &mut pos, 1)?.first().unwrap())
            .map_err(|_| WireError::Truncated)?;

        Ok(Self {
            root_public_key,
            vendor_id,
            fabric_id,
            node_id,
            label,
            fabric_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noc_struct_round_trips() {
        let noc = NocStruct::new(vec![1, 2, 3, 4, 5]);
        let mut buf = Vec::new();
        noc.encode(&mut buf);
        let (decoded, rest) = NocStruct::decode(&buf).unwrap();
        assert_eq!(decoded, noc);
        assert!(rest.is_empty());
    }

    #[test]
    fn fabric_descriptor_round_trips() {
        let descriptor = FabricDescriptorStruct {
            root_public_key: vec![0xAB; 65],
            vendor_id: 0xFFF1,
            fabric_id: FabricId(5),
            node_id: NodeId(1),
            label: "home".to_string(),
            fabric_index: FabricIndex::new(1).unwrap(),
        };
        let mut buf = Vec::new();
        descriptor.encode(&mut buf).unwrap();
        assert_eq!(FabricDescriptorStruct::decode(&buf).unwrap(), descriptor);
    }
}
