//! Group key sets and the scope-0 operational IPK slot (SPEC_FULL.md §3
//! items 3 and 4).
//!
//! Real Matter fabrics can carry up to four `GroupKeySet`s per fabric.
//! `GroupKeySetID` `0` is reserved for the fabric's operational IPK and is
//! installed by this crate itself (`AddNOC`/`UpdateNOC`), never by a
//! `KeySetWrite` command — which lives in the Group Key Management cluster
//! this core does not implement. Only that reserved slot, with its
//! current/previous epoch key rotation, is modeled here.

use std::collections::HashMap;
use std::sync::Mutex;

use matter_wire::FabricIndex;

use crate::crypto::SYMMETRIC_KEY_LENGTH_BYTES;

pub const IPK_GROUP_KEY_SET_ID: u16 = 0;

/// A fabric's operational IPK slot. `previous_epoch_key` is retained for the
/// overlap window so in-flight group messages encrypted under the key being
/// rotated out still decrypt (spec glossary: "IPK rotation ... retains the
/// previous epoch key until all peers are known to have the new one").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKeySet {
    pub group_key_set_id: u16,
    pub current_epoch_key: [u8; SYMMETRIC_KEY_LENGTH_BYTES],
    pub previous_epoch_key: Option<[u8; SYMMETRIC_KEY_LENGTH_BYTES]>,
}

#[derive(Default)]
pub struct GroupKeyManager {
    sets: Mutex<HashMap<FabricIndex, GroupKeySet>>,
}

impl GroupKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the initial IPK for a newly added fabric. No previous key:
    /// there is nothing to roll back to.
    pub fn install_ipk(
        &self,
        fabric_index: FabricIndex,
        ipk: [u8; SYMMETRIC_KEY_LENGTH_BYTES],
    ) {
        self.sets.lock().expect("group key lock poisoned").insert(
            fabric_index,
            GroupKeySet {
                group_key_set_id: IPK_GROUP_KEY_SET_ID,
                current_epoch_key: ipk,
                previous_epoch_key: None,
            },
        );
    }

    /// Rotates the IPK: the current key becomes the previous key, and
    /// `new_ipk` becomes current.
    pub fn rotate_ipk(&self, fabric_index: FabricIndex, new_ipk: [u8; SYMMETRIC_KEY_LENGTH_BYTES]) {
        let mut sets = self.sets.lock().expect("group key lock poisoned");
        if let Some(set) = sets.get_mut(&fabric_index) {
            set.previous_epoch_key = Some(set.current_epoch_key);
            set.current_epoch_key = new_ipk;
        } else {
            sets.insert(
                fabric_index,
                GroupKeySet {
                    group_key_set_id: IPK_GROUP_KEY_SET_ID,
                    current_epoch_key: new_ipk,
                    previous_epoch_key: None,
                },
            );
        }
    }

    pub fn operational_keys(&self, fabric_index: FabricIndex) -> Option<GroupKeySet> {
        self.sets
            .lock()
            .expect("group key lock poisoned")
            .get(&fabric_index)
            .cloned()
    }

    pub fn remove_fabric(&self, fabric_index: FabricIndex) {
        self.sets
            .lock()
            .expect("group key lock poisoned")
            .remove(&fabric_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_moves_current_to_previous() {
        let manager = GroupKeyManager::new();
        let fabric_index = FabricIndex::new(1).unwrap();
        manager.install_ipk(fabric_index, [1u8; 16]);

        manager.rotate_ipk(fabric_index, [2u8; 16]);

        let set = manager.operational_keys(fabric_index).unwrap();
        assert_eq!(set.current_epoch_key, [2u8; 16]);
        assert_eq!(set.previous_epoch_key, Some([1u8; 16]));
    }

    #[test]
    fn remove_fabric_drops_its_keys() {
        let manager = GroupKeyManager::new();
        let fabric_index = FabricIndex::new(1).unwrap();
        manager.install_ipk(fabric_index, [1u8; 16]);

        manager.remove_fabric(fabric_index);

        assert!(manager.operational_keys(fabric_index).is_none());
    }
}
