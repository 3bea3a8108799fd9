//! The fabric table (spec §4.2).
//!
//! Mirrors the teacher's `FabricConfig`: a keyed collection with explicit
//! add/get/delete operations and a separate persistence step, plus (new
//! here) an observer list for lifecycle events. Observer errors are caught
//! and logged — never allowed to block lifecycle progression (spec §7,
//! §9: "the producer catches and logs per-observer errors").

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use matter_wire::{FabricId, FabricIndex};

use crate::crypto::Crypto;
use crate::error::ManagerError;
use crate::fabric::Fabric;
use crate::storage::{fabric_scope, Storage};

pub const MAX_FABRICS: usize = FabricIndex::MAX as usize;

/// Fabric table lifecycle events (spec §4.2, §5 ordering guarantee: `added`
/// for creation; `replaced` for `UpdateNOC`; `leaving` → `deleting` →
/// `deleted` for removal).
#[derive(Debug, Clone)]
pub enum FabricEvent {
    Added(FabricIndex),
    Replaced(FabricIndex),
    Leaving(FabricIndex),
    Deleting(FabricIndex),
    Deleted(FabricIndex),
    FailsafeClosed,
}

type Observer = Box<dyn Fn(&FabricEvent) -> anyhow::Result<()> + Send + Sync>;

/// The table of commissioned fabrics, indexed by [`FabricIndex`].
pub struct FabricManager {
    fabrics: RwLock<BTreeMap<FabricIndex, Arc<Fabric>>>,
    next_index: RwLock<FabricIndex>,
    storage: Arc<dyn Storage>,
    observers: RwLock<Vec<Observer>>,
}

impl FabricManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            fabrics: RwLock::new(BTreeMap::new()),
            next_index: RwLock::new(FabricIndex::new(1).expect("1 is a valid FabricIndex")),
            storage,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&FabricEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .write()
            .expect("observer list lock poisoned")
            .push(Box::new(observer));
    }

    fn notify(&self, event: FabricEvent) {
        for observer in self.observers.read().expect("observer list lock poisoned").iter() {
            if let Err(err) = observer(&event) {
                tracing::error!(?event, error = %err, "fabric event observer failed");
            }
        }
    }

    /// Next free index in 1..254, wrapping at 254→1, skipping in-use
    /// indices (spec §4.2).
    pub fn allocate_fabric_index(&self) -> Result<FabricIndex, ManagerError> {
        let fabrics = self.fabrics.read().expect("fabric table lock poisoned");
        if fabrics.len() >= MAX_FABRICS {
            return Err(ManagerError::TableFull);
        }

        let mut next = self.next_index.write().expect("next index lock poisoned");
        let start = *next;
        loop {
            let candidate = *next;
            *next = next.wrapping_next();
            if !fabrics.contains_key(&candidate) {
                return Ok(candidate);
            }
            if *next == start {
                return Err(ManagerError::TableFull);
            }
        }
    }

    /// Inserts a freshly-built fabric. Fails with `Conflict` if its index is
    /// already present.
    pub fn add_fabric(&self, fabric: Arc<Fabric>) -> Result<(), ManagerError> {
        let index = fabric.fabric_index();
        {
            let mut fabrics = self.fabrics.write().expect("fabric table lock poisoned");
            if fabrics.contains_key(&index) {
                return Err(ManagerError::Conflict(index));
            }
            fabrics.insert(index, fabric);
        }
        self.notify(FabricEvent::Added(index));
        Ok(())
    }

    /// Overwrites an entry with the same index (used for `UpdateNOC`).
    /// Identity (`Arc::ptr_eq`) is a no-op.
    pub fn replace_fabric(&self, fabric: Arc<Fabric>) -> Result<(), ManagerError> {
        let index = fabric.fabric_index();
        {
            let mut fabrics = self.fabrics.write().expect("fabric table lock poisoned");
            match fabrics.get(&index) {
                Some(existing) if Arc::ptr_eq(existing, &fabric) => return Ok(()),
                Some(_) => {
                    fabrics.insert(index, fabric);
                }
                None => return Err(ManagerError::NotFound),
            }
        }
        self.notify(FabricEvent::Replaced(index));
        Ok(())
    }

    /// Lookup by [`FabricIndex`]; excludes fabrics marked `isDeleting`.
    pub fn for_index(&self, index: FabricIndex) -> Result<Arc<Fabric>, ManagerError> {
        self.maybe_for_index(index).ok_or(ManagerError::NotFound)
    }

    pub fn maybe_for_index(&self, index: FabricIndex) -> Option<Arc<Fabric>> {
        let fabrics = self.fabrics.read().expect("fabric table lock poisoned");
        fabrics
            .get(&index)
            .filter(|fabric| !fabric.is_deleting())
            .cloned()
    }

    pub fn for_global_id(&self, global_id: u64) -> Result<Arc<Fabric>, ManagerError> {
        let fabrics = self.fabrics.read().expect("fabric table lock poisoned");
        fabrics
            .values()
            .find(|fabric| fabric.global_id() == global_id && !fabric.is_deleting())
            .cloned()
            .ok_or(ManagerError::NotFound)
    }

    /// Iterates fabrics; for each, computes its destination IDs and returns
    /// the match (spec §4.2). Fails with `NotFound` if no match or the
    /// matched fabric is deleting.
    pub fn find_fabric_from_destination_id(
        &self,
        crypto: &dyn Crypto,
        group_keys: &crate::group::GroupKeyManager,
        destination_id: &[u8],
        random: &[u8],
    ) -> Result<Arc<Fabric>, ManagerError> {
        let fabrics = self.fabrics.read().expect("fabric table lock poisoned");
        for fabric in fabrics.values() {
            if fabric.is_deleting() {
                continue;
            }
            let candidates = fabric.destination_ids_for(crypto, group_keys, fabric.node_id(), random);
            if candidates.iter().any(|candidate| candidate.as_slice() == destination_id) {
                return Ok(Arc::clone(fabric));
            }
        }
        Err(ManagerError::NotFound)
    }

    pub fn find_by_keypair(&self, public_key: &[u8], private_key: &[u8]) -> Option<Arc<Fabric>> {
        self.fabrics
            .read()
            .expect("fabric table lock poisoned")
            .values()
            .find(|fabric| !fabric.is_deleting() && fabric.matches_keypair(public_key, private_key))
            .cloned()
    }

    pub fn for_descriptor(&self, fabric_id: FabricId, root_public_key: &[u8]) -> Option<Arc<Fabric>> {
        self.fabrics
            .read()
            .expect("fabric table lock poisoned")
            .values()
            .find(|fabric| {
                !fabric.is_deleting()
                    && fabric.matches_fabric_id_and_root_public_key(fabric_id, root_public_key)
            })
            .cloned()
    }

    pub fn commissioned_fabrics(&self) -> usize {
        self.fabrics
            .read()
            .expect("fabric table lock poisoned")
            .values()
            .filter(|fabric| !fabric.is_deleting())
            .count()
    }

    pub fn is_last_remaining(&self, index: FabricIndex) -> bool {
        let fabrics = self.fabrics.read().expect("fabric table lock poisoned");
        fabrics.len() == 1 && fabrics.contains_key(&index)
    }

    /// Graceful removal: emits `leaving`, then `deleting`, flushes the
    /// fabric's storage scope, then emits `deleted` (spec §3, §5).
    pub fn leave(&self, index: FabricIndex) -> Result<(), ManagerError> {
        self.notify(FabricEvent::Leaving(index));
        self.remove(index)
    }

    /// Forceful removal: skips the `leaving` step (spec §3: `delete()` is
    /// the forceful counterpart to `leave()`).
    pub fn delete(&self, index: FabricIndex) -> Result<(), ManagerError> {
        self.remove(index)
    }

    fn remove(&self, index: FabricIndex) -> Result<(), ManagerError> {
        let fabric = {
            let mut fabrics = self.fabrics.write().expect("fabric table lock poisoned");
            fabrics.remove(&index).ok_or(ManagerError::NotFound)?
        };
        fabric.mark_deleting();
        self.notify(FabricEvent::Deleting(index));
        self.storage.remove_scope(&fabric_scope(index));
        self.notify(FabricEvent::Deleted(index));
        Ok(())
    }

    /// Snapshots all non-deleting fabrics and `nextFabricIndex` into storage
    /// (spec §4.2, §6.5). Credential bytes are opaque to this core; callers
    /// persisting a real fabric table serialize through `CertificateCodec`.
    pub fn persist_fabrics(&self) {
        let fabrics = self.fabrics.read().expect("fabric table lock poisoned");
        let indices: Vec<u8> = fabrics.keys().map(|index| index.get()).collect();
        self.storage.write("fabrics", "indices", indices);
        let next = self.next_index.read().expect("next index lock poisoned");
        self.storage.write("fabrics", "next-index", vec![next.get()]);
    }

    /// Discards all fabrics and storage (spec §4.2).
    pub fn clear(&self) {
        let indices: Vec<FabricIndex> = {
            let mut fabrics = self.fabrics.write().expect("fabric table lock poisoned");
            let indices = fabrics.keys().copied().collect();
            fabrics.clear();
            indices
        };
        for index in indices {
            self.storage.remove_scope(&fabric_scope(index));
        }
        self.storage.remove_scope("fabrics");
        self.notify(FabricEvent::FailsafeClosed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::tests_support::build_test_fabric;
    use crate::storage::MemoryStorage;
    use matter_wire::NodeId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn allocate_fabric_index_skips_occupied_slots() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let first = manager.allocate_fabric_index().unwrap();
        let fabric = build_test_fabric(first, FabricId(1), NodeId(1));
        manager.add_fabric(fabric).unwrap();

        let second = manager.allocate_fabric_index().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn add_fabric_rejects_duplicate_index() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let index = FabricIndex::new(1).unwrap();
        let fabric = build_test_fabric(index, FabricId(1), NodeId(1));
        manager.add_fabric(fabric.clone()).unwrap();

        assert_eq!(manager.add_fabric(fabric), Err(ManagerError::Conflict(index)));
    }

    #[test]
    fn observer_error_does_not_prevent_other_observers_running() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        manager.subscribe(|_event| anyhow::bail!("boom"));
        let calls_clone = Arc::clone(&calls);
        manager.subscribe(move |_event| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let fabric = build_test_fabric(FabricIndex::new(1).unwrap(), FabricId(1), NodeId(1));
        manager.add_fabric(fabric).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_fabric_is_excluded_from_lookups() {
        let manager = FabricManager::new(Arc::new(MemoryStorage::new()));
        let index = FabricIndex::new(1).unwrap();
        let fabric = build_test_fabric(index, FabricId(1), NodeId(1));
        manager.add_fabric(fabric).unwrap();

        manager.delete(index).unwrap();

        assert!(manager.maybe_for_index(index).is_none());
    }
}
