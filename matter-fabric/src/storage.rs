//! The `Storage` collaborator (spec §1, §4.2, §6.5).
//!
//! Persistence is scoped: a single `fabrics` scope holds the fabric table
//! snapshot plus `nextFabricIndex`, and each fabric owns a `fabric-<index>`
//! scope for its own data (ACL, groups — owned by other components, but
//! wiped wholesale on `RemoveFabric`/`delete()`).

use std::collections::HashMap;
use std::sync::Mutex;

/// Durable key/value storage, scoped by a caller-chosen namespace.
pub trait Storage: Send + Sync {
    fn read(&self, scope: &str, key: &str) -> Option<Vec<u8>>;
    fn write(&self, scope: &str, key: &str, value: Vec<u8>);
    fn remove(&self, scope: &str, key: &str);
    /// Removes every key under `scope` (spec §8 invariant 4: `RemoveFabric`
    /// must erase all of `fabric-<removed-index>/*`).
    fn remove_scope(&self, scope: &str);
}

/// A `fabric-<index>` scope name, per spec §4.2/§6.5.
pub fn fabric_scope(index: matter_wire::FabricIndex) -> String {
    format!("fabric-{}", index.get())
}

/// In-memory [`Storage`] for tests and for hosts that do not need the fabric
/// table to survive a restart.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, scope: &str, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .expect("storage lock poisoned")
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
    }

    fn write(&self, scope: &str, key: &str, value: Vec<u8>) {
        self.entries
            .lock()
            .expect("storage lock poisoned")
            .insert((scope.to_string(), key.to_string()), value);
    }

    fn remove(&self, scope: &str, key: &str) {
        self.entries
            .lock()
            .expect("storage lock poisoned")
            .remove(&(scope.to_string(), key.to_string()));
    }

    fn remove_scope(&self, scope: &str) {
        self.entries
            .lock()
            .expect("storage lock poisoned")
            .retain(|(s, _), _| s != scope);
    }
}
