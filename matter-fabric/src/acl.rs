//! Access control stub installed on `AddNOC` (SPEC_FULL.md §3 item 2).
//!
//! The parent spec scopes full access-control evaluation out of this core,
//! but `AddNOC` cannot be meaningfully tested without *an* access control
//! list existing afterwards — real Matter controllers immediately issue a
//! CASE session and start writing ACL attributes against the entry this
//! module installs. Only entry storage and the mandatory initial entry are
//! implemented; evaluating an incoming request against the list is left to
//! the cluster/interaction layer this core does not provide.

use std::collections::HashMap;
use std::sync::Mutex;

use matter_wire::FabricIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    View,
    ProxyView,
    Operate,
    Manage,
    Administer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Pase,
    Case,
    Group,
}

/// An empty target list means "all clusters on all endpoints".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AclTarget {
    pub cluster: Option<u32>,
    pub endpoint: Option<u16>,
    pub device_type: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub fabric_index: FabricIndex,
    pub privilege: Privilege,
    pub auth_mode: AuthMode,
    pub subjects: Vec<u64>,
    pub targets: Vec<AclTarget>,
}

/// Installs and removes access control entries. A concrete collaborator,
/// not a black-boxed external one — see module doc.
pub trait AclSink: Send + Sync {
    /// Installs the single mandatory entry a fresh fabric needs so its
    /// commissioner isn't immediately locked out: `Administer` over CASE,
    /// subject `case_admin_subject`, all clusters/endpoints (spec §4.3
    /// `AddNOC` step: "grants the `CaseAdminSubject` administer privilege").
    fn install_initial_entry(&self, fabric_index: FabricIndex, case_admin_subject: u64);

    fn remove_fabric(&self, fabric_index: FabricIndex);

    fn entries_for(&self, fabric_index: FabricIndex) -> Vec<AclEntry>;
}

#[derive(Default)]
pub struct AclStore {
    entries: Mutex<HashMap<FabricIndex, Vec<AclEntry>>>,
}

impl AclStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AclSink for AclStore {
    fn install_initial_entry(&self, fabric_index: FabricIndex, case_admin_subject: u64) {
        let entry = AclEntry {
            fabric_index,
            privilege: Privilege::Administer,
            auth_mode: AuthMode::Case,
            subjects: vec![case_admin_subject],
            targets: Vec::new(),
        };
        self.entries
            .lock()
            .expect("acl store lock poisoned")
            .entry(fabric_index)
            .or_default()
            .push(entry);
    }

    fn remove_fabric(&self, fabric_index: FabricIndex) {
        self.entries
            .lock()
            .expect("acl store lock poisoned")
            .remove(&fabric_index);
    }

    fn entries_for(&self, fabric_index: FabricIndex) -> Vec<AclEntry> {
        self.entries
            .lock()
            .expect("acl store lock poisoned")
            .get(&fabric_index)
            .cloned()
            .unwrap_or_default()
    }
}
