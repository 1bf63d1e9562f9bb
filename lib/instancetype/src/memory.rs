// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A self-contained, in-memory stand-in for the cluster API.
//!
//! [`InMemoryCluster`] implements every client trait the revision store
//! consumes. It keeps objects in maps behind a single lock, enforces
//! create-once semantics for revisions, and applies JSON patches to stored
//! VirtualMachines atomically: either every operation of a patch succeeds or
//! the VM is left untouched.

use std::collections::BTreeMap;
use std::sync::Mutex;

use instancetype_api_types::{
    ControllerRevision, VirtualMachine, VirtualMachineInstancetype,
    VirtualMachinePreference,
};
use json_patch::{Patch, PatchOperation};
use serde_json::Value;

use crate::client::{
    ClientError, ConfigObjectReader, HasMetadata, PatchType, RevisionClient,
    VirtualMachinePatcher,
};

type Key = (String, String);

fn key_of<T: HasMetadata>(object: &T) -> Key {
    let meta = object.metadata();
    (meta.namespace_or_default().to_owned(), meta.name.clone())
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_owned(), name.to_owned())
}

#[derive(Default)]
struct State {
    instancetypes: BTreeMap<Key, VirtualMachineInstancetype>,
    cluster_instancetypes: BTreeMap<String, VirtualMachineInstancetype>,
    preferences: BTreeMap<Key, VirtualMachinePreference>,
    cluster_preferences: BTreeMap<String, VirtualMachinePreference>,
    revisions: BTreeMap<Key, ControllerRevision>,
    vms: BTreeMap<Key, VirtualMachine>,

    created: Vec<Key>,
    patches: Vec<Vec<u8>>,
}

/// An in-memory cluster. See the module documentation.
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instancetype(&self, instancetype: VirtualMachineInstancetype) {
        let k = key_of(&instancetype);
        self.state.lock().unwrap().instancetypes.insert(k, instancetype);
    }

    pub fn add_cluster_instancetype(
        &self,
        mut instancetype: VirtualMachineInstancetype,
    ) {
        instancetype.metadata.namespace = None;
        let name = instancetype.metadata.name.clone();
        self.state
            .lock()
            .unwrap()
            .cluster_instancetypes
            .insert(name, instancetype);
    }

    pub fn add_preference(&self, preference: VirtualMachinePreference) {
        let k = key_of(&preference);
        self.state.lock().unwrap().preferences.insert(k, preference);
    }

    pub fn add_cluster_preference(
        &self,
        mut preference: VirtualMachinePreference,
    ) {
        preference.metadata.namespace = None;
        let name = preference.metadata.name.clone();
        self.state
            .lock()
            .unwrap()
            .cluster_preferences
            .insert(name, preference);
    }

    /// Seeds a revision without recording it as created.
    pub fn add_revision(&self, revision: ControllerRevision) {
        let k = key_of(&revision);
        self.state.lock().unwrap().revisions.insert(k, revision);
    }

    pub fn add_vm(&self, vm: VirtualMachine) {
        let k = key_of(&vm);
        self.state.lock().unwrap().vms.insert(k, vm);
    }

    /// The stored copy of a VM, reflecting every patch applied to it.
    pub fn vm(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        self.state.lock().unwrap().vms.get(&key(namespace, name)).cloned()
    }

    pub fn revision(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<ControllerRevision> {
        self.state.lock().unwrap().revisions.get(&key(namespace, name)).cloned()
    }

    /// Revisions created through [`RevisionClient::create`], in creation
    /// order.
    pub fn created_revisions(&self) -> Vec<ControllerRevision> {
        let state = self.state.lock().unwrap();
        state
            .created
            .iter()
            .filter_map(|k| state.revisions.get(k).cloned())
            .collect()
    }

    /// Every patch document successfully applied, in order.
    pub fn patches(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().patches.clone()
    }
}

impl ConfigObjectReader for InMemoryCluster {
    fn get_instancetype(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachineInstancetype, ClientError> {
        self.state
            .lock()
            .unwrap()
            .instancetypes
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                ClientError::not_found("VirtualMachineInstancetype", name)
            })
    }

    fn get_cluster_instancetype(
        &self,
        name: &str,
    ) -> Result<VirtualMachineInstancetype, ClientError> {
        self.state
            .lock()
            .unwrap()
            .cluster_instancetypes
            .get(name)
            .cloned()
            .ok_or_else(|| {
                ClientError::not_found("VirtualMachineClusterInstancetype", name)
            })
    }

    fn get_preference(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachinePreference, ClientError> {
        self.state
            .lock()
            .unwrap()
            .preferences
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                ClientError::not_found("VirtualMachinePreference", name)
            })
    }

    fn get_cluster_preference(
        &self,
        name: &str,
    ) -> Result<VirtualMachinePreference, ClientError> {
        self.state
            .lock()
            .unwrap()
            .cluster_preferences
            .get(name)
            .cloned()
            .ok_or_else(|| {
                ClientError::not_found("VirtualMachineClusterPreference", name)
            })
    }
}

impl RevisionClient for InMemoryCluster {
    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ControllerRevision, ClientError> {
        self.revision(namespace, name)
            .ok_or_else(|| ClientError::not_found("ControllerRevision", name))
    }

    fn create(
        &self,
        revision: &ControllerRevision,
    ) -> Result<ControllerRevision, ClientError> {
        let meta = &revision.metadata;
        let Some(namespace) = meta.namespace.as_deref() else {
            return Err(ClientError::Invalid(format!(
                "ControllerRevision {} has no namespace",
                meta.name
            )));
        };
        if meta.name.is_empty() {
            return Err(ClientError::Invalid(
                "ControllerRevision has no name".to_owned(),
            ));
        }

        let mut state = self.state.lock().unwrap();
        let k = key(namespace, &meta.name);
        if state.revisions.contains_key(&k) {
            return Err(ClientError::already_exists(
                "ControllerRevision",
                meta.name.clone(),
            ));
        }
        state.revisions.insert(k.clone(), revision.clone());
        state.created.push(k);
        Ok(revision.clone())
    }
}

impl VirtualMachinePatcher for InMemoryCluster {
    fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch_type: PatchType,
        patch: &[u8],
    ) -> Result<(), ClientError> {
        let PatchType::Json = patch_type;
        let ops: Patch = serde_json::from_slice(patch)
            .map_err(|e| ClientError::Invalid(format!("bad patch: {e}")))?;

        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        let vm = state
            .vms
            .get(&k)
            .ok_or_else(|| ClientError::not_found("VirtualMachine", name))?;

        let mut doc = serde_json::to_value(vm)
            .map_err(|e| ClientError::Internal(e.to_string()))?;
        apply_patch(&mut doc, &ops)?;
        let patched: VirtualMachine = serde_json::from_value(doc)
            .map_err(|e| ClientError::Invalid(format!("patched VM: {e}")))?;

        state.vms.insert(k, patched);
        state.patches.push(patch.to_vec());
        Ok(())
    }
}

/// Applies `patch` to `doc` in order.
///
/// A `test` for `null` against a missing member passes, as it does on the
/// API server, where unset optional fields are omitted from the stored
/// object. Every other operation follows RFC 6902. On error `doc` may be
/// partially patched.
fn apply_patch(doc: &mut Value, patch: &Patch) -> Result<(), ClientError> {
    for op in &patch.0 {
        if let PatchOperation::Test(test) = op {
            if test.value.is_null() && doc.pointer(&test.path).is_none() {
                continue;
            }
        }
        json_patch::patch(doc, std::slice::from_ref(op))
            .map_err(|e| ClientError::Invalid(e.to_string()))?;
    }
    Ok(())
}
