// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the collaborators the revision store reads from and writes
//! to.
//!
//! The store never talks to the cluster directly. Object lookups go through
//! an [`ObjectCache`] first and fall back to a [`ConfigObjectReader`];
//! revisions are read and created through a [`RevisionClient`]; the outcome
//! is persisted through a [`VirtualMachinePatcher`]. These are abstracted
//! into traits so that tests (and the in-memory cluster in
//! [`crate::memory`]) can stand in for a real API server.

use std::collections::BTreeMap;
use std::sync::RwLock;

use instancetype_api_types::{
    ControllerRevision, ObjectMeta, VirtualMachine, VirtualMachineInstancetype,
    VirtualMachinePreference,
};
use thiserror::Error;

/// Errors reported by a collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { kind: kind.into(), name: name.into() }
    }

    pub fn already_exists(
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists { kind: kind.into(), name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// The encoding of a patch document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchType {
    /// An RFC 6902 JSON Patch.
    Json,
}

impl PatchType {
    pub fn content_type(&self) -> &'static str {
        match self {
            PatchType::Json => "application/json-patch+json",
        }
    }
}

/// Objects that carry [`ObjectMeta`].
pub trait HasMetadata {
    fn metadata(&self) -> &ObjectMeta;
}

impl HasMetadata for VirtualMachineInstancetype {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HasMetadata for VirtualMachinePreference {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HasMetadata for ControllerRevision {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HasMetadata for VirtualMachine {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

/// A local, read-mostly view of one kind of object, kept up to date by a
/// watcher outside this crate. Lookups never block waiting for the view to
/// fill; a miss is simply `None`.
pub trait ObjectCache<T>: Send + Sync {
    /// Looks up an object by namespace (`None` for cluster-scoped objects)
    /// and name.
    fn get(&self, namespace: Option<&str>, name: &str) -> Option<T>;
}

/// An [`ObjectCache`] backed by a map behind a reader-writer lock.
#[derive(Debug)]
pub struct SharedObjectCache<T> {
    objects: RwLock<BTreeMap<(String, String), T>>,
}

impl<T> Default for SharedObjectCache<T> {
    fn default() -> Self {
        Self { objects: RwLock::new(BTreeMap::new()) }
    }
}

impl<T: HasMetadata + Clone> SharedObjectCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: Option<&str>, name: &str) -> (String, String) {
        (namespace.unwrap_or("").to_owned(), name.to_owned())
    }

    /// Inserts or replaces an object, keyed by its own metadata.
    pub fn add(&self, object: T) {
        let meta = object.metadata();
        let key = Self::key(meta.namespace.as_deref(), &meta.name);
        self.objects.write().unwrap().insert(key, object);
    }

    pub fn delete(&self, namespace: Option<&str>, name: &str) -> Option<T> {
        self.objects.write().unwrap().remove(&Self::key(namespace, name))
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: HasMetadata + Clone + Send + Sync> ObjectCache<T>
    for SharedObjectCache<T>
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Option<T> {
        self.objects.read().unwrap().get(&Self::key(namespace, name)).cloned()
    }
}

/// Direct reads of instance types and preferences, used when the local cache
/// misses.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigObjectReader: Send + Sync {
    fn get_instancetype(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachineInstancetype, ClientError>;

    fn get_cluster_instancetype(
        &self,
        name: &str,
    ) -> Result<VirtualMachineInstancetype, ClientError>;

    fn get_preference(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachinePreference, ClientError>;

    fn get_cluster_preference(
        &self,
        name: &str,
    ) -> Result<VirtualMachinePreference, ClientError>;
}

/// Reads and creates ControllerRevisions. There is deliberately no update or
/// delete: revisions are immutable once created.
#[cfg_attr(test, mockall::automock)]
pub trait RevisionClient: Send + Sync {
    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ControllerRevision, ClientError>;

    /// Creates a revision. Fails with [`ClientError::AlreadyExists`] if a
    /// revision with the same namespace and name exists.
    fn create(
        &self,
        revision: &ControllerRevision,
    ) -> Result<ControllerRevision, ClientError>;
}

/// Applies patches to stored VirtualMachines.
#[cfg_attr(test, mockall::automock)]
pub trait VirtualMachinePatcher: Send + Sync {
    fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch_type: PatchType,
        patch: &[u8],
    ) -> Result<(), ClientError>;
}
