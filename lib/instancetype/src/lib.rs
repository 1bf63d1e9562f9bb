// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of VirtualMachine instance type and preference references to
//! immutable ControllerRevisions.
//!
//! A VM names an instance type (and optionally a preference) through a
//! matcher. The first time the VM is reconciled, [`store::RevisionStore`]
//! snapshots the referenced object into a ControllerRevision and records the
//! revision's name in the matcher, so that later edits to the object do not
//! change the VM.

pub mod client;
pub mod conflict;
pub mod kind;
pub mod memory;
pub mod patch;
pub mod revision;
pub mod store;

pub use client::{ClientError, ObjectCache, SharedObjectCache};
pub use conflict::{Conflict, ConflictRegistry, Conflicts, UnknownIgnorePaths};
pub use kind::{ConfigObject, ObjectKind};
pub use memory::InMemoryCluster;
pub use revision::{revision_name, RevisionError};
pub use store::{ConfigError, ObjectCaches, RevisionStore, StoreError};
