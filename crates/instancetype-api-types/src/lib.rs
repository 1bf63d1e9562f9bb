// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions for the objects the instancetype revision store reads and
//! writes.
//!
//! This crate carries only data: virtual machines and their matchers, the
//! instance type and preference objects they reference, and the
//! ControllerRevision snapshots that pin a VM to one version of such an
//! object. Field names follow the cluster API's camelCase JSON encoding so
//! objects can be exchanged with other components verbatim.

pub mod instancetype;
pub mod meta;
pub mod preference;
pub mod resource;
pub mod revision;
pub mod virtual_machine;

pub use instancetype::{VirtualMachineInstancetype, VirtualMachineInstancetypeSpec};
pub use meta::ObjectMeta;
pub use preference::{VirtualMachinePreference, VirtualMachinePreferenceSpec};
pub use resource::Quantity;
pub use revision::ControllerRevision;
pub use virtual_machine::{InstancetypeMatcher, PreferenceMatcher, VirtualMachine};

/// The API group that instance types and preferences belong to.
pub const GROUP_NAME: &str = "instancetype.kubevirt.io";

/// The API version of instance type and preference objects captured in
/// revisions.
pub const API_VERSION: &str = "instancetype.kubevirt.io/v1beta1";

/// Resource names accepted in a matcher's `kind` field.
pub mod resource_names {
    pub const SINGULAR_RESOURCE_NAME: &str = "virtualmachineinstancetype";
    pub const PLURAL_RESOURCE_NAME: &str = "virtualmachineinstancetypes";
    pub const CLUSTER_SINGULAR_RESOURCE_NAME: &str =
        "virtualmachineclusterinstancetype";
    pub const CLUSTER_PLURAL_RESOURCE_NAME: &str =
        "virtualmachineclusterinstancetypes";

    pub const SINGULAR_PREFERENCE_RESOURCE_NAME: &str =
        "virtualmachinepreference";
    pub const PLURAL_PREFERENCE_RESOURCE_NAME: &str =
        "virtualmachinepreferences";
    pub const CLUSTER_SINGULAR_PREFERENCE_RESOURCE_NAME: &str =
        "virtualmachineclusterpreference";
    pub const CLUSTER_PLURAL_PREFERENCE_RESOURCE_NAME: &str =
        "virtualmachineclusterpreferences";
}

/// Label keys attached to every ControllerRevision created by the store.
/// They record the identity of the captured object so revisions can be found
/// (and collected) without decoding their payloads.
pub mod labels {
    pub const OBJECT_KIND: &str = "instancetype.kubevirt.io/object-kind";
    pub const OBJECT_NAME: &str = "instancetype.kubevirt.io/object-name";
    pub const OBJECT_UID: &str = "instancetype.kubevirt.io/object-uid";
    pub const OBJECT_GENERATION: &str =
        "instancetype.kubevirt.io/object-generation";
    pub const OBJECT_VERSION: &str = "instancetype.kubevirt.io/object-version";
}
