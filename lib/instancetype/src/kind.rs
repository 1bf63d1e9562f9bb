// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The four flavors of object a VM can reference, and the resolved objects
//! themselves.

use instancetype_api_types::{
    resource_names::*, InstancetypeMatcher, ObjectMeta, PreferenceMatcher,
    VirtualMachineInstancetype, VirtualMachinePreference,
};
use serde::Serialize;

/// Which object a matcher refers to.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum ObjectKind {
    #[strum(serialize = "VirtualMachineInstancetype")]
    Instancetype,
    #[strum(serialize = "VirtualMachineClusterInstancetype")]
    ClusterInstancetype,
    #[strum(serialize = "VirtualMachinePreference")]
    Preference,
    #[strum(serialize = "VirtualMachineClusterPreference")]
    ClusterPreference,
}

impl ObjectKind {
    /// The object's kind as written in its `kind` field and in revision
    /// labels, e.g. `VirtualMachineClusterInstancetype`.
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }

    /// The singular lowercase resource name, e.g.
    /// `virtualmachineclusterinstancetype`.
    pub fn resource_name(&self) -> &'static str {
        match self {
            ObjectKind::Instancetype => SINGULAR_RESOURCE_NAME,
            ObjectKind::ClusterInstancetype => CLUSTER_SINGULAR_RESOURCE_NAME,
            ObjectKind::Preference => SINGULAR_PREFERENCE_RESOURCE_NAME,
            ObjectKind::ClusterPreference => {
                CLUSTER_SINGULAR_PREFERENCE_RESOURCE_NAME
            }
        }
    }

    /// How the object family is named in user-facing messages.
    pub fn noun(&self) -> &'static str {
        match self {
            ObjectKind::Instancetype | ObjectKind::ClusterInstancetype => {
                "instance type"
            }
            ObjectKind::Preference | ObjectKind::ClusterPreference => {
                "preference"
            }
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            ObjectKind::ClusterInstancetype | ObjectKind::ClusterPreference
        )
    }

    /// Parses the `kind` of an instancetype matcher. An empty kind selects
    /// the cluster-scoped instance type; preference kinds are not accepted.
    pub fn from_instancetype_kind(kind: &str) -> Option<Self> {
        match kind {
            "" | CLUSTER_SINGULAR_RESOURCE_NAME
            | CLUSTER_PLURAL_RESOURCE_NAME => {
                Some(ObjectKind::ClusterInstancetype)
            }
            SINGULAR_RESOURCE_NAME | PLURAL_RESOURCE_NAME => {
                Some(ObjectKind::Instancetype)
            }
            _ => None,
        }
    }

    /// Parses the `kind` of a preference matcher. An empty kind selects the
    /// cluster-scoped preference; instance type kinds are not accepted.
    pub fn from_preference_kind(kind: &str) -> Option<Self> {
        match kind {
            "" | CLUSTER_SINGULAR_PREFERENCE_RESOURCE_NAME
            | CLUSTER_PLURAL_PREFERENCE_RESOURCE_NAME => {
                Some(ObjectKind::ClusterPreference)
            }
            SINGULAR_PREFERENCE_RESOURCE_NAME
            | PLURAL_PREFERENCE_RESOURCE_NAME => Some(ObjectKind::Preference),
            _ => None,
        }
    }
}

/// The VM-side reference to an instance type or preference.
pub(crate) trait Matcher {
    /// The matcher's type name, used in validation errors.
    const TYPE_NAME: &'static str;

    fn name(&self) -> &str;
    fn kind(&self) -> &str;
    fn revision_name(&self) -> &str;
    fn object_kind(&self) -> Option<ObjectKind>;

    fn is_resolved(&self) -> bool {
        !self.revision_name().is_empty()
    }
}

impl Matcher for InstancetypeMatcher {
    const TYPE_NAME: &'static str = "InstancetypeMatcher";

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn revision_name(&self) -> &str {
        &self.revision_name
    }

    fn object_kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_instancetype_kind(&self.kind)
    }
}

impl Matcher for PreferenceMatcher {
    const TYPE_NAME: &'static str = "PreferenceMatcher";

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn revision_name(&self) -> &str {
        &self.revision_name
    }

    fn object_kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_preference_kind(&self.kind)
    }
}

/// An instance type or preference resolved from a matcher.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigObject {
    Instancetype(VirtualMachineInstancetype),
    ClusterInstancetype(VirtualMachineInstancetype),
    Preference(VirtualMachinePreference),
    ClusterPreference(VirtualMachinePreference),
}

impl ConfigObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ConfigObject::Instancetype(_) => ObjectKind::Instancetype,
            ConfigObject::ClusterInstancetype(_) => {
                ObjectKind::ClusterInstancetype
            }
            ConfigObject::Preference(_) => ObjectKind::Preference,
            ConfigObject::ClusterPreference(_) => ObjectKind::ClusterPreference,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ConfigObject::Instancetype(it)
            | ConfigObject::ClusterInstancetype(it) => &it.metadata,
            ConfigObject::Preference(p) | ConfigObject::ClusterPreference(p) => {
                &p.metadata
            }
        }
    }

    /// The object's spec, encoded as JSON.
    pub fn spec_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        fn encode<S: Serialize>(
            spec: &S,
        ) -> Result<serde_json::Value, serde_json::Error> {
            serde_json::to_value(spec)
        }

        match self {
            ConfigObject::Instancetype(it)
            | ConfigObject::ClusterInstancetype(it) => encode(&it.spec),
            ConfigObject::Preference(p) | ConfigObject::ClusterPreference(p) => {
                encode(&p.spec)
            }
        }
    }
}
