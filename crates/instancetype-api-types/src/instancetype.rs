// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance types: reusable descriptions of virtual hardware sizing.
//!
//! The same object shape is used for namespaced
//! (`VirtualMachineInstancetype`) and cluster-scoped
//! (`VirtualMachineClusterInstancetype`) instance types; cluster-scoped ones
//! simply carry no namespace.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::meta::ObjectMeta;
use crate::resource::Quantity;
use crate::virtual_machine::{
    Gpu, HostDevice, Hugepages, IoThreadsPolicy, LaunchSecurity, Numa,
    Realtime,
};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstancetype {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineInstancetypeSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstancetypeSpec {
    pub cpu: CpuInstancetype,

    pub memory: MemoryInstancetype,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<Gpu>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_devices: Vec<HostDevice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_threads_policy: Option<IoThreadsPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_security: Option<LaunchSecurity>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Fields not modelled above, kept so that a revision captures the
    /// whole spec.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// CPU resources provided by an instance type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuInstancetype {
    /// The number of vCPUs exposed to the guest. Always set; an instance
    /// type therefore governs the guest's CPU topology and CPU resources.
    pub guest: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(
        default,
        rename = "dedicatedCPUPlacement",
        skip_serializing_if = "Option::is_none"
    )]
    pub dedicated_cpu_placement: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolate_emulator_thread: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numa: Option<Numa>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<Realtime>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Memory resources provided by an instance type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInstancetype {
    /// The amount of guest memory. Always set.
    pub guest: Quantity,

    /// Upper bound for guest memory hotplug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_guest: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hugepages: Option<Hugepages>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overcommit_percent: Option<u8>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
