// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detection of VM template fields that an instance type or preference would
//! also set.
//!
//! An instance type is authoritative for the fields it provides: a VM that
//! references one may not also set those fields itself. Which fields an
//! object governs, and how to tell whether a VM template sets them, is
//! described by a [`ConflictRegistry`] of [`Rule`]s. Rules are evaluated in
//! registration order, so the reported [`Conflicts`] are stable for identical
//! inputs.

use std::fmt;

use instancetype_api_types::{
    resource::{RESOURCE_CPU, RESOURCE_MEMORY},
    virtual_machine::{Cpu, VirtualMachineInstanceSpec},
    VirtualMachine, VirtualMachineInstancetypeSpec,
    VirtualMachinePreferenceSpec,
};
use instancetype_config_toml::ConflictConfig;
use thiserror::Error;

use crate::kind::ConfigObject;

/// Path segments leading from a VM to its template's instance spec. Every
/// rule path is relative to this prefix.
const TEMPLATE_SPEC_PREFIX: [&str; 3] = ["spec", "template", "spec"];

/// The location of a single conflicting field, as a list of path segments
/// starting at the VM root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Conflict {
    path: Vec<String>,
}

impl Conflict {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { path: segments.into_iter().map(Into::into).collect() }
    }

    /// A conflict at `rel` below the VM template's instance spec.
    fn in_template(rel: &[&str]) -> Self {
        Self::new(TEMPLATE_SPEC_PREFIX.iter().chain(rel.iter()).copied())
    }

    pub fn segments(&self) -> &[String] {
        &self.path
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join("."))
    }
}

/// An ordered set of conflicts. Empty means no conflict.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conflicts(Vec<Conflict>);

impl Conflicts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a conflict unless an equal one is already present.
    pub fn push(&mut self, conflict: Conflict) {
        if !self.0.contains(&conflict) {
            self.0.push(conflict);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conflict> {
        self.0.iter()
    }
}

impl FromIterator<Conflict> for Conflicts {
    fn from_iter<I: IntoIterator<Item = Conflict>>(iter: I) -> Self {
        let mut conflicts = Conflicts::new();
        for conflict in iter {
            conflicts.push(conflict);
        }
        conflicts
    }
}

impl fmt::Display for Conflicts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&paths.join(", "))
    }
}

impl std::error::Error for Conflicts {}

/// One governed field.
///
/// `governs` decides whether the object sets the field at all; `is_set`
/// decides whether the VM template sets it explicitly. A conflict is
/// reported when both hold.
#[derive(Clone, Debug)]
pub struct Rule<S> {
    path: &'static [&'static str],
    governs: fn(&S) -> bool,
    is_set: fn(&VirtualMachineInstanceSpec) -> bool,
}

impl<S> Rule<S> {
    /// Creates a rule for the field at `path`, relative to
    /// `spec.template.spec`.
    pub const fn new(
        path: &'static [&'static str],
        governs: fn(&S) -> bool,
        is_set: fn(&VirtualMachineInstanceSpec) -> bool,
    ) -> Self {
        Self { path, governs, is_set }
    }

    /// The rule's full dot-joined path, starting at the VM root.
    pub fn full_path(&self) -> String {
        Conflict::in_template(self.path).to_string()
    }

    fn check(
        &self,
        spec: &S,
        template: &VirtualMachineInstanceSpec,
        out: &mut Conflicts,
    ) {
        if (self.governs)(spec) && (self.is_set)(template) {
            out.push(Conflict::in_template(self.path));
        }
    }
}

fn always<S>(_: &S) -> bool {
    true
}

/// The instance type rules, in evaluation order.
fn default_instancetype_rules() -> Vec<Rule<VirtualMachineInstancetypeSpec>> {
    type It = VirtualMachineInstancetypeSpec;
    type Vmi = VirtualMachineInstanceSpec;

    fn cpu<T: Default>(vmi: &Vmi, f: impl FnOnce(&Cpu) -> T) -> T {
        vmi.domain.cpu.as_ref().map(f).unwrap_or_default()
    }

    vec![
        Rule::new(&["domain", "cpu", "sockets"], always::<It>, |vmi: &Vmi| {
            cpu(vmi, |c| c.sockets != 0)
        }),
        Rule::new(&["domain", "cpu", "cores"], always::<It>, |vmi: &Vmi| {
            cpu(vmi, |c| c.cores != 0)
        }),
        Rule::new(&["domain", "cpu", "threads"], always::<It>, |vmi: &Vmi| {
            cpu(vmi, |c| c.threads != 0)
        }),
        Rule::new(
            &["domain", "cpu", "model"],
            |it: &It| it.cpu.model.is_some(),
            |vmi: &Vmi| cpu(vmi, |c| !c.model.is_empty()),
        ),
        Rule::new(
            &["domain", "cpu", "dedicatedCpuPlacement"],
            |it: &It| it.cpu.dedicated_cpu_placement.is_some(),
            |vmi: &Vmi| cpu(vmi, |c| c.dedicated_cpu_placement),
        ),
        Rule::new(
            &["domain", "cpu", "isolateEmulatorThread"],
            |it: &It| it.cpu.isolate_emulator_thread.is_some(),
            |vmi: &Vmi| cpu(vmi, |c| c.isolate_emulator_thread),
        ),
        Rule::new(
            &["domain", "cpu", "numa"],
            |it: &It| it.cpu.numa.is_some(),
            |vmi: &Vmi| cpu(vmi, |c| c.numa.is_some()),
        ),
        Rule::new(
            &["domain", "cpu", "realtime"],
            |it: &It| it.cpu.realtime.is_some(),
            |vmi: &Vmi| cpu(vmi, |c| c.realtime.is_some()),
        ),
        Rule::new(
            &["domain", "resources", "requests", RESOURCE_CPU],
            always::<It>,
            |vmi: &Vmi| vmi.domain.resources.requests.contains_key(RESOURCE_CPU),
        ),
        Rule::new(
            &["domain", "resources", "limits", RESOURCE_CPU],
            always::<It>,
            |vmi: &Vmi| vmi.domain.resources.limits.contains_key(RESOURCE_CPU),
        ),
        Rule::new(&["domain", "memory", "guest"], always::<It>, |vmi: &Vmi| {
            vmi.domain.memory.as_ref().is_some_and(|m| m.guest.is_some())
        }),
        Rule::new(
            &["domain", "memory", "hugepages"],
            |it: &It| it.memory.hugepages.is_some(),
            |vmi: &Vmi| {
                vmi.domain.memory.as_ref().is_some_and(|m| m.hugepages.is_some())
            },
        ),
        Rule::new(
            &["domain", "resources", "requests", RESOURCE_MEMORY],
            always::<It>,
            |vmi: &Vmi| {
                vmi.domain.resources.requests.contains_key(RESOURCE_MEMORY)
            },
        ),
        Rule::new(
            &["domain", "resources", "limits", RESOURCE_MEMORY],
            always::<It>,
            |vmi: &Vmi| vmi.domain.resources.limits.contains_key(RESOURCE_MEMORY),
        ),
        Rule::new(
            &["domain", "ioThreadsPolicy"],
            |it: &It| it.io_threads_policy.is_some(),
            |vmi: &Vmi| vmi.domain.io_threads_policy.is_some(),
        ),
        Rule::new(
            &["domain", "launchSecurity"],
            |it: &It| it.launch_security.is_some(),
            |vmi: &Vmi| vmi.domain.launch_security.is_some(),
        ),
        Rule::new(
            &["domain", "devices", "gpus"],
            |it: &It| !it.gpus.is_empty(),
            |vmi: &Vmi| !vmi.domain.devices.gpus.is_empty(),
        ),
        Rule::new(
            &["domain", "devices", "hostDevices"],
            |it: &It| !it.host_devices.is_empty(),
            |vmi: &Vmi| !vmi.domain.devices.host_devices.is_empty(),
        ),
        Rule::new(
            &["nodeSelector"],
            |it: &It| !it.node_selector.is_empty(),
            |vmi: &Vmi| !vmi.node_selector.is_empty(),
        ),
        Rule::new(
            &["schedulerName"],
            |it: &It| it.scheduler_name.is_some(),
            |vmi: &Vmi| !vmi.scheduler_name.is_empty(),
        ),
    ]
}

/// Ignored conflict paths that name no registered rule.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("ignored conflict path(s) match no rule: {}", .0.join(", "))]
pub struct UnknownIgnorePaths(pub Vec<String>);

/// The governed fields of instance types and preferences.
///
/// The default registry holds the instance type rules and no preference
/// rules: preferences only fill in fields a VM leaves unset, so they never
/// conflict unless an embedder registers rules for them.
#[derive(Clone, Debug)]
pub struct ConflictRegistry {
    instancetype: Vec<Rule<VirtualMachineInstancetypeSpec>>,
    preference: Vec<Rule<VirtualMachinePreferenceSpec>>,
}

impl Default for ConflictRegistry {
    fn default() -> Self {
        Self {
            instancetype: default_instancetype_rules(),
            preference: Vec::new(),
        }
    }
}

impl ConflictRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with no rules at all.
    pub fn empty() -> Self {
        Self { instancetype: Vec::new(), preference: Vec::new() }
    }

    /// The default registry minus the rules `config` asks to ignore. Every
    /// ignored path must name a registered rule.
    pub fn from_config(
        config: &ConflictConfig,
    ) -> Result<Self, UnknownIgnorePaths> {
        let mut registry = Self::default();
        let unmatched = registry.ignore(&config.ignore);
        if !unmatched.is_empty() {
            return Err(UnknownIgnorePaths(
                unmatched.into_iter().map(str::to_owned).collect(),
            ));
        }
        Ok(registry)
    }

    pub fn register_instancetype_rule(
        &mut self,
        rule: Rule<VirtualMachineInstancetypeSpec>,
    ) {
        self.instancetype.push(rule);
    }

    pub fn register_preference_rule(
        &mut self,
        rule: Rule<VirtualMachinePreferenceSpec>,
    ) {
        self.preference.push(rule);
    }

    /// Drops every rule whose full path appears in `paths`. Returns the paths
    /// that matched no rule.
    pub fn ignore<'a>(&mut self, paths: &'a [String]) -> Vec<&'a str> {
        let unmatched = paths
            .iter()
            .filter(|p| {
                !self.instancetype.iter().any(|r| &r.full_path() == *p)
                    && !self.preference.iter().any(|r| &r.full_path() == *p)
            })
            .map(String::as_str)
            .collect();

        self.instancetype.retain(|r| !paths.contains(&r.full_path()));
        self.preference.retain(|r| !paths.contains(&r.full_path()));
        unmatched
    }

    /// Full paths of every registered rule, instance type rules first.
    pub fn paths(&self) -> Vec<String> {
        self.instancetype
            .iter()
            .map(Rule::full_path)
            .chain(self.preference.iter().map(Rule::full_path))
            .collect()
    }

    /// Reports every field `object` governs that `vm`'s template also sets.
    /// A VM without a template has no conflicts.
    pub fn conflicts(&self, object: &ConfigObject, vm: &VirtualMachine) -> Conflicts {
        let Some(template) = vm.template_spec() else {
            return Conflicts::new();
        };

        match object {
            ConfigObject::Instancetype(it)
            | ConfigObject::ClusterInstancetype(it) => {
                Self::evaluate(&self.instancetype, &it.spec, template)
            }
            ConfigObject::Preference(p) | ConfigObject::ClusterPreference(p) => {
                Self::evaluate(&self.preference, &p.spec, template)
            }
        }
    }

    fn evaluate<S>(
        rules: &[Rule<S>],
        spec: &S,
        template: &VirtualMachineInstanceSpec,
    ) -> Conflicts {
        let mut out = Conflicts::new();
        for rule in rules {
            rule.check(spec, template, &mut out);
        }
        out
    }
}
