// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pins a VirtualMachine's instance type and preference matchers to
//! ControllerRevisions.
//!
//! [`RevisionStore::store`] handles the instance type matcher first and the
//! preference matcher second. For each unresolved matcher it validates the
//! matcher kind, resolves the referenced object (cache first, then a live
//! read), checks the VM template for conflicting fields, and finds or
//! creates the revision capturing the object. The first failure ends the
//! call. Revision names for both matchers are then written back with a
//! single JSON patch, and only once that patch has been accepted are the
//! in-memory matchers updated.

use std::sync::Arc;

use instancetype_api_types::{
    VirtualMachine, VirtualMachineInstancetype, VirtualMachinePreference,
};
use instancetype_config_toml::{Config, MAX_OBJECT_NAME_LEN};
use slog::{debug, info, Logger};
use thiserror::Error;

use crate::client::{
    ClientError, ConfigObjectReader, ObjectCache, PatchType, RevisionClient,
    SharedObjectCache, VirtualMachinePatcher,
};
use crate::conflict::{ConflictRegistry, Conflicts, UnknownIgnorePaths};
use crate::kind::{ConfigObject, Matcher, ObjectKind};
use crate::patch::{build_revision_name_patch, PatchError};
use crate::revision::{RevisionError, RevisionReconciler};

/// Errors returned by [`RevisionStore::store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("got unexpected kind in {matcher}: {kind}")]
    UnexpectedKind { matcher: &'static str, kind: String },

    #[error("failed to find {kind} {name}")]
    Lookup {
        kind: ObjectKind,
        name: String,
        #[source]
        source: ClientError,
    },

    #[error("VM field(s) {conflicts} conflicts with selected {noun}")]
    Conflict { noun: &'static str, conflicts: Conflicts },

    #[error(transparent)]
    Revision(#[from] RevisionError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("failed to patch VirtualMachine {name}")]
    Apply {
        name: String,
        #[source]
        source: ClientError,
    },
}

/// Errors returned when applying a [`Config`] to a [`RevisionStore`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Invalid(#[from] instancetype_config_toml::ParseError),

    #[error(transparent)]
    UnknownIgnorePaths(#[from] UnknownIgnorePaths),
}

impl StoreError {
    /// True if the referenced instance type or preference does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Lookup { source, .. } if source.is_not_found())
    }

    /// The conflicting fields, if the VM conflicts with the referenced
    /// object.
    pub fn conflicts(&self) -> Option<&Conflicts> {
        match self {
            StoreError::Conflict { conflicts, .. } => Some(conflicts),
            _ => None,
        }
    }

    pub fn is_stale_revision(&self) -> bool {
        matches!(self, StoreError::Revision(RevisionError::Stale(_)))
    }
}

/// The local caches consulted before reading objects directly.
#[derive(Clone)]
pub struct ObjectCaches {
    pub instancetypes: Arc<dyn ObjectCache<VirtualMachineInstancetype>>,
    pub cluster_instancetypes: Arc<dyn ObjectCache<VirtualMachineInstancetype>>,
    pub preferences: Arc<dyn ObjectCache<VirtualMachinePreference>>,
    pub cluster_preferences: Arc<dyn ObjectCache<VirtualMachinePreference>>,
}

impl ObjectCaches {
    /// Caches that never hit, so every lookup is a live read.
    pub fn empty() -> Self {
        Self {
            instancetypes: Arc::new(SharedObjectCache::new()),
            cluster_instancetypes: Arc::new(SharedObjectCache::new()),
            preferences: Arc::new(SharedObjectCache::new()),
            cluster_preferences: Arc::new(SharedObjectCache::new()),
        }
    }
}

pub struct RevisionStore {
    log: Logger,
    caches: ObjectCaches,
    reader: Arc<dyn ConfigObjectReader>,
    revisions: Arc<dyn RevisionClient>,
    patcher: Arc<dyn VirtualMachinePatcher>,
    registry: ConflictRegistry,
    max_name_len: usize,
}

impl RevisionStore {
    pub fn new(
        log: Logger,
        caches: ObjectCaches,
        reader: Arc<dyn ConfigObjectReader>,
        revisions: Arc<dyn RevisionClient>,
        patcher: Arc<dyn VirtualMachinePatcher>,
    ) -> Self {
        Self {
            log,
            caches,
            reader,
            revisions,
            patcher,
            registry: ConflictRegistry::default(),
            max_name_len: MAX_OBJECT_NAME_LEN,
        }
    }

    /// Applies the conflict and naming settings from `config`, which must
    /// be valid and must only ignore registered conflict paths.
    pub fn with_config(mut self, config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        self.registry = ConflictRegistry::from_config(&config.conflicts)?;
        self.max_name_len = config.revisions.max_name_len;
        debug!(self.log, "applied config";
               "ignored_conflicts" => config.conflicts.ignore.len(),
               "max_name_len" => self.max_name_len);
        Ok(self)
    }

    pub fn with_registry(mut self, registry: ConflictRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &ConflictRegistry {
        &self.registry
    }

    /// Resolves `vm`'s unresolved matchers to revisions and persists the
    /// revision names. On error, `vm` is left unchanged and the call may be
    /// retried.
    pub fn store(&self, vm: &mut VirtualMachine) -> Result<(), StoreError> {
        let log = self.log.new(slog::o!(
            "vm" => format!("{}/{}", vm.metadata.namespace_or_default(), vm.metadata.name)
        ));

        let instancetype_revision =
            self.pending_revision(&log, &*vm, vm.spec.instancetype.as_ref())?;
        let preference_revision =
            self.pending_revision(&log, &*vm, vm.spec.preference.as_ref())?;

        let patch = build_revision_name_patch(
            instancetype_revision.as_deref(),
            preference_revision.as_deref(),
        )?;
        if patch.is_empty() {
            debug!(log, "no revision names to store");
            return Ok(());
        }

        debug!(log, "patching VM";
               "content_type" => PatchType::Json.content_type(),
               "bytes" => patch.len());
        self.patcher
            .patch(
                vm.metadata.namespace_or_default(),
                &vm.metadata.name,
                PatchType::Json,
                &patch,
            )
            .map_err(|source| StoreError::Apply {
                name: vm.metadata.name.clone(),
                source,
            })?;

        if let (Some(name), Some(m)) =
            (instancetype_revision, vm.spec.instancetype.as_mut())
        {
            info!(log, "stored instance type revision"; "revision" => &name);
            m.revision_name = name;
        }
        if let (Some(name), Some(m)) =
            (preference_revision, vm.spec.preference.as_mut())
        {
            info!(log, "stored preference revision"; "revision" => &name);
            m.revision_name = name;
        }
        Ok(())
    }

    /// Returns the revision name to record for `matcher`, or `None` if there
    /// is nothing to do.
    fn pending_revision<M: Matcher>(
        &self,
        log: &Logger,
        vm: &VirtualMachine,
        matcher: Option<&M>,
    ) -> Result<Option<String>, StoreError> {
        let Some(matcher) = matcher else {
            return Ok(None);
        };
        if matcher.is_resolved() {
            debug!(log, "matcher already resolved";
                   "matcher" => M::TYPE_NAME,
                   "revision" => matcher.revision_name());
            return Ok(None);
        }

        let kind =
            matcher.object_kind().ok_or_else(|| StoreError::UnexpectedKind {
                matcher: M::TYPE_NAME,
                kind: matcher.kind().to_owned(),
            })?;
        let namespace = vm.metadata.namespace_or_default();
        let object = self.resolve(namespace, kind, matcher.name())?;

        let conflicts = self.registry.conflicts(&object, vm);
        if !conflicts.is_empty() {
            info!(log, "VM conflicts with referenced object";
                  "object_kind" => %kind,
                  "object_name" => matcher.name(),
                  "conflicts" => %conflicts);
            return Err(StoreError::Conflict { noun: kind.noun(), conflicts });
        }

        let reconciler = RevisionReconciler::new(
            log.clone(),
            self.revisions.clone(),
            self.max_name_len,
        );
        Ok(Some(reconciler.reconcile(namespace, &object)?))
    }

    /// Looks `name` up in the cache for `kind`, falling back to a live read.
    /// Namespaced kinds are looked up in `namespace`.
    fn resolve(
        &self,
        namespace: &str,
        kind: ObjectKind,
        name: &str,
    ) -> Result<ConfigObject, StoreError> {
        let lookup_err = |source: ClientError| StoreError::Lookup {
            kind,
            name: name.to_owned(),
            source,
        };

        let object = match kind {
            ObjectKind::Instancetype => ConfigObject::Instancetype(
                match self.caches.instancetypes.get(Some(namespace), name) {
                    Some(it) => it,
                    None => self
                        .reader
                        .get_instancetype(namespace, name)
                        .map_err(lookup_err)?,
                },
            ),
            ObjectKind::ClusterInstancetype => ConfigObject::ClusterInstancetype(
                match self.caches.cluster_instancetypes.get(None, name) {
                    Some(it) => it,
                    None => self
                        .reader
                        .get_cluster_instancetype(name)
                        .map_err(lookup_err)?,
                },
            ),
            ObjectKind::Preference => ConfigObject::Preference(
                match self.caches.preferences.get(Some(namespace), name) {
                    Some(p) => p,
                    None => self
                        .reader
                        .get_preference(namespace, name)
                        .map_err(lookup_err)?,
                },
            ),
            ObjectKind::ClusterPreference => ConfigObject::ClusterPreference(
                match self.caches.cluster_preferences.get(None, name) {
                    Some(p) => p,
                    None => self
                        .reader
                        .get_cluster_preference(name)
                        .map_err(lookup_err)?,
                },
            ),
        };
        Ok(object)
    }
}

#[cfg(test)]
mod test {
    use instancetype_api_types::{
        instancetype::{CpuInstancetype, MemoryInstancetype},
        preference::{CpuPreferences, PreferredCpuTopology},
        virtual_machine::Cpu,
        InstancetypeMatcher, ObjectMeta, PreferenceMatcher, Quantity,
        VirtualMachineInstancetypeSpec, VirtualMachinePreferenceSpec,
    };
    use instancetype_config_toml::ConflictConfig;
    use strum::IntoEnumIterator;
    use uuid::Uuid;

    use super::*;
    use crate::client::{MockConfigObjectReader, MockVirtualMachinePatcher};
    use crate::memory::InMemoryCluster;
    use json_patch::{Patch, PatchOperation};
    use crate::revision::build_revision;

    const NAMESPACE: &str = "default";

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn meta(kind: ObjectKind, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_owned(),
            namespace: (!kind.is_cluster_scoped()).then(|| NAMESPACE.to_owned()),
            uid: Some(Uuid::new_v4()),
            generation: 1,
            ..Default::default()
        }
    }

    fn instancetype(kind: ObjectKind, guest: u32) -> VirtualMachineInstancetype {
        VirtualMachineInstancetype {
            metadata: meta(kind, "test-instancetype"),
            spec: VirtualMachineInstancetypeSpec {
                cpu: CpuInstancetype { guest, ..Default::default() },
                memory: MemoryInstancetype {
                    guest: Quantity::from("128Mi"),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    fn preference(kind: ObjectKind) -> VirtualMachinePreference {
        VirtualMachinePreference {
            metadata: meta(kind, "test-preference"),
            spec: VirtualMachinePreferenceSpec {
                cpu: Some(CpuPreferences {
                    preferred_cpu_topology: Some(PreferredCpuTopology::Cores),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    /// Builds the object of `kind`, registering it with `cluster`.
    fn add_object(cluster: &InMemoryCluster, kind: ObjectKind) -> ConfigObject {
        match kind {
            ObjectKind::Instancetype => {
                let it = instancetype(kind, 2);
                cluster.add_instancetype(it.clone());
                ConfigObject::Instancetype(it)
            }
            ObjectKind::ClusterInstancetype => {
                let it = instancetype(kind, 2);
                cluster.add_cluster_instancetype(it.clone());
                ConfigObject::ClusterInstancetype(it)
            }
            ObjectKind::Preference => {
                let p = preference(kind);
                cluster.add_preference(p.clone());
                ConfigObject::Preference(p)
            }
            ObjectKind::ClusterPreference => {
                let p = preference(kind);
                cluster.add_cluster_preference(p.clone());
                ConfigObject::ClusterPreference(p)
            }
        }
    }

    fn vm_referencing(name: &str, kinds: &[ObjectKind]) -> VirtualMachine {
        let mut vm = VirtualMachine::new(NAMESPACE, name);
        for kind in kinds {
            match kind {
                ObjectKind::Instancetype | ObjectKind::ClusterInstancetype => {
                    vm.spec.instancetype = Some(InstancetypeMatcher {
                        name: "test-instancetype".to_owned(),
                        kind: kind.resource_name().to_owned(),
                        ..Default::default()
                    });
                }
                ObjectKind::Preference | ObjectKind::ClusterPreference => {
                    vm.spec.preference = Some(PreferenceMatcher {
                        name: "test-preference".to_owned(),
                        kind: kind.resource_name().to_owned(),
                        ..Default::default()
                    });
                }
            }
        }
        vm
    }

    fn revision_name_of(vm: &VirtualMachine, kind: ObjectKind) -> String {
        match kind {
            ObjectKind::Instancetype | ObjectKind::ClusterInstancetype => {
                vm.spec.instancetype.as_ref().unwrap().revision_name.clone()
            }
            ObjectKind::Preference | ObjectKind::ClusterPreference => {
                vm.spec.preference.as_ref().unwrap().revision_name.clone()
            }
        }
    }

    fn store_for(cluster: &Arc<InMemoryCluster>) -> RevisionStore {
        RevisionStore::new(
            test_logger(),
            ObjectCaches::empty(),
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
        )
    }

    fn expected_revision_name(object: &ConfigObject) -> String {
        build_revision(object, NAMESPACE, MAX_OBJECT_NAME_LEN)
            .unwrap()
            .metadata
            .name
    }

    #[test]
    fn creates_revision_and_stores_name() {
        for kind in ObjectKind::iter() {
            let cluster = Arc::new(InMemoryCluster::new());
            let object = add_object(&cluster, kind);
            let mut vm = vm_referencing("testvm", &[kind]);
            cluster.add_vm(vm.clone());

            store_for(&cluster).store(&mut vm).unwrap();

            let expected = expected_revision_name(&object);
            assert_eq!(revision_name_of(&vm, kind), expected, "{kind}");

            let created = cluster.created_revisions();
            assert_eq!(created.len(), 1, "{kind}");
            assert_eq!(created[0].metadata.name, expected);
            assert_eq!(created[0].metadata.namespace.as_deref(), Some(NAMESPACE));
            assert_eq!(created[0].data["kind"], kind.kind_name());

            let stored = cluster.vm(NAMESPACE, "testvm").unwrap();
            assert_eq!(stored, vm, "{kind}");
        }
    }

    #[test]
    fn resolved_matchers_are_skipped() {
        for kind in ObjectKind::iter() {
            let cluster = Arc::new(InMemoryCluster::new());
            add_object(&cluster, kind);
            let mut vm = vm_referencing("testvm", &[kind]);
            match kind {
                ObjectKind::Instancetype | ObjectKind::ClusterInstancetype => {
                    vm.spec.instancetype.as_mut().unwrap().revision_name =
                        "foo".to_owned();
                }
                _ => {
                    vm.spec.preference.as_mut().unwrap().revision_name =
                        "foo".to_owned();
                }
            }
            let before = vm.clone();

            store_for(&cluster).store(&mut vm).unwrap();

            assert_eq!(vm, before);
            assert!(cluster.created_revisions().is_empty());
            assert!(cluster.patches().is_empty());
        }
    }

    #[test]
    fn no_matchers_is_a_no_op() {
        let mut patcher = MockVirtualMachinePatcher::new();
        patcher.expect_patch().never();
        let cluster = Arc::new(InMemoryCluster::new());
        let store = RevisionStore::new(
            test_logger(),
            ObjectCaches::empty(),
            cluster.clone(),
            cluster.clone(),
            Arc::new(patcher),
        );

        let mut vm = VirtualMachine::new(NAMESPACE, "testvm");
        store.store(&mut vm).unwrap();
        assert!(cluster.created_revisions().is_empty());
    }

    #[test]
    fn missing_object_is_not_found() {
        for kind in ObjectKind::iter() {
            let cluster = Arc::new(InMemoryCluster::new());
            let mut vm = vm_referencing("testvm", &[kind]);
            cluster.add_vm(vm.clone());

            let err = store_for(&cluster).store(&mut vm).unwrap_err();
            assert!(err.is_not_found(), "{kind}: {err}");
            assert!(cluster.created_revisions().is_empty());
            assert!(cluster.patches().is_empty());
        }
    }

    #[test]
    fn existing_matching_revision_is_reused() {
        for kind in ObjectKind::iter() {
            let cluster = Arc::new(InMemoryCluster::new());
            let object = add_object(&cluster, kind);
            let existing =
                build_revision(&object, NAMESPACE, MAX_OBJECT_NAME_LEN).unwrap();
            cluster.add_revision(existing.clone());

            let mut vm = vm_referencing("testvm", &[kind]);
            cluster.add_vm(vm.clone());
            store_for(&cluster).store(&mut vm).unwrap();

            assert_eq!(revision_name_of(&vm, kind), existing.metadata.name);
            assert!(cluster.created_revisions().is_empty(), "{kind}");
            assert_eq!(cluster.patches().len(), 1);
        }
    }

    #[test]
    fn existing_unexpected_revision_is_stale() {
        for kind in ObjectKind::iter() {
            let cluster = Arc::new(InMemoryCluster::new());
            let object = add_object(&cluster, kind);

            // Same identity, different spec.
            let mut existing =
                build_revision(&object, NAMESPACE, MAX_OBJECT_NAME_LEN).unwrap();
            existing.data["spec"] = serde_json::json!({ "unexpected": true });
            cluster.add_revision(existing);

            let mut vm = vm_referencing("testvm", &[kind]);
            cluster.add_vm(vm.clone());
            let before = vm.clone();

            let err = store_for(&cluster).store(&mut vm).unwrap_err();
            assert!(err.is_stale_revision(), "{kind}: {err}");
            assert!(err
                .to_string()
                .contains("found existing ControllerRevision with unexpected data"));
            assert_eq!(vm, before);
            assert!(cluster.patches().is_empty());
        }
    }

    #[test]
    fn unexpected_kind_names_the_matcher() {
        let cluster = Arc::new(InMemoryCluster::new());
        let store = store_for(&cluster);

        let mut vm = VirtualMachine::new(NAMESPACE, "testvm");
        vm.spec.instancetype = Some(InstancetypeMatcher {
            name: "test".to_owned(),
            kind: "virtualmachinepreference".to_owned(),
            ..Default::default()
        });
        let err = store.store(&mut vm).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnexpectedKind { matcher: "InstancetypeMatcher", .. }
        ));
        assert!(err
            .to_string()
            .contains("got unexpected kind in InstancetypeMatcher"));

        let mut vm = VirtualMachine::new(NAMESPACE, "testvm");
        vm.spec.preference = Some(PreferenceMatcher {
            name: "test".to_owned(),
            kind: "foobar".to_owned(),
            ..Default::default()
        });
        let err = store.store(&mut vm).unwrap_err();
        assert!(err
            .to_string()
            .contains("got unexpected kind in PreferenceMatcher"));
    }

    #[test]
    fn conflicting_template_stops_before_revision() {
        for kind in [ObjectKind::Instancetype, ObjectKind::ClusterInstancetype] {
            let cluster = Arc::new(InMemoryCluster::new());
            add_object(&cluster, kind);
            let mut vm = vm_referencing("testvm", &[kind]);
            vm.template_spec_mut().domain.cpu =
                Some(Cpu { cores: 1, ..Default::default() });
            cluster.add_vm(vm.clone());

            let err = store_for(&cluster).store(&mut vm).unwrap_err();
            let conflicts = err.conflicts().unwrap();
            let paths: Vec<_> = conflicts.iter().map(ToString::to_string).collect();
            assert_eq!(paths, vec!["spec.template.spec.domain.cpu.cores"]);
            assert_eq!(
                err.to_string(),
                "VM field(s) spec.template.spec.domain.cpu.cores conflicts \
                 with selected instance type"
            );
            assert!(cluster.created_revisions().is_empty());
            assert!(cluster.patches().is_empty());
        }
    }

    #[test]
    fn ignored_conflicts_do_not_block() {
        let cluster = Arc::new(InMemoryCluster::new());
        add_object(&cluster, ObjectKind::ClusterInstancetype);
        let mut vm = vm_referencing("testvm", &[ObjectKind::ClusterInstancetype]);
        vm.template_spec_mut().domain.cpu =
            Some(Cpu { cores: 1, ..Default::default() });
        cluster.add_vm(vm.clone());

        let config = Config {
            conflicts: ConflictConfig {
                ignore: vec!["spec.template.spec.domain.cpu.cores".to_owned()],
            },
            ..Default::default()
        };
        let store = store_for(&cluster).with_config(&config).unwrap();
        assert!(!store
            .registry()
            .paths()
            .contains(&"spec.template.spec.domain.cpu.cores".to_owned()));

        store.store(&mut vm).unwrap();
        assert!(!revision_name_of(&vm, ObjectKind::ClusterInstancetype).is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cluster = Arc::new(InMemoryCluster::new());

        let mut config = Config::default();
        config.revisions.max_name_len = 40;
        assert!(matches!(
            store_for(&cluster).with_config(&config),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = Config::default();
        config.conflicts.ignore =
            vec!["spec.template.spec.domain.cpu.sockets2".to_owned()];
        let err = store_for(&cluster).with_config(&config).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownIgnorePaths(_)));
        assert!(err.to_string().contains("cpu.sockets2"));
    }

    #[test]
    fn preferences_do_not_conflict_by_default() {
        let cluster = Arc::new(InMemoryCluster::new());
        add_object(&cluster, ObjectKind::ClusterPreference);
        let mut vm = vm_referencing("testvm", &[ObjectKind::ClusterPreference]);
        vm.template_spec_mut().domain.cpu =
            Some(Cpu { cores: 4, ..Default::default() });
        cluster.add_vm(vm.clone());

        store_for(&cluster).store(&mut vm).unwrap();
        assert_eq!(cluster.created_revisions().len(), 1);
    }

    #[test]
    fn revisions_are_shared_across_vms() {
        let cluster = Arc::new(InMemoryCluster::new());
        add_object(&cluster, ObjectKind::ClusterInstancetype);
        let store = store_for(&cluster);

        let mut first = vm_referencing("first", &[ObjectKind::ClusterInstancetype]);
        let mut second = vm_referencing("second", &[ObjectKind::ClusterInstancetype]);
        cluster.add_vm(first.clone());
        cluster.add_vm(second.clone());

        store.store(&mut first).unwrap();
        store.store(&mut second).unwrap();

        assert_eq!(
            revision_name_of(&first, ObjectKind::ClusterInstancetype),
            revision_name_of(&second, ObjectKind::ClusterInstancetype)
        );
        assert_eq!(cluster.created_revisions().len(), 1);
        assert_eq!(cluster.patches().len(), 2);
    }

    #[test]
    fn both_matchers_are_stored_in_one_patch() {
        let cluster = Arc::new(InMemoryCluster::new());
        let it = add_object(&cluster, ObjectKind::Instancetype);
        let pref = add_object(&cluster, ObjectKind::ClusterPreference);
        let mut vm = vm_referencing(
            "testvm",
            &[ObjectKind::Instancetype, ObjectKind::ClusterPreference],
        );
        cluster.add_vm(vm.clone());

        store_for(&cluster).store(&mut vm).unwrap();

        let patches = cluster.patches();
        assert_eq!(patches.len(), 1);
        let Patch(ops) = serde_json::from_slice(&patches[0]).unwrap();
        assert_eq!(ops.len(), 4);
        let added: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                PatchOperation::Test(t) => {
                    assert!(t.path.ends_with("/revisionName"));
                    assert!(t.value.is_null());
                    None
                }
                PatchOperation::Add(a) => {
                    assert!(a.path.ends_with("/revisionName"));
                    Some(a.value.clone())
                }
                other => panic!("unexpected operation {other:?}"),
            })
            .collect();
        assert!(matches!(ops[0], PatchOperation::Test(_)));
        assert_eq!(
            added,
            vec![
                serde_json::Value::from(expected_revision_name(&it)),
                serde_json::Value::from(expected_revision_name(&pref)),
            ]
        );

        assert_eq!(cluster.created_revisions().len(), 2);
        assert_eq!(cluster.vm(NAMESPACE, "testvm").unwrap(), vm);
    }

    #[test]
    fn instancetype_failure_stops_before_preference() {
        let cluster = Arc::new(InMemoryCluster::new());
        add_object(&cluster, ObjectKind::ClusterPreference);
        let mut vm = vm_referencing(
            "testvm",
            &[ObjectKind::ClusterInstancetype, ObjectKind::ClusterPreference],
        );
        cluster.add_vm(vm.clone());

        let err = store_for(&cluster).store(&mut vm).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Lookup { kind: ObjectKind::ClusterInstancetype, .. }
        ));
        assert!(cluster.created_revisions().is_empty());
    }

    #[test]
    fn cached_objects_skip_live_reads() {
        let cluster = Arc::new(InMemoryCluster::new());
        let cache = Arc::new(SharedObjectCache::new());
        let it = instancetype(ObjectKind::Instancetype, 2);
        cache.add(it.clone());

        let mut reader = MockConfigObjectReader::new();
        reader.expect_get_instancetype().never();

        let caches = ObjectCaches { instancetypes: cache, ..ObjectCaches::empty() };
        let store = RevisionStore::new(
            test_logger(),
            caches,
            Arc::new(reader),
            cluster.clone(),
            cluster.clone(),
        );

        let mut vm = vm_referencing("testvm", &[ObjectKind::Instancetype]);
        cluster.add_vm(vm.clone());
        store.store(&mut vm).unwrap();

        assert_eq!(
            revision_name_of(&vm, ObjectKind::Instancetype),
            expected_revision_name(&ConfigObject::Instancetype(it))
        );
    }

    #[test]
    fn cache_miss_falls_back_to_live_read() {
        let cluster = Arc::new(InMemoryCluster::new());
        let it = instancetype(ObjectKind::ClusterInstancetype, 2);

        let mut reader = MockConfigObjectReader::new();
        let found = it.clone();
        reader
            .expect_get_cluster_instancetype()
            .withf(|name| name == "test-instancetype")
            .times(1)
            .returning(move |_| Ok(found.clone()));

        let store = RevisionStore::new(
            test_logger(),
            ObjectCaches::empty(),
            Arc::new(reader),
            cluster.clone(),
            cluster.clone(),
        );

        let mut vm = vm_referencing("testvm", &[ObjectKind::ClusterInstancetype]);
        cluster.add_vm(vm.clone());
        store.store(&mut vm).unwrap();
        assert_eq!(cluster.created_revisions().len(), 1);
    }

    #[test]
    fn failed_patch_leaves_vm_unchanged() {
        let cluster = Arc::new(InMemoryCluster::new());
        add_object(&cluster, ObjectKind::Instancetype);
        add_object(&cluster, ObjectKind::Preference);

        let mut patcher = MockVirtualMachinePatcher::new();
        patcher
            .expect_patch()
            .withf(|ns, name, ty, _| {
                ns == NAMESPACE && name == "testvm" && *ty == PatchType::Json
            })
            .times(1)
            .returning(|_, _, _, _| Err(ClientError::Internal("boom".to_owned())));

        let store = RevisionStore::new(
            test_logger(),
            ObjectCaches::empty(),
            cluster.clone(),
            cluster.clone(),
            Arc::new(patcher),
        );

        let mut vm = vm_referencing(
            "testvm",
            &[ObjectKind::Instancetype, ObjectKind::Preference],
        );
        let before = vm.clone();
        let err = store.store(&mut vm).unwrap_err();
        assert!(matches!(err, StoreError::Apply { .. }));
        assert_eq!(vm, before);

        // The revisions exist, so a retry reuses them.
        assert_eq!(cluster.created_revisions().len(), 2);
    }

    #[test]
    fn retry_after_failed_patch_reuses_revisions() {
        let cluster = Arc::new(InMemoryCluster::new());
        add_object(&cluster, ObjectKind::ClusterInstancetype);
        let mut vm = vm_referencing("testvm", &[ObjectKind::ClusterInstancetype]);

        // The VM is not stored yet, so the first patch fails.
        let store = store_for(&cluster);
        let err = store.store(&mut vm).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Apply { ref source, .. } if source.is_not_found()
        ));

        cluster.add_vm(vm.clone());
        store.store(&mut vm).unwrap();
        assert_eq!(cluster.created_revisions().len(), 1);
        assert_eq!(cluster.patches().len(), 1);
    }
}
