// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use instancetype::{
    revision_name, ConfigObject, ConflictRegistry, InMemoryCluster,
    ObjectCaches, ObjectKind, RevisionStore,
};
use instancetype_api_types::{
    ControllerRevision, VirtualMachine, VirtualMachineInstancetype,
    VirtualMachinePreference,
};
use instancetype_config_toml::Config;
use serde::{Deserialize, Serialize};
use slog::{info, Drain, Logger};
use uuid::Uuid;

fn parse_log_level(s: &str) -> anyhow::Result<slog::Level> {
    s.parse().map_err(|_| anyhow!("Invalid log level"))
}

/// Parses a matcher kind: any instance type or preference resource name.
fn parse_kind(s: &str) -> anyhow::Result<ObjectKind> {
    if s.is_empty() {
        bail!("kind must not be empty");
    }
    ObjectKind::from_instancetype_kind(s)
        .or_else(|| ObjectKind::from_preference_kind(s))
        .ok_or_else(|| anyhow!("unknown kind {s:?}"))
}

#[derive(Debug, Parser)]
#[clap(about, version)]
/// Inspect and exercise instance type revision handling offline
struct Opt {
    /// Minimum level of log messages written to stderr
    #[clap(long, default_value = "info", value_parser = parse_log_level)]
    log_level: slog::Level,

    /// TOML configuration file
    #[clap(short, long, action)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a VM's matchers against a set of fixture objects
    Store {
        /// JSON file of instance types, preferences and existing revisions
        #[clap(short, long, action)]
        fixtures: PathBuf,

        /// JSON file holding the VirtualMachine
        #[clap(long, action)]
        vm: PathBuf,
    },

    /// List the VM template fields that conflict with an instance type or
    /// preference
    Conflicts {
        /// JSON file holding the VirtualMachine
        #[clap(long, action, required_unless_present = "rules")]
        vm: Option<PathBuf>,

        /// JSON file holding a VirtualMachineInstancetype
        #[clap(long, action, conflicts_with = "preference")]
        instancetype: Option<PathBuf>,

        /// JSON file holding a VirtualMachinePreference
        #[clap(long, action)]
        preference: Option<PathBuf>,

        /// List the rules that would be evaluated instead
        #[clap(long, action)]
        rules: bool,
    },

    /// Print the revision name for one version of an object
    RevisionName {
        /// Resource name of the object kind, e.g. virtualmachineinstancetype
        #[clap(short, long, value_parser = parse_kind)]
        kind: ObjectKind,

        #[clap(short, long, action)]
        name: String,

        #[clap(short, long, action)]
        uid: Uuid,

        #[clap(short, long, action)]
        generation: i64,
    },
}

/// Objects loaded into the in-memory cluster before running `store`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Fixtures {
    instancetypes: Vec<VirtualMachineInstancetype>,
    cluster_instancetypes: Vec<VirtualMachineInstancetype>,
    preferences: Vec<VirtualMachinePreference>,
    cluster_preferences: Vec<VirtualMachinePreference>,
    revisions: Vec<ControllerRevision>,
}

impl Fixtures {
    fn load_into(self, cluster: &InMemoryCluster) {
        self.instancetypes.into_iter().for_each(|o| cluster.add_instancetype(o));
        self.cluster_instancetypes
            .into_iter()
            .for_each(|o| cluster.add_cluster_instancetype(o));
        self.preferences.into_iter().for_each(|o| cluster.add_preference(o));
        self.cluster_preferences
            .into_iter()
            .for_each(|o| cluster.add_cluster_preference(o));
        self.revisions.into_iter().for_each(|o| cluster.add_revision(o));
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreOutput {
    vm: VirtualMachine,
    created_revisions: Vec<ControllerRevision>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn run_store(
    log: &Logger,
    config: &Config,
    fixtures: &Path,
    vm: &Path,
) -> anyhow::Result<()> {
    let fixtures: Fixtures = read_json(fixtures)?;
    let mut vm: VirtualMachine = read_json(vm)?;

    let cluster = Arc::new(InMemoryCluster::new());
    fixtures.load_into(&cluster);
    cluster.add_vm(vm.clone());

    let store = RevisionStore::new(
        log.clone(),
        ObjectCaches::empty(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
    )
    .with_config(config)?;

    store
        .store(&mut vm)
        .with_context(|| format!("failed to store VM {}", vm.metadata.name))?;

    let created = cluster.created_revisions();
    info!(log, "stored VM"; "created_revisions" => created.len());
    print_json(&StoreOutput { vm, created_revisions: created })
}

fn run_conflicts(
    config: &Config,
    vm: Option<&Path>,
    instancetype: Option<&Path>,
    preference: Option<&Path>,
    rules: bool,
) -> anyhow::Result<()> {
    let registry = ConflictRegistry::from_config(&config.conflicts)?;

    if rules {
        return print_json(&registry.paths());
    }

    let vm: VirtualMachine =
        read_json(vm.ok_or_else(|| anyhow!("--vm is required"))?)?;
    let object = match (instancetype, preference) {
        (Some(path), None) => {
            let it: VirtualMachineInstancetype = read_json(path)?;
            if it.metadata.namespace.is_some() {
                ConfigObject::Instancetype(it)
            } else {
                ConfigObject::ClusterInstancetype(it)
            }
        }
        (None, Some(path)) => {
            let p: VirtualMachinePreference = read_json(path)?;
            if p.metadata.namespace.is_some() {
                ConfigObject::Preference(p)
            } else {
                ConfigObject::ClusterPreference(p)
            }
        }
        _ => bail!("exactly one of --instancetype or --preference is required"),
    };

    let paths: Vec<String> = registry
        .conflicts(&object, &vm)
        .iter()
        .map(ToString::to_string)
        .collect();
    print_json(&paths)
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let log = build_logger(opt.log_level);

    let config = match &opt.config {
        Some(path) => instancetype_config_toml::parse(path).with_context(
            || format!("failed to parse config {}", path.display()),
        )?,
        None => Config::default(),
    };

    match opt.cmd {
        Command::Store { fixtures, vm } => {
            run_store(&log, &config, &fixtures, &vm)
        }
        Command::Conflicts { vm, instancetype, preference, rules } => {
            run_conflicts(
                &config,
                vm.as_deref(),
                instancetype.as_deref(),
                preference.as_deref(),
                rules,
            )
        }
        Command::RevisionName { kind, name, uid, generation } => {
            println!(
                "{}",
                revision_name(
                    kind,
                    &name,
                    uid,
                    generation,
                    config.revisions.max_name_len
                )
            );
            Ok(())
        }
    }
}

fn build_logger(level: slog::Level) -> Logger {
    // Standard output carries command results, so logs go to stderr.
    let main_drain = if atty::is(atty::Stream::Stderr) {
        let decorator = slog_term::TermDecorator::new().stderr().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_no_guard()
    } else {
        let drain =
            slog_bunyan::with_name("instancetype-cli", std::io::stderr())
                .build()
                .fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_no_guard()
    };

    let filtered = slog::LevelFilter::new(main_drain, level);
    Logger::root(filtered.fuse(), slog::o!())
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn kinds_parse_from_any_resource_name() {
        assert_eq!(
            parse_kind("virtualmachineclusterinstancetypes").unwrap(),
            ObjectKind::ClusterInstancetype
        );
        assert_eq!(
            parse_kind("virtualmachinepreference").unwrap(),
            ObjectKind::Preference
        );
        assert!(parse_kind("").is_err());
        assert!(parse_kind("virtualmachine").is_err());
    }

    #[test]
    fn fixtures_default_missing_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "clusterInstancetypes": [
                {{ "metadata": {{ "name": "small" }},
                   "spec": {{ "cpu": {{ "guest": 1 }}, "memory": {{ "guest": "1Gi" }} }} }}
            ] }}"#
        )
        .unwrap();

        let fixtures: Fixtures = read_json(file.path()).unwrap();
        assert_eq!(fixtures.cluster_instancetypes.len(), 1);
        assert!(fixtures.instancetypes.is_empty());
        assert!(fixtures.revisions.is_empty());

        let cluster = InMemoryCluster::new();
        fixtures.load_into(&cluster);
        use instancetype::client::ConfigObjectReader;
        assert!(cluster.get_cluster_instancetype("small").is_ok());
    }

    #[test]
    fn unknown_ignored_paths_fail_every_command() {
        let mut config = Config::default();
        config.conflicts.ignore = vec!["spec.template.spec.nope".to_owned()];

        let err = run_conflicts(&config, None, None, None, true).unwrap_err();
        assert!(err.to_string().contains("spec.template.spec.nope"));

        let dir = tempfile::tempdir().unwrap();
        let fixtures = dir.path().join("fixtures.json");
        let vm = dir.path().join("vm.json");
        std::fs::write(&fixtures, "{}").unwrap();
        std::fs::write(
            &vm,
            serde_json::to_vec(&VirtualMachine::new("default", "vm")).unwrap(),
        )
        .unwrap();
        let log = Logger::root(slog::Discard, slog::o!());
        let err = run_store(&log, &config, &fixtures, &vm).unwrap_err();
        assert!(err.to_string().contains("spec.template.spec.nope"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Opt::command().debug_assert();
    }
}
