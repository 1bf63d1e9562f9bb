// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes a revision store configuration which may be parsed from a TOML
//! file.

use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// The longest object name the control plane accepts.
pub const MAX_OBJECT_NAME_LEN: usize = 253;

/// The shortest revision name limit that still fits the kind, UID and
/// generation segments of every revision name.
pub const MIN_REVISION_NAME_LEN: usize = 128;

/// Configuration for the revision store.
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub conflicts: ConflictConfig,

    #[serde(default)]
    pub revisions: RevisionConfig,
}

/// Tuning for conflict detection.
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ConflictConfig {
    /// Full dot-joined field paths (e.g.
    /// `spec.template.spec.domain.cpu.model`) whose conflict rules are
    /// skipped.
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// Tuning for ControllerRevision naming.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RevisionConfig {
    /// Upper bound on generated revision names. Values outside
    /// [`MIN_REVISION_NAME_LEN`]..=[`MAX_OBJECT_NAME_LEN`] are rejected by
    /// [`Config::validate`].
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

fn default_max_name_len() -> usize {
    MAX_OBJECT_NAME_LEN
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self { max_name_len: default_max_name_len() }
    }
}

impl Config {
    /// Checks the settings that the TOML schema alone cannot express.
    pub fn validate(&self) -> Result<(), ParseError> {
        let len = self.revisions.max_name_len;
        if !(MIN_REVISION_NAME_LEN..=MAX_OBJECT_NAME_LEN).contains(&len) {
            return Err(ParseError::MaxNameLen(len));
        }
        Ok(())
    }
}

/// Errors which may be returned when parsing the configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("max_name_len {0} is outside 128..=253")]
    MaxNameLen(usize),
}

/// Parses a TOML string into a configuration object.
pub fn from_str(contents: &str) -> Result<Config, ParseError> {
    let cfg = toml::from_str::<Config>(contents)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    from_str(&contents)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn config_can_be_serialized_as_toml() {
        let dummy_config = Config {
            conflicts: ConflictConfig {
                ignore: vec!["spec.template.spec.schedulerName".to_owned()],
            },
            ..Default::default()
        };
        let serialized = toml::ser::to_string(&dummy_config).unwrap();
        let deserialized: Config = toml::de::from_str(&serialized).unwrap();
        assert_eq!(dummy_config, deserialized);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = from_str("").unwrap();
        assert!(cfg.conflicts.ignore.is_empty());
        assert_eq!(cfg.revisions.max_name_len, MAX_OBJECT_NAME_LEN);
    }

    #[test]
    fn parse_basic_config() {
        let raw = r#"
[conflicts]
ignore = ["spec.template.spec.domain.cpu.model", "spec.template.spec.nodeSelector"]

[revisions]
max_name_len = 160
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let cfg = parse(file.path()).unwrap();
        assert_eq!(cfg.conflicts.ignore.len(), 2);
        assert_eq!(cfg.conflicts.ignore[1], "spec.template.spec.nodeSelector");
        assert_eq!(cfg.revisions.max_name_len, 160);
    }

    #[test]
    fn out_of_range_name_len_is_rejected() {
        let raw = "[revisions]\nmax_name_len = 1000\n";
        assert!(matches!(from_str(raw), Err(ParseError::MaxNameLen(1000))));

        let raw = "[revisions]\nmax_name_len = 63\n";
        assert!(matches!(from_str(raw), Err(ParseError::MaxNameLen(63))));
    }

    #[test]
    fn built_configs_are_validated() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());

        cfg.revisions.max_name_len = 40;
        assert!(matches!(cfg.validate(), Err(ParseError::MaxNameLen(40))));
        cfg.revisions.max_name_len = MIN_REVISION_NAME_LEN;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = parse(dir.path().join("absent.toml"));
        assert!(matches!(res, Err(ParseError::Io(_))));
    }
}
