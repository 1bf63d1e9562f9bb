// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Naming, building and reconciling ControllerRevisions that capture an
//! instance type or preference.
//!
//! A revision's name is derived only from the captured object's kind, name,
//! UID and generation. Every VM that references the same version of an
//! object therefore resolves to the same revision, which is created once and
//! then shared. Because revisions are immutable, a revision found under the
//! expected name with different contents is never repaired: it is reported
//! as stale and the caller stops.

use std::collections::BTreeMap;
use std::sync::Arc;

use instancetype_api_types::{labels, ControllerRevision, ObjectMeta, API_VERSION};
use instancetype_config_toml::{MAX_OBJECT_NAME_LEN, MIN_REVISION_NAME_LEN};
use serde::{Deserialize, Serialize};
use slog::{debug, info, Logger};
use thiserror::Error;
use uuid::Uuid;

use crate::client::{ClientError, RevisionClient};
use crate::kind::{ConfigObject, ObjectKind};

/// Errors that can arise while reconciling a revision.
#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("{kind} {name} has no UID")]
    MissingUid { kind: ObjectKind, name: String },

    #[error("failed to encode {kind} {name}")]
    Encode {
        kind: ObjectKind,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("found existing ControllerRevision with unexpected data: {0}")]
    Stale(String),

    #[error("failed to get ControllerRevision {name}")]
    Get {
        name: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to create ControllerRevision {name}")]
    Create {
        name: String,
        #[source]
        source: ClientError,
    },
}

/// Returns the name of the revision capturing generation `generation` of the
/// object `name` (with UID `uid`) of kind `kind`.
///
/// The name is `<resource name>-<object name>-<uid>-<generation>`. If that
/// would exceed `max_len`, the object name segment is shortened; the UID
/// keeps the result unique. `max_len` is clamped to
/// [`MIN_REVISION_NAME_LEN`]..=[`MAX_OBJECT_NAME_LEN`], the range in which
/// every kind, UID and generation fits.
pub fn revision_name(
    kind: ObjectKind,
    name: &str,
    uid: Uuid,
    generation: i64,
    max_len: usize,
) -> String {
    let max_len = max_len.clamp(MIN_REVISION_NAME_LEN, MAX_OBJECT_NAME_LEN);
    let prefix = kind.resource_name();
    let suffix = format!("{}-{}", uid.hyphenated(), generation);
    let fixed = prefix.len() + suffix.len() + 2;
    let budget = max_len.saturating_sub(fixed);

    let name = name.to_ascii_lowercase();
    let mut end = name.len().min(budget);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    // The segment is followed by '-', so it must not end a DNS label early.
    let segment = name[..end].trim_end_matches(|c| c == '.' || c == '-');

    format!("{}-{}-{}", prefix, segment, suffix)
}

/// The payload stored in a revision's `data`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct RevisionPayload {
    api_version: String,
    kind: String,
    metadata: ObjectMeta,
    spec: serde_json::Value,
}

impl RevisionPayload {
    fn from_revision(revision: &ControllerRevision) -> Option<Self> {
        serde_json::from_value(revision.data.clone()).ok()
    }

    /// Payloads describe the same object version if their kinds and specs
    /// agree. Identity metadata is already encoded in the revision's name.
    fn same_content(&self, other: &Self) -> bool {
        self.kind == other.kind && self.spec == other.spec
    }
}

/// Builds the revision that captures `object`'s current generation, in
/// `namespace`.
pub fn build_revision(
    object: &ConfigObject,
    namespace: &str,
    max_name_len: usize,
) -> Result<ControllerRevision, RevisionError> {
    let kind = object.kind();
    let meta = object.metadata();
    let uid = meta.uid.ok_or_else(|| RevisionError::MissingUid {
        kind,
        name: meta.name.clone(),
    })?;

    let spec = object.spec_json().map_err(|source| RevisionError::Encode {
        kind,
        name: meta.name.clone(),
        source,
    })?;

    let payload = RevisionPayload {
        api_version: API_VERSION.to_owned(),
        kind: kind.kind_name().to_owned(),
        metadata: ObjectMeta {
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            uid: Some(uid),
            generation: meta.generation,
            ..Default::default()
        },
        spec,
    };

    let data = serde_json::to_value(&payload).map_err(|source| {
        RevisionError::Encode { kind, name: meta.name.clone(), source }
    })?;

    let labels = BTreeMap::from([
        (labels::OBJECT_KIND.to_owned(), kind.kind_name().to_owned()),
        (labels::OBJECT_NAME.to_owned(), meta.name.clone()),
        (labels::OBJECT_UID.to_owned(), uid.to_string()),
        (labels::OBJECT_GENERATION.to_owned(), meta.generation.to_string()),
        (labels::OBJECT_VERSION.to_owned(), API_VERSION.to_owned()),
    ]);

    Ok(ControllerRevision {
        metadata: ObjectMeta {
            name: revision_name(
                kind,
                &meta.name,
                uid,
                meta.generation,
                max_name_len,
            ),
            namespace: Some(namespace.to_owned()),
            labels,
            ..Default::default()
        },
        data,
        revision: meta.generation,
    })
}

/// Returns true if `existing` captures the same object version as
/// `expected`. A payload that cannot be decoded never matches.
pub fn revisions_match(
    existing: &ControllerRevision,
    expected: &ControllerRevision,
) -> bool {
    match (
        RevisionPayload::from_revision(existing),
        RevisionPayload::from_revision(expected),
    ) {
        (Some(a), Some(b)) => a.same_content(&b),
        _ => false,
    }
}

/// Finds or creates the revision for a resolved object.
pub struct RevisionReconciler {
    log: Logger,
    client: Arc<dyn RevisionClient>,
    max_name_len: usize,
}

impl RevisionReconciler {
    pub fn new(
        log: Logger,
        client: Arc<dyn RevisionClient>,
        max_name_len: usize,
    ) -> Self {
        Self { log, client, max_name_len }
    }

    /// Returns the name of the revision capturing `object`, creating the
    /// revision in `namespace` if it does not exist yet.
    pub fn reconcile(
        &self,
        namespace: &str,
        object: &ConfigObject,
    ) -> Result<String, RevisionError> {
        let expected = build_revision(object, namespace, self.max_name_len)?;
        let name = expected.metadata.name.clone();

        match self.client.get(namespace, &name) {
            Ok(existing) => {
                self.verify(&existing, &expected)?;
                debug!(self.log, "reusing existing revision";
                       "revision" => &name);
                return Ok(name);
            }
            Err(e) if e.is_not_found() => {}
            Err(source) => return Err(RevisionError::Get { name, source }),
        }

        match self.client.create(&expected) {
            Ok(created) => {
                info!(self.log, "created revision";
                      "revision" => &created.metadata.name,
                      "object_kind" => %object.kind(),
                      "object_name" => &object.metadata().name,
                      "generation" => object.metadata().generation);
                Ok(created.metadata.name)
            }
            Err(e) if e.is_already_exists() => {
                // Another caller created it between our get and create.
                let existing = self
                    .client
                    .get(namespace, &name)
                    .map_err(|source| RevisionError::Get {
                        name: name.clone(),
                        source,
                    })?;
                self.verify(&existing, &expected)?;
                debug!(self.log, "revision created concurrently, reusing";
                       "revision" => &name);
                Ok(name)
            }
            Err(source) => Err(RevisionError::Create { name, source }),
        }
    }

    fn verify(
        &self,
        existing: &ControllerRevision,
        expected: &ControllerRevision,
    ) -> Result<(), RevisionError> {
        if revisions_match(existing, expected) {
            Ok(())
        } else {
            Err(RevisionError::Stale(existing.metadata.name.clone()))
        }
    }
}
