// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON Patch documents that pin a VM's matchers to revisions.

use json_patch::{AddOperation, Patch, PatchOperation, TestOperation};
use serde_json::Value;
use thiserror::Error;

pub const INSTANCETYPE_REVISION_PATH: &str = "/spec/instancetype/revisionName";
pub const PREFERENCE_REVISION_PATH: &str = "/spec/preference/revisionName";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to encode patch")]
    Encode(#[from] serde_json::Error),
}

/// Returns the operations that set each given revision name, each guarded by
/// a test that the field is still unset. Absent names contribute nothing.
pub fn revision_name_operations(
    instancetype: Option<&str>,
    preference: Option<&str>,
) -> Patch {
    let ops = [
        (INSTANCETYPE_REVISION_PATH, instancetype),
        (PREFERENCE_REVISION_PATH, preference),
    ]
    .into_iter()
    .filter_map(|(path, name)| Some((path, name?)))
    .flat_map(|(path, name)| {
        [
            PatchOperation::Test(TestOperation {
                path: path.to_owned(),
                value: Value::Null,
            }),
            PatchOperation::Add(AddOperation {
                path: path.to_owned(),
                value: Value::from(name),
            }),
        ]
    })
    .collect();
    Patch(ops)
}

/// Encodes the revision name operations as a JSON Patch document. Returns an
/// empty buffer when there is nothing to set.
pub fn build_revision_name_patch(
    instancetype: Option<&str>,
    preference: Option<&str>,
) -> Result<Vec<u8>, PatchError> {
    let patch = revision_name_operations(instancetype, preference);
    if patch.0.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::to_vec(&patch)?)
}
