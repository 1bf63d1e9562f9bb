// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ControllerRevisions: immutable snapshots of an object's state.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// An immutable snapshot. Once created, neither `data` nor `revision` is ever
/// changed; a new state gets a new revision under a new name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRevision {
    pub metadata: ObjectMeta,

    /// The captured object, encoded as JSON.
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default)]
    pub revision: i64,
}
