use std::collections::BTreeMap;

use crate::ids::InstanceId;
use crate::pedalboard::{ControlValue, PluginState};

/// A named parameter-only overlay of a pedalboard. Applying a snapshot
/// preserves topology: it never adds or removes items, it only rebinds
/// values on instances it references.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub color: Option<String>,
    pub modified: bool,
    pub values: Vec<SnapshotValue>,
}

/// A complete replacement value set for one plugin instance, captured at
/// snapshot time. `state` is only `Some` when the plugin's state changed
/// since the snapshot's instance was last captured (see DESIGN.md open
/// question 1 — this is what drives the fast-path-vs-rebuild decision).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotValue {
    pub instance_id: InstanceId,
    pub enabled: bool,
    pub control_values: Vec<ControlValue>,
    pub state: Option<PluginState>,
    pub path_properties: BTreeMap<String, Vec<u8>>,
}
