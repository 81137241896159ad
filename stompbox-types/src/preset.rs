use std::collections::BTreeMap;

use crate::ids::InstanceId;
use crate::pedalboard::PluginState;

/// One entry in the `plugin_presets/` index: which plugin URI a preset
/// file belongs to.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginPresetIndexEntry {
    pub plugin_uri: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginPresetIndex {
    pub entries: Vec<PluginPresetIndexEntry>,
    next_instance_id: u64,
}

impl PluginPresetIndex {
    pub fn alloc_instance_id(&mut self) -> u64 {
        self.next_instance_id += 1;
        self.next_instance_id
    }
}

/// One saved preset for a single plugin type, grouped per plugin URI in
/// `plugin_presets/<safe-plugin-uri>.json`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginPreset {
    pub instance_id: InstanceId,
    pub label: String,
    pub lilv_preset_uri: Option<String>,
    pub control_values: BTreeMap<String, f32>,
    pub state: PluginState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_allocates_monotonic_ids() {
        let mut idx = PluginPresetIndex::default();
        let a = idx.alloc_instance_id();
        let b = idx.alloc_instance_id();
        assert!(b > a);
    }
}
