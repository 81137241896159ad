use std::collections::BTreeMap;

use crate::ids::InstanceId;
use crate::midi::{MidiBinding, MidiChannelBinding};
use crate::snapshot::{Snapshot, SnapshotValue};

/// One named scalar plugin parameter, `symbol -> value`.
///
/// Kept as an ordered pair rather than a map entry: plugins declare
/// control ports in a fixed order and presets are diff-friendlier when
/// that order survives a JSON round-trip, even though evaluation never
/// depends on it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlValue {
    pub symbol: String,
    pub value: f32,
}

impl ControlValue {
    pub fn new(symbol: impl Into<String>, value: f32) -> Self {
        Self {
            symbol: symbol.into(),
            value,
        }
    }
}

/// Opaque per-plugin key -> typed-value state blob (LV2 "state"
/// extension equivalent). The host never interprets the contents; it
/// only stores and replays them through the plugin catalog's save/load
/// hooks.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginState {
    pub values: BTreeMap<String, Vec<u8>>,
    /// Incremented every time the plugin reports new state. Used by the
    /// structure-identical fast path to decide whether in-place restore
    /// is safe (see DESIGN.md open question 1).
    pub update_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitType {
    AOnly,
    BOnly,
    Mix,
    Lr,
}

/// One node in a pedalboard's ordered chain.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Item {
    Plugin {
        instance_id: InstanceId,
        plugin_uri: String,
        enabled: bool,
        use_mod_ui: bool,
        control_values: Vec<ControlValue>,
        state: PluginState,
        /// Consumed on next load: applies a factory preset URI, then
        /// cleared.
        lilv_preset_uri: Option<String>,
        /// `patch_property_uri -> serialized atom`, for path-valued
        /// properties (e.g. an IR file). Entries outside the plugin's
        /// declared file-property set are pruned on load.
        path_properties: BTreeMap<String, Vec<u8>>,
        midi_bindings: Vec<MidiBinding>,
        midi_channel_binding: Option<MidiChannelBinding>,
        title: Option<String>,
        color: Option<String>,
    },
    Split {
        instance_id: InstanceId,
        top: Box<Pedalboard>,
        bottom: Box<Pedalboard>,
        split_type: SplitType,
        select: f32,
        mix: f32,
        pan_l: f32,
        pan_r: f32,
        vol_l: f32,
        vol_r: f32,
    },
    Empty {
        instance_id: InstanceId,
    },
}

impl Item {
    pub fn instance_id(&self) -> InstanceId {
        match self {
            Item::Plugin { instance_id, .. } => *instance_id,
            Item::Split { instance_id, .. } => *instance_id,
            Item::Empty { instance_id } => *instance_id,
        }
    }

    /// True iff `self` and `other` have the same plugin URI / split
    /// topology; everything value-like (controls, enabled, state,
    /// path properties) is ignored. Instance ids are ignored too: they
    /// are not part of structure, only of identity.
    fn structurally_identical(&self, other: &Item) -> bool {
        match (self, other) {
            (
                Item::Plugin { plugin_uri: a, .. },
                Item::Plugin { plugin_uri: b, .. },
            ) => a == b,
            (
                Item::Split { top: at, bottom: ab, .. },
                Item::Split { top: bt, bottom: bb, .. },
            ) => at.is_structurally_identical(bt) && ab.is_structurally_identical(bb),
            (Item::Empty { .. }, Item::Empty { .. }) => true,
            _ => false,
        }
    }
}

/// An ordered plugin chain plus its snapshots. Stable across saves; a
/// pure value type with no realtime or I/O concerns.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pedalboard {
    pub name: String,
    pub input_db: f32,
    pub output_db: f32,
    pub items: Vec<Item>,
    pub snapshots: Vec<Snapshot>,
    pub selected_snapshot: Option<usize>,
    next_instance_id: u64,
}

impl Pedalboard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_db: 0.0,
            output_db: 0.0,
            items: Vec::new(),
            snapshots: Vec::new(),
            selected_snapshot: None,
            next_instance_id: 1,
        }
    }

    /// A single empty slot, the fallback used whenever storage would
    /// otherwise leave no selectable preset.
    pub fn make_default() -> Self {
        let mut pb = Self::new("Default");
        let id = pb.alloc_instance_id();
        pb.items.push(Item::Empty { instance_id: id });
        pb
    }

    pub fn alloc_instance_id(&mut self) -> InstanceId {
        let id = InstanceId::new(self.next_instance_id);
        self.next_instance_id += 1;
        id
    }

    /// Depth-first list of every item including split children, in
    /// evaluation order.
    pub fn get_all_plugins(&self) -> Vec<&Item> {
        let mut out = Vec::new();
        Self::collect(&self.items, &mut out);
        out
    }

    fn collect<'a>(items: &'a [Item], out: &mut Vec<&'a Item>) {
        for item in items {
            match item {
                Item::Split { top, bottom, .. } => {
                    out.push(item);
                    Self::collect(&top.items, out);
                    Self::collect(&bottom.items, out);
                }
                _ => out.push(item),
            }
        }
    }

    fn find_item_mut(&mut self, id: InstanceId) -> Option<&mut Item> {
        Self::find_in_mut(&mut self.items, id)
    }

    fn find_in_mut(items: &mut [Item], id: InstanceId) -> Option<&mut Item> {
        for item in items.iter_mut() {
            if item.instance_id() == id {
                return Some(item);
            }
            if let Item::Split { top, bottom, .. } = item {
                if let Some(found) = Self::find_in_mut(&mut top.items, id) {
                    return Some(found);
                }
                if let Some(found) = Self::find_in_mut(&mut bottom.items, id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Mutate one control. No-op if `id` doesn't resolve or isn't a
    /// Plugin item.
    pub fn set_control(&mut self, id: InstanceId, symbol: &str, value: f32) {
        if let Some(Item::Plugin { control_values, .. }) = self.find_item_mut(id) {
            if let Some(cv) = control_values.iter_mut().find(|cv| cv.symbol == symbol) {
                cv.value = value;
            } else {
                control_values.push(ControlValue::new(symbol, value));
            }
        }
    }

    pub fn set_item_enabled(&mut self, id: InstanceId, value: bool) {
        if let Some(Item::Plugin { enabled, .. }) = self.find_item_mut(id) {
            *enabled = value;
        }
    }

    pub fn set_item_use_mod_ui(&mut self, id: InstanceId, value: bool) {
        if let Some(Item::Plugin { use_mod_ui, .. }) = self.find_item_mut(id) {
            *use_mod_ui = value;
        }
    }

    pub fn set_item_title(&mut self, id: InstanceId, title: Option<String>, color: Option<String>) {
        if let Some(item) = self.find_item_mut(id) {
            match item {
                Item::Plugin { title: t, color: c, .. } => {
                    *t = title;
                    *c = color;
                }
                _ => {}
            }
        }
    }

    /// True iff the ordered item list, split topology, and plugin URIs
    /// are identical to `other`. Control values, bypass, state, and path
    /// properties never break structural identity.
    pub fn is_structurally_identical(&self, other: &Pedalboard) -> bool {
        if self.items.len() != other.items.len() {
            return false;
        }
        self.items
            .iter()
            .zip(other.items.iter())
            .all(|(a, b)| a.structurally_identical(b))
    }

    /// Breaks all sharing; a pedalboard contains no shared pointers to
    /// begin with (it's an owned value tree), so this is a plain clone
    /// that exists to make snapshot-apply call sites self-documenting.
    pub fn deep_copy(&self) -> Pedalboard {
        self.clone()
    }

    /// Capture current values into a new snapshot, optionally keeping
    /// `previous`'s name/color if one is supplied (used when saving over
    /// an existing snapshot slot).
    pub fn make_snapshot_from_current(&self, previous: Option<&Snapshot>) -> Snapshot {
        let values = self
            .get_all_plugins()
            .into_iter()
            .filter_map(|item| match item {
                Item::Plugin {
                    instance_id,
                    enabled,
                    control_values,
                    state,
                    path_properties,
                    ..
                } => Some(SnapshotValue {
                    instance_id: *instance_id,
                    enabled: *enabled,
                    control_values: control_values.clone(),
                    state: Some(state.clone()),
                    path_properties: path_properties.clone(),
                }),
                _ => None,
            })
            .collect();

        Snapshot {
            name: previous.map(|p| p.name.clone()).unwrap_or_else(|| "Snapshot".to_string()),
            color: previous.and_then(|p| p.color.clone()),
            modified: false,
            values,
        }
    }

    /// Apply the snapshot at `index`: rebind control values, enabled
    /// flags, state, and path properties for every referenced instance;
    /// entries referencing missing instances are silently dropped.
    /// Never adds or removes items. Returns whether anything changed.
    pub fn apply_snapshot(&mut self, index: usize) -> bool {
        let Some(snapshot) = self.snapshots.get(index).cloned() else {
            return false;
        };
        let mut changed = false;
        for value in &snapshot.values {
            if let Some(Item::Plugin {
                enabled,
                control_values,
                state,
                path_properties,
                ..
            }) = self.find_item_mut(value.instance_id)
            {
                if *enabled != value.enabled {
                    *enabled = value.enabled;
                    changed = true;
                }
                if *control_values != value.control_values {
                    *control_values = value.control_values.clone();
                    changed = true;
                }
                if let Some(s) = &value.state {
                    if state.update_count != s.update_count {
                        *state = s.clone();
                        changed = true;
                    }
                }
                if *path_properties != value.path_properties {
                    *path_properties = value.path_properties.clone();
                    changed = true;
                }
            }
        }
        self.selected_snapshot = Some(index);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin_item(id: u64, uri: &str) -> Item {
        Item::Plugin {
            instance_id: InstanceId::new(id),
            plugin_uri: uri.to_string(),
            enabled: true,
            use_mod_ui: false,
            control_values: vec![ControlValue::new("gain", 0.5)],
            state: PluginState::default(),
            lilv_preset_uri: None,
            path_properties: BTreeMap::new(),
            midi_bindings: Vec::new(),
            midi_channel_binding: None,
            title: None,
            color: None,
        }
    }

    #[test]
    fn deep_copy_is_structurally_identical_regardless_of_value_edits() {
        let mut pb = Pedalboard::new("test");
        pb.items.push(plugin_item(1, "urn:overdrive"));
        let mut copy = pb.deep_copy();
        copy.set_control(InstanceId::new(1), "gain", 0.9);
        copy.set_item_enabled(InstanceId::new(1), false);
        assert!(pb.is_structurally_identical(&copy));
    }

    #[test]
    fn different_plugin_uri_breaks_structural_identity() {
        let mut a = Pedalboard::new("a");
        a.items.push(plugin_item(1, "urn:overdrive"));
        let mut b = Pedalboard::new("b");
        b.items.push(plugin_item(1, "urn:delay"));
        assert!(!a.is_structurally_identical(&b));
    }

    #[test]
    fn apply_snapshot_drops_orphaned_values() {
        let mut pb = Pedalboard::new("test");
        pb.items.push(plugin_item(1, "urn:overdrive"));
        pb.snapshots.push(Snapshot {
            name: "S1".into(),
            color: None,
            modified: false,
            values: vec![
                SnapshotValue {
                    instance_id: InstanceId::new(1),
                    enabled: false,
                    control_values: vec![ControlValue::new("gain", 0.1)],
                    state: None,
                    path_properties: BTreeMap::new(),
                },
                SnapshotValue {
                    instance_id: InstanceId::new(42),
                    enabled: true,
                    control_values: vec![],
                    state: None,
                    path_properties: BTreeMap::new(),
                },
            ],
        });

        let changed = pb.apply_snapshot(0);
        assert!(changed);
        if let Item::Plugin { enabled, control_values, .. } = &pb.items[0] {
            assert!(!enabled);
            assert_eq!(control_values[0].value, 0.1);
        } else {
            panic!("expected plugin item");
        }
    }

    #[test]
    fn apply_snapshot_twice_is_idempotent() {
        let mut pb = Pedalboard::new("test");
        pb.items.push(plugin_item(1, "urn:overdrive"));
        pb.snapshots.push(Snapshot {
            name: "S1".into(),
            color: None,
            modified: false,
            values: vec![SnapshotValue {
                instance_id: InstanceId::new(1),
                enabled: false,
                control_values: vec![ControlValue::new("gain", 0.1)],
                state: None,
                path_properties: BTreeMap::new(),
            }],
        });

        pb.apply_snapshot(0);
        let after_first = pb.clone();
        pb.apply_snapshot(0);
        assert_eq!(pb.items, after_first.items);
    }

    #[test]
    fn get_all_plugins_is_depth_first_through_splits() {
        let mut pb = Pedalboard::new("root");
        let mut top = Pedalboard::new("top");
        top.items.push(plugin_item(2, "urn:top-plugin"));
        let mut bottom = Pedalboard::new("bottom");
        bottom.items.push(plugin_item(3, "urn:bottom-plugin"));
        pb.items.push(Item::Split {
            instance_id: InstanceId::new(1),
            top: Box::new(top),
            bottom: Box::new(bottom),
            split_type: SplitType::Mix,
            select: 0.5,
            mix: 0.5,
            pan_l: -1.0,
            pan_r: 1.0,
            vol_l: 0.0,
            vol_r: 0.0,
        });

        let ids: Vec<u64> = pb.get_all_plugins().iter().map(|i| i.instance_id().get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
