//! `PluginGraph` (C2): the realtime-resident owner of instantiated plugins,
//! their buffers, the execution order, and the split/mix topology.
//!
//! `process` is called exactly once per ALSA period from the realtime
//! thread; it must not allocate, log, or lock. Everything that *could*
//! allocate — resolving symbols to indices, instantiating plugins, sizing
//! scratch buffers — happens once in [`PluginGraph::build`], which runs on
//! the service thread. The graph as a whole is replaced, never mutated
//! piecewise: the service thread builds a new one
//! and publishes it via `ForwardMessage::ReplaceGraph`.

use std::collections::HashMap;

use stompbox_types::{Item, Pedalboard, PluginCatalog, SplitType, VuAccumulator};
use stompbox_types::InstanceId;

use crate::messages::SnapshotRebind;
use crate::plugin::{PluginFactory, PluginInstance};

const VU_FLUSH_PERIOD_MS: u32 = 50;

struct VuSlot {
    handle: u64,
    accumulator: VuAccumulator,
}

struct PortMonitorSlot {
    instance_id: InstanceId,
    port_index: u32,
    frames_per_sample: u64,
    frames_since_sample: u64,
    last_value: Option<f32>,
}

/// One instantiated node of the graph, mirroring [`stompbox_types::Item`]
/// but carrying a live `PluginInstance` and pre-resolved control indices
/// instead of symbol strings.
pub enum GraphNode {
    Plugin {
        instance_id: InstanceId,
        enabled: bool,
        instance: Box<dyn PluginInstance>,
        /// `symbol -> control index`, resolved once at build time.
        control_index: HashMap<String, u32>,
        /// Input scratch, preallocated so `run` never aliases `l`/`r`
        /// (which double as both the previous stage's output and this
        /// stage's write target) and never allocates per block.
        in_l: Vec<f32>,
        in_r: Vec<f32>,
    },
    Split {
        instance_id: InstanceId,
        top: Box<PluginGraph>,
        bottom: Box<PluginGraph>,
        split_type: SplitType,
        select: f32,
        mix: f32,
        pan_l: f32,
        pan_r: f32,
        vol_l: f32,
        vol_r: f32,
        scratch_top_in_l: Vec<f32>,
        scratch_top_in_r: Vec<f32>,
        scratch_top_out_l: Vec<f32>,
        scratch_top_out_r: Vec<f32>,
        scratch_bottom_in_l: Vec<f32>,
        scratch_bottom_in_r: Vec<f32>,
        scratch_bottom_out_l: Vec<f32>,
        scratch_bottom_out_r: Vec<f32>,
    },
    Empty {
        instance_id: InstanceId,
    },
}

impl GraphNode {
    fn instance_id(&self) -> InstanceId {
        match self {
            GraphNode::Plugin { instance_id, .. } => *instance_id,
            GraphNode::Split { instance_id, .. } => *instance_id,
            GraphNode::Empty { instance_id } => *instance_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    UnknownPlugin { instance_id: InstanceId, plugin_uri: String },
    FactoryRefused { instance_id: InstanceId, plugin_uri: String },
}

pub struct PluginGraph {
    nodes: Vec<GraphNode>,
    input_volume_db: f32,
    output_volume_db: f32,
    sample_rate: u32,
    max_frames: usize,
    vu_subs: HashMap<InstanceId, VuSlot>,
    vu_frames_per_flush: u64,
    vu_frames_since_flush: u64,
    port_monitors: HashMap<u64, PortMonitorSlot>,
    pending_port_updates: Vec<(u64, f32)>,
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

impl PluginGraph {
    /// A graph with no nodes; output is silence. Used by tests and by the
    /// driver before the first real graph is built.
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            input_volume_db: 0.0,
            output_volume_db: 0.0,
            sample_rate: 48000,
            max_frames: 0,
            vu_subs: HashMap::new(),
            vu_frames_per_flush: 1,
            vu_frames_since_flush: 0,
            port_monitors: HashMap::new(),
            pending_port_updates: Vec::new(),
        }
    }

    /// Builds a fresh graph from a pedalboard snapshot. Runs on the service
    /// thread; freely allocates. `max_frames` bounds every period size the
    /// driver will ever call `process` with, so split scratch buffers can
    /// be sized once here.
    pub fn build(
        pedalboard: &Pedalboard,
        catalog: &dyn PluginCatalog,
        factory: &dyn PluginFactory,
        sample_rate: u32,
        max_frames: usize,
    ) -> Result<Self, BuildError> {
        let nodes = Self::build_items(&pedalboard.items, catalog, factory, sample_rate, max_frames)?;
        Ok(Self {
            nodes,
            input_volume_db: pedalboard.input_db,
            output_volume_db: pedalboard.output_db,
            sample_rate,
            max_frames,
            vu_subs: HashMap::new(),
            vu_frames_per_flush: ((sample_rate as u64 * VU_FLUSH_PERIOD_MS as u64) / 1000).max(1),
            vu_frames_since_flush: 0,
            port_monitors: HashMap::new(),
            pending_port_updates: Vec::new(),
        })
    }

    fn build_items(
        items: &[Item],
        catalog: &dyn PluginCatalog,
        factory: &dyn PluginFactory,
        sample_rate: u32,
        max_frames: usize,
    ) -> Result<Vec<GraphNode>, BuildError> {
        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            nodes.push(Self::build_item(item, catalog, factory, sample_rate, max_frames)?);
        }
        Ok(nodes)
    }

    fn build_item(
        item: &Item,
        catalog: &dyn PluginCatalog,
        factory: &dyn PluginFactory,
        sample_rate: u32,
        max_frames: usize,
    ) -> Result<GraphNode, BuildError> {
        match item {
            Item::Plugin { instance_id, plugin_uri, enabled, control_values, .. } => {
                let info = catalog.lookup(plugin_uri).ok_or_else(|| BuildError::UnknownPlugin {
                    instance_id: *instance_id,
                    plugin_uri: plugin_uri.clone(),
                })?;
                let mut instance = factory
                    .instantiate(plugin_uri, &info, sample_rate)
                    .ok_or_else(|| BuildError::FactoryRefused { instance_id: *instance_id, plugin_uri: plugin_uri.clone() })?;

                let mut control_index = HashMap::new();
                for port in &info.control_ports {
                    control_index.insert(port.symbol.clone(), port.index);
                    instance.set_control(port.index, port.default);
                }
                for cv in control_values {
                    if let Some(&index) = control_index.get(&cv.symbol) {
                        instance.set_control(index, cv.value);
                    }
                }

                Ok(GraphNode::Plugin {
                    instance_id: *instance_id,
                    enabled: *enabled,
                    instance,
                    control_index,
                    in_l: vec![0.0; max_frames],
                    in_r: vec![0.0; max_frames],
                })
            }
            Item::Split { instance_id, top, bottom, split_type, select, mix, pan_l, pan_r, vol_l, vol_r } => {
                let top = PluginGraph::build(top, catalog, factory, sample_rate, max_frames)?;
                let bottom = PluginGraph::build(bottom, catalog, factory, sample_rate, max_frames)?;
                Ok(GraphNode::Split {
                    instance_id: *instance_id,
                    top: Box::new(top),
                    bottom: Box::new(bottom),
                    split_type: *split_type,
                    select: *select,
                    mix: *mix,
                    pan_l: *pan_l,
                    pan_r: *pan_r,
                    vol_l: *vol_l,
                    vol_r: *vol_r,
                    scratch_top_in_l: vec![0.0; max_frames],
                    scratch_top_in_r: vec![0.0; max_frames],
                    scratch_top_out_l: vec![0.0; max_frames],
                    scratch_top_out_r: vec![0.0; max_frames],
                    scratch_bottom_in_l: vec![0.0; max_frames],
                    scratch_bottom_in_r: vec![0.0; max_frames],
                    scratch_bottom_out_l: vec![0.0; max_frames],
                    scratch_bottom_out_r: vec![0.0; max_frames],
                })
            }
            Item::Empty { instance_id } => Ok(GraphNode::Empty { instance_id: *instance_id }),
        }
    }

    /// Processes `n_frames` of stereo audio in place: `output_l`/`output_r`
    /// start as a copy of the input and are threaded through each item in
    /// order. `n_frames` must not exceed the `max_frames` the graph was
    /// built with.
    pub fn process(&mut self, n_frames: usize, input_l: &[f32], input_r: &[f32], output_l: &mut [f32], output_r: &mut [f32]) {
        let in_gain = db_to_linear(self.input_volume_db);
        for i in 0..n_frames {
            output_l[i] = input_l[i] * in_gain;
            output_r[i] = input_r[i] * in_gain;
        }

        for node in self.nodes.iter_mut() {
            Self::process_node(node, n_frames, output_l, output_r, &mut self.vu_subs);
        }

        let out_gain = db_to_linear(self.output_volume_db);
        for i in 0..n_frames {
            output_l[i] *= out_gain;
            output_r[i] *= out_gain;
        }

        self.sample_port_monitors(n_frames);
    }

    /// Processes one node in place and, if it carries an active VU
    /// subscription, accumulates that node's own pre-process input block
    /// and post-process output block — not the graph's overall input/output,
    /// which would be wrong for every node but the last.
    fn process_node(node: &mut GraphNode, n_frames: usize, l: &mut [f32], r: &mut [f32], vu_subs: &mut HashMap<InstanceId, VuSlot>) {
        match node {
            GraphNode::Empty { instance_id } => {
                if let Some(slot) = vu_subs.get_mut(instance_id) {
                    slot.accumulator.accumulate_input_stereo(&l[..n_frames], &r[..n_frames]);
                    slot.accumulator.accumulate_output_stereo(&l[..n_frames], &r[..n_frames]);
                }
            }
            GraphNode::Plugin { instance_id, enabled, instance, in_l, in_r, .. } => {
                if !*enabled {
                    return;
                }
                in_l[..n_frames].copy_from_slice(&l[..n_frames]);
                in_r[..n_frames].copy_from_slice(&r[..n_frames]);
                let inputs: [&[f32]; 2] = [&in_l[..n_frames], &in_r[..n_frames]];
                let mut outputs: [&mut [f32]; 2] = [&mut l[..n_frames], &mut r[..n_frames]];
                instance.run(n_frames, &inputs, &mut outputs);
                if let Some(slot) = vu_subs.get_mut(instance_id) {
                    slot.accumulator.accumulate_input_stereo(&in_l[..n_frames], &in_r[..n_frames]);
                    slot.accumulator.accumulate_output_stereo(&l[..n_frames], &r[..n_frames]);
                }
            }
            GraphNode::Split {
                instance_id,
                top,
                bottom,
                split_type,
                mix,
                pan_l,
                pan_r,
                vol_l,
                vol_r,
                scratch_top_in_l,
                scratch_top_in_r,
                scratch_top_out_l,
                scratch_top_out_r,
                scratch_bottom_in_l,
                scratch_bottom_in_r,
                scratch_bottom_out_l,
                scratch_bottom_out_r,
                ..
            } => {
                scratch_top_in_l[..n_frames].copy_from_slice(&l[..n_frames]);
                scratch_top_in_r[..n_frames].copy_from_slice(&r[..n_frames]);
                scratch_bottom_in_l[..n_frames].copy_from_slice(&l[..n_frames]);
                scratch_bottom_in_r[..n_frames].copy_from_slice(&r[..n_frames]);

                top.process(
                    n_frames,
                    &scratch_top_in_l[..n_frames],
                    &scratch_top_in_r[..n_frames],
                    &mut scratch_top_out_l[..n_frames],
                    &mut scratch_top_out_r[..n_frames],
                );
                bottom.process(
                    n_frames,
                    &scratch_bottom_in_l[..n_frames],
                    &scratch_bottom_in_r[..n_frames],
                    &mut scratch_bottom_out_l[..n_frames],
                    &mut scratch_bottom_out_r[..n_frames],
                );

                let (wl, wr) = match split_type {
                    SplitType::AOnly => (1.0, 0.0),
                    SplitType::BOnly => (0.0, 1.0),
                    SplitType::Mix | SplitType::Lr => (1.0 - *mix, *mix),
                };
                for i in 0..n_frames {
                    let top_l = scratch_top_out_l[i] * *vol_l * (1.0 + pan_l.min(0.0));
                    let top_r = scratch_top_out_r[i] * *vol_r * (1.0 - pan_r.max(0.0));
                    let bottom_l = scratch_bottom_out_l[i] * *vol_l;
                    let bottom_r = scratch_bottom_out_r[i] * *vol_r;
                    l[i] = top_l * wl + bottom_l * wr;
                    r[i] = top_r * wl + bottom_r * wr;
                }

                if let Some(slot) = vu_subs.get_mut(instance_id) {
                    slot.accumulator.accumulate_input_stereo(&scratch_top_in_l[..n_frames], &scratch_top_in_r[..n_frames]);
                    slot.accumulator.accumulate_output_stereo(&l[..n_frames], &r[..n_frames]);
                }
            }
        }
    }

    fn find_node_mut(&mut self, id: InstanceId) -> Option<&mut GraphNode> {
        Self::find_in_mut(&mut self.nodes, id)
    }

    fn find_in_mut(nodes: &mut [GraphNode], id: InstanceId) -> Option<&mut GraphNode> {
        for node in nodes.iter_mut() {
            if node.instance_id() == id {
                return Some(node);
            }
            if let GraphNode::Split { top, bottom, .. } = node {
                if let Some(found) = Self::find_in_mut(&mut top.nodes, id) {
                    return Some(found);
                }
                if let Some(found) = Self::find_in_mut(&mut bottom.nodes, id) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn lookup_control_index(&self, instance_id: InstanceId, symbol: &str) -> Option<u32> {
        fn search(nodes: &[GraphNode], id: InstanceId, symbol: &str) -> Option<u32> {
            for node in nodes {
                match node {
                    GraphNode::Plugin { instance_id, control_index, .. } if *instance_id == id => {
                        return control_index.get(symbol).copied();
                    }
                    GraphNode::Split { top, bottom, .. } => {
                        if let Some(found) = search(&top.nodes, id, symbol) {
                            return Some(found);
                        }
                        if let Some(found) = search(&bottom.nodes, id, symbol) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        search(&self.nodes, instance_id, symbol)
    }

    pub fn set_control(&mut self, instance_id: InstanceId, control_index: u32, value: f32) {
        if let Some(GraphNode::Plugin { instance, .. }) = self.find_node_mut(instance_id) {
            instance.set_control(control_index, value);
        }
    }

    pub fn set_bypass(&mut self, instance_id: InstanceId, value: bool) {
        if let Some(GraphNode::Plugin { enabled, .. }) = self.find_node_mut(instance_id) {
            *enabled = value;
        }
    }

    pub fn set_input_volume_db(&mut self, db: f32) {
        self.input_volume_db = db;
    }

    pub fn set_output_volume_db(&mut self, db: f32) {
        self.output_volume_db = db;
    }

    /// Bulk rebind for the structure-identical fast path.
    /// Entries referencing instances absent from this graph are ignored —
    /// they were already pruned on the service side, but a stale rebind
    /// racing a graph swap is harmless here too.
    pub fn apply_snapshot_rebinds(&mut self, rebinds: &[SnapshotRebind]) {
        for rebind in rebinds {
            if let Some(GraphNode::Plugin { enabled, instance, .. }) = self.find_node_mut(rebind.instance_id) {
                *enabled = rebind.enabled;
                for &(index, value) in &rebind.control_values {
                    instance.set_control(index, value);
                }
            }
        }
    }

    pub fn handle_patch_get(&self, instance_id: InstanceId, property_urid: u32) -> Option<Vec<u8>> {
        fn search(nodes: &[GraphNode], id: InstanceId, urid: u32) -> Option<Vec<u8>> {
            for node in nodes {
                match node {
                    GraphNode::Plugin { instance_id, instance, .. } if *instance_id == id => {
                        return instance.patch_get(urid);
                    }
                    GraphNode::Split { top, bottom, .. } => {
                        if let Some(found) = search(&top.nodes, id, urid) {
                            return Some(found);
                        }
                        if let Some(found) = search(&bottom.nodes, id, urid) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        search(&self.nodes, instance_id, property_urid)
    }

    pub fn handle_patch_set(&mut self, instance_id: InstanceId, property_urid: u32, bytes: &[u8]) {
        if let Some(GraphNode::Plugin { instance, .. }) = self.find_node_mut(instance_id) {
            instance.patch_set(property_urid, bytes);
        }
    }

    pub fn monitor_port(&mut self, instance_id: InstanceId, port_index: u32, handle: u64, update_rate_hz: u32) {
        let frames_per_sample = if update_rate_hz == 0 { self.max_frames.max(1) as u64 } else { (self.sample_rate as u64 / update_rate_hz as u64).max(1) };
        self.port_monitors.insert(
            handle,
            PortMonitorSlot { instance_id, port_index, frames_per_sample, frames_since_sample: 0, last_value: None },
        );
    }

    pub fn unmonitor_port(&mut self, handle: u64) {
        self.port_monitors.remove(&handle);
    }

    pub fn add_vu_subscription(&mut self, instance_id: InstanceId, handle: u64) {
        self.vu_subs.insert(instance_id, VuSlot { handle, accumulator: VuAccumulator::new(instance_id, true, true) });
    }

    pub fn remove_vu_subscription(&mut self, handle: u64) {
        self.vu_subs.retain(|_, slot| slot.handle != handle);
    }

    /// Drains VU accumulators flushed on the fixed ~50ms cadence. Empty outside a flush boundary.
    pub fn drain_vu_flush(&mut self, n_frames: usize) -> Vec<VuAccumulator> {
        self.vu_frames_since_flush += n_frames as u64;
        if self.vu_frames_since_flush < self.vu_frames_per_flush {
            return Vec::new();
        }
        self.vu_frames_since_flush = 0;
        self.vu_subs
            .values_mut()
            .map(|slot| {
                let out = slot.accumulator;
                slot.accumulator.reset();
                out
            })
            .collect()
    }

    pub fn take_port_monitor_updates(&mut self) -> Vec<(u64, f32)> {
        std::mem::take(&mut self.pending_port_updates)
    }

    fn sample_port_monitors(&mut self, n_frames: usize) {
        if self.port_monitors.is_empty() {
            return;
        }
        let nodes = &self.nodes;
        for (&handle, slot) in self.port_monitors.iter_mut() {
            slot.frames_since_sample += n_frames as u64;
            if slot.frames_since_sample < slot.frames_per_sample {
                continue;
            }
            slot.frames_since_sample = 0;
            let value = find_control_value(nodes, slot.instance_id, slot.port_index);
            if slot.last_value != Some(value) {
                slot.last_value = Some(value);
                self.pending_port_updates.push((handle, value));
            }
        }
    }
}

fn find_control_value(nodes: &[GraphNode], id: InstanceId, index: u32) -> f32 {
    for node in nodes {
        match node {
            GraphNode::Plugin { instance_id, instance, .. } if *instance_id == id => return instance.control_value(index),
            GraphNode::Split { top, bottom, .. } => {
                let v = find_control_value(&top.nodes, id, index);
                if v != 0.0 {
                    return v;
                }
                let v = find_control_value(&bottom.nodes, id, index);
                if v != 0.0 {
                    return v;
                }
            }
            _ => {}
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use stompbox_types::{ControlPortInfo, ControlValue, PluginInfo, StaticCatalog};

    use crate::plugin::{BuiltinFactory, GAIN_URI};

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![PluginInfo {
            uri: GAIN_URI.to_string(),
            name: "Gain".into(),
            input_ports: 2,
            output_ports: 2,
            control_ports: vec![ControlPortInfo { symbol: "gain".into(), index: 0, default: 1.0, min: 0.0, max: 4.0 }],
            has_midi_input: false,
            file_properties: vec![],
            factory_presets: vec![],
        }])
    }

    fn gain_pedalboard(gain: f32) -> Pedalboard {
        let mut pb = Pedalboard::new("test");
        let id = pb.alloc_instance_id();
        pb.items.push(Item::Plugin {
            instance_id: id,
            plugin_uri: GAIN_URI.to_string(),
            enabled: true,
            use_mod_ui: false,
            control_values: vec![ControlValue::new("gain", gain)],
            state: Default::default(),
            lilv_preset_uri: None,
            path_properties: Default::default(),
            midi_bindings: Vec::new(),
            midi_channel_binding: None,
            title: None,
            color: None,
        });
        pb
    }

    #[test]
    fn process_applies_gain() {
        let pb = gain_pedalboard(0.5);
        let mut graph = PluginGraph::build(&pb, &catalog(), &BuiltinFactory, 48000, 64).unwrap();
        let input_l = vec![1.0; 4];
        let input_r = vec![1.0; 4];
        let mut output_l = vec![0.0; 4];
        let mut output_r = vec![0.0; 4];
        graph.process(4, &input_l, &input_r, &mut output_l, &mut output_r);
        assert_eq!(output_l, vec![0.5; 4]);
    }

    #[test]
    fn set_control_changes_live_gain() {
        let pb = gain_pedalboard(1.0);
        let id = pb.get_all_plugins()[0].instance_id();
        let mut graph = PluginGraph::build(&pb, &catalog(), &BuiltinFactory, 48000, 64).unwrap();
        let index = graph.lookup_control_index(id, "gain").unwrap();
        graph.set_control(id, index, 0.25);

        let input_l = vec![1.0; 2];
        let input_r = vec![1.0; 2];
        let mut output_l = vec![0.0; 2];
        let mut output_r = vec![0.0; 2];
        graph.process(2, &input_l, &input_r, &mut output_l, &mut output_r);
        assert_eq!(output_l, vec![0.25; 2]);
    }

    #[test]
    fn bypass_disables_processing() {
        let pb = gain_pedalboard(0.1);
        let id = pb.get_all_plugins()[0].instance_id();
        let mut graph = PluginGraph::build(&pb, &catalog(), &BuiltinFactory, 48000, 64).unwrap();
        graph.set_bypass(id, false);

        let input_l = vec![1.0; 2];
        let input_r = vec![1.0; 2];
        let mut output_l = vec![0.0; 2];
        let mut output_r = vec![0.0; 2];
        graph.process(2, &input_l, &input_r, &mut output_l, &mut output_r);
        assert_eq!(output_l, vec![1.0; 2]);
    }

    #[test]
    fn unknown_plugin_uri_fails_build() {
        let pb = gain_pedalboard(1.0);
        let mut bad = pb.clone();
        if let Item::Plugin { plugin_uri, .. } = &mut bad.items[0] {
            *plugin_uri = "urn:unknown".to_string();
        }
        let err = PluginGraph::build(&bad, &catalog(), &BuiltinFactory, 48000, 64).unwrap_err();
        assert!(matches!(err, BuildError::UnknownPlugin { .. }));
    }

    #[test]
    fn vu_flush_resets_after_cadence() {
        let pb = gain_pedalboard(1.0);
        let id = pb.get_all_plugins()[0].instance_id();
        let mut graph = PluginGraph::build(&pb, &catalog(), &BuiltinFactory, 1000, 64).unwrap();
        graph.add_vu_subscription(id, 7);

        let input_l = vec![0.9; 50];
        let input_r = vec![0.9; 50];
        let mut output_l = vec![0.0; 50];
        let mut output_r = vec![0.0; 50];
        graph.process(50, &input_l, &input_r, &mut output_l, &mut output_r);
        // 50 frames at 1000 Hz = 50ms, exactly the flush cadence.
        let flushed = graph.drain_vu_flush(0);
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].input_max_l > 0.0);
        assert!(flushed[0].output_max_l > 0.0);
    }

    #[test]
    fn vu_capture_is_per_instance_not_the_graph_tail() {
        // First plugin silences the signal; the second's VU subscription
        // must see its own (silent) input/output, not the non-silent value
        // at the graph's external input.
        let mut pb = Pedalboard::new("test");
        let silencer = pb.alloc_instance_id();
        pb.items.push(plugin_item(silencer, GAIN_URI, 0.0));
        let passthrough = pb.alloc_instance_id();
        pb.items.push(plugin_item(passthrough, GAIN_URI, 1.0));

        let mut graph = PluginGraph::build(&pb, &catalog(), &BuiltinFactory, 1000, 64).unwrap();
        graph.add_vu_subscription(passthrough, 1);

        let input_l = vec![0.9; 50];
        let input_r = vec![0.9; 50];
        let mut output_l = vec![0.0; 50];
        let mut output_r = vec![0.0; 50];
        graph.process(50, &input_l, &input_r, &mut output_l, &mut output_r);

        let flushed = graph.drain_vu_flush(0);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].input_max_l, 0.0);
        assert_eq!(flushed[0].output_max_l, 0.0);
    }

    fn plugin_item(id: InstanceId, uri: &str, gain: f32) -> Item {
        Item::Plugin {
            instance_id: id,
            plugin_uri: uri.to_string(),
            enabled: true,
            use_mod_ui: false,
            control_values: vec![ControlValue::new("gain", gain)],
            state: Default::default(),
            lilv_preset_uri: None,
            path_properties: Default::default(),
            midi_bindings: Vec::new(),
            midi_channel_binding: None,
            title: None,
            color: None,
        }
    }
}
