//! `AudioHost` (C5): owns the realtime thread and translates pedalboard-
//! level operations into forward-ring messages, including the
//! structure-preserving fast-path decision.

use std::sync::Arc;

use stompbox_audio::devices::AudioDeviceConfig;
use stompbox_audio::driver::{AudioDriver, OpenError};
use stompbox_audio::graph::{BuildError, PluginGraph};
use stompbox_audio::messages::{ForwardMessage, ReturnMessage, SnapshotRebind};
use stompbox_audio::{PluginFactory, PopError};
use stompbox_types::{InstanceId, Item, Pedalboard, PluginCatalog};

use crate::error::HostError;

/// Default round-trip budget for a `PatchGet`/`PatchSet` request before the
/// caller falls back to a cached value.
const DEFAULT_PATCH_TIMEOUT_SECS: f32 = 0.4;

/// Which path `set_pedalboard` took, surfaced for callers that need to
/// assert on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathOutcome {
    FastPath,
    Rebuilt,
}

pub struct AudioHost {
    driver: AudioDriver,
    catalog: Arc<dyn PluginCatalog>,
    factory: Arc<dyn PluginFactory>,
    sample_rate: u32,
    max_frames: usize,
    /// The last pedalboard actually pushed to the realtime thread, used
    /// only to decide the fast-path-vs-rebuild question on the next call;
    /// the authoritative pedalboard lives in `Model`.
    current: Pedalboard,
    scratch: Vec<u8>,
    next_request_id: u64,
}

impl AudioHost {
    /// Opens the duplex device named by `config` (or the dummy driver) and
    /// builds the first graph from `pedalboard`. Returns once the realtime
    /// thread is running.
    pub fn open(
        config: &AudioDeviceConfig,
        catalog: Arc<dyn PluginCatalog>,
        factory: Arc<dyn PluginFactory>,
        pedalboard: &Pedalboard,
        max_frames: usize,
    ) -> Result<Self, HostError> {
        let graph = PluginGraph::build(pedalboard, catalog.as_ref(), factory.as_ref(), config.sample_rate, max_frames)
            .map_err(build_error_to_host_error)?;
        let driver = AudioDriver::open(config, graph).map_err(open_error_to_host_error)?;
        Ok(Self {
            driver,
            catalog,
            factory,
            sample_rate: config.sample_rate,
            max_frames,
            current: pedalboard.deep_copy(),
            scratch: Vec::new(),
            next_request_id: 1,
        })
    }

    /// Tears down the current driver and reopens against `config`, rebuilding
    /// the graph from the pedalboard last pushed. Used both for a deliberate
    /// device change and by the audio-fault retry ladder.
    pub fn reopen(&mut self, config: &AudioDeviceConfig) -> Result<(), HostError> {
        let graph = PluginGraph::build(&self.current, self.catalog.as_ref(), self.factory.as_ref(), config.sample_rate, self.max_frames)
            .map_err(build_error_to_host_error)?;
        let driver = AudioDriver::open(config, graph).map_err(open_error_to_host_error)?;
        self.driver = driver;
        self.sample_rate = config.sample_rate;
        Ok(())
    }

    /// Structure-identical fast path: if `new_pb` has the same topology as the
    /// pedalboard last pushed, rebind values in place via `ApplySnapshot`;
    /// otherwise build a fresh graph and `ReplaceGraph`.
    pub fn set_pedalboard(&mut self, new_pb: &Pedalboard) -> Result<FastPathOutcome, HostError> {
        if self.current.is_structurally_identical(new_pb) && !self.plugin_state_changed(new_pb) {
            let rebinds = self.build_snapshot_rebinds(new_pb);
            self.push(ForwardMessage::ApplySnapshot(Box::new(rebinds)))?;
            self.current = new_pb.deep_copy();
            Ok(FastPathOutcome::FastPath)
        } else {
            let graph = PluginGraph::build(new_pb, self.catalog.as_ref(), self.factory.as_ref(), self.sample_rate, self.max_frames)
                .map_err(build_error_to_host_error)?;
            self.push(ForwardMessage::ReplaceGraph(Box::new(graph)))?;
            self.current = new_pb.deep_copy();
            Ok(FastPathOutcome::Rebuilt)
        }
    }

    /// Resolves `symbol` against `pedalboard`'s item for `instance_id` and
    /// pushes the matching realtime control index. A no-op if the instance
    /// or control doesn't resolve (mirrors `Pedalboard::set_control`'s own
    /// silent no-op for an unknown id).
    pub fn set_control(&mut self, pedalboard: &Pedalboard, instance_id: InstanceId, symbol: &str, value: f32) -> Result<(), HostError> {
        if let Some(control_index) = self.lookup_control_index(pedalboard, instance_id, symbol) {
            self.push(ForwardMessage::SetControl { instance_id, control_index, value })?;
        }
        Ok(())
    }

    pub fn set_bypass(&mut self, instance_id: InstanceId, enabled: bool) -> Result<(), HostError> {
        self.push(ForwardMessage::SetBypass { instance_id, enabled })
    }

    pub fn set_input_volume_db(&mut self, db: f32) -> Result<(), HostError> {
        self.push(ForwardMessage::SetInputVolumeDb(db))
    }

    pub fn set_output_volume_db(&mut self, db: f32) -> Result<(), HostError> {
        self.push(ForwardMessage::SetOutputVolumeDb(db))
    }

    pub fn monitor_port(&mut self, instance_id: InstanceId, port_symbol_index: u32, handle: u64, update_rate_hz: u32) -> Result<(), HostError> {
        self.push(ForwardMessage::MonitorPort { instance_id, port_symbol_index, handle, update_rate_hz })
    }

    pub fn unmonitor_port(&mut self, handle: u64) -> Result<(), HostError> {
        self.push(ForwardMessage::UnmonitorPort(handle))
    }

    pub fn add_vu_subscription(&mut self, instance_id: InstanceId, handle: u64) -> Result<(), HostError> {
        self.push(ForwardMessage::AddVuSubscription { instance_id, handle })
    }

    pub fn remove_vu_subscription(&mut self, handle: u64) -> Result<(), HostError> {
        self.push(ForwardMessage::RemoveVuSubscription(handle))
    }

    /// Allocates a request id and posts a `PatchGet`. The caller is
    /// responsible for waiting on the matching `ReturnMessage::PatchReply`;
    /// this only covers the forward-ring half.
    pub fn push_patch_get(&mut self, instance_id: InstanceId, property_urid: u32) -> Result<u64, HostError> {
        let request_id = self.alloc_request_id();
        let timeout_frames = (self.sample_rate as f32 * DEFAULT_PATCH_TIMEOUT_SECS) as u32;
        self.push(ForwardMessage::PatchGet { request_id, instance_id, property_urid, timeout_frames })?;
        Ok(request_id)
    }

    pub fn push_patch_set(&mut self, instance_id: InstanceId, property_urid: u32, atom_bytes: Vec<u8>) -> Result<u64, HostError> {
        let request_id = self.alloc_request_id();
        let timeout_frames = (self.sample_rate as f32 * DEFAULT_PATCH_TIMEOUT_SECS) as u32;
        self.push(ForwardMessage::PatchSet { request_id, instance_id, property_urid, atom_bytes: Box::new(atom_bytes), timeout_frames })?;
        Ok(request_id)
    }

    /// Non-blocking: pops one return-ring message, if any.
    pub fn poll_return(&self) -> Result<ReturnMessage, PopError> {
        stompbox_audio::messages::pop_return(self.driver.return_rx())
    }

    pub fn has_fatal_error(&self) -> bool {
        self.driver.has_fatal_error()
    }

    pub fn is_dummy(&self) -> bool {
        self.driver.is_dummy()
    }

    pub fn xrun_count(&self) -> u64 {
        self.driver.xrun_count()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// True if any plugin's `state.update_count` differs between the
    /// pedalboard last pushed and `new_pb`. Checked only once structural
    /// identity already holds, so the two plugin lists line up one-to-one
    /// by position. Per DESIGN.md open question 1 / spec §9, a state
    /// change always forces a rebuild — the realtime thread has no
    /// per-plugin in-place restore capability to query.
    fn plugin_state_changed(&self, new_pb: &Pedalboard) -> bool {
        self.current
            .get_all_plugins()
            .into_iter()
            .zip(new_pb.get_all_plugins())
            .any(|(old, new)| match (old, new) {
                (Item::Plugin { state: old_state, .. }, Item::Plugin { state: new_state, .. }) => {
                    old_state.update_count != new_state.update_count
                }
                _ => false,
            })
    }

    fn lookup_control_index(&self, pedalboard: &Pedalboard, instance_id: InstanceId, symbol: &str) -> Option<u32> {
        let plugin_uri = pedalboard.get_all_plugins().into_iter().find_map(|item| match item {
            Item::Plugin { instance_id: id, plugin_uri, .. } if *id == instance_id => Some(plugin_uri.clone()),
            _ => None,
        })?;
        let info = self.catalog.lookup(&plugin_uri)?;
        info.control_ports.into_iter().find(|p| p.symbol == symbol).map(|p| p.index)
    }

    fn alloc_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn push(&mut self, msg: ForwardMessage) -> Result<(), HostError> {
        stompbox_audio::messages::push_forward(self.driver.forward_tx(), msg, &mut self.scratch)
            .map_err(|_| HostError::AudioFault("forward ring full".to_string()))
    }

    /// Control symbols are pre-resolved to indices on the service thread
    /// (`SnapshotRebind`'s doc comment); this is the one place that
    /// happens, against the same catalog `PluginGraph::build_item` would
    /// use, so the resolved indices match whatever graph is actually live.
    fn build_snapshot_rebinds(&self, pedalboard: &Pedalboard) -> Vec<SnapshotRebind> {
        pedalboard
            .get_all_plugins()
            .into_iter()
            .filter_map(|item| match item {
                Item::Plugin { instance_id, plugin_uri, enabled, control_values, .. } => {
                    let info = self.catalog.lookup(plugin_uri)?;
                    let control_values = control_values
                        .iter()
                        .filter_map(|cv| info.control_ports.iter().find(|p| p.symbol == cv.symbol).map(|p| (p.index, cv.value)))
                        .collect();
                    Some(SnapshotRebind { instance_id: *instance_id, enabled: *enabled, control_values })
                }
                _ => None,
            })
            .collect()
    }
}

fn build_error_to_host_error(e: BuildError) -> HostError {
    match e {
        BuildError::UnknownPlugin { instance_id, plugin_uri } => {
            HostError::StateError(format!("unknown plugin {plugin_uri} for instance {instance_id}"))
        }
        BuildError::FactoryRefused { instance_id, plugin_uri } => {
            HostError::StateError(format!("plugin factory refused to instantiate {plugin_uri} for instance {instance_id}"))
        }
    }
}

fn open_error_to_host_error(e: OpenError) -> HostError {
    HostError::AudioFault(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stompbox_audio::devices::DUMMY_DEVICE_PREFIX;
    use stompbox_audio::plugin::{BuiltinFactory, GAIN_URI};
    use stompbox_types::{ControlValue, PluginState, StaticCatalog};

    fn dummy_config() -> AudioDeviceConfig {
        AudioDeviceConfig {
            input_device: Some(format!("{DUMMY_DEVICE_PREFIX}in")),
            output_device: Some(format!("{DUMMY_DEVICE_PREFIX}out")),
            sample_rate: 48000,
            period_frames: 32,
            period_count: 2,
        }
    }

    fn gain_catalog() -> Arc<dyn PluginCatalog> {
        Arc::new(StaticCatalog::new(vec![stompbox_types::PluginInfo {
            uri: GAIN_URI.to_string(),
            name: "Gain".to_string(),
            input_ports: 1,
            output_ports: 1,
            control_ports: vec![stompbox_types::ControlPortInfo {
                symbol: "gain".to_string(),
                index: 0,
                default: 1.0,
                min: 0.0,
                max: 4.0,
            }],
            has_midi_input: false,
            file_properties: vec![],
            factory_presets: vec![],
        }]))
    }

    fn gain_item(id: u64) -> Item {
        Item::Plugin {
            instance_id: InstanceId::new(id),
            plugin_uri: GAIN_URI.to_string(),
            enabled: true,
            use_mod_ui: false,
            control_values: vec![ControlValue::new("gain", 1.0)],
            state: PluginState::default(),
            lilv_preset_uri: None,
            path_properties: Default::default(),
            midi_bindings: Vec::new(),
            midi_channel_binding: None,
            title: None,
            color: None,
        }
    }

    #[test]
    fn identical_topology_takes_the_fast_path() {
        let mut pb = Pedalboard::new("t");
        let id = pb.alloc_instance_id();
        pb.items.push(gain_item(id.get()));
        let mut host = AudioHost::open(&dummy_config(), gain_catalog(), Arc::new(BuiltinFactory), &pb, 64).unwrap();

        let mut edited = pb.deep_copy();
        edited.set_control(id, "gain", 0.5);
        let outcome = host.set_pedalboard(&edited).unwrap();
        assert_eq!(outcome, FastPathOutcome::FastPath);
    }

    #[test]
    fn state_update_triggers_rebuild_even_when_structurally_identical() {
        let mut pb = Pedalboard::new("t");
        let id = pb.alloc_instance_id();
        pb.items.push(gain_item(id.get()));
        let mut host = AudioHost::open(&dummy_config(), gain_catalog(), Arc::new(BuiltinFactory), &pb, 64).unwrap();

        let mut restored = pb.deep_copy();
        if let Item::Plugin { state, .. } = restored.items.get_mut(0).unwrap() {
            state.update_count += 1;
        }
        assert!(host.current.is_structurally_identical(&restored));
        let outcome = host.set_pedalboard(&restored).unwrap();
        assert_eq!(outcome, FastPathOutcome::Rebuilt);
    }

    #[test]
    fn inserted_item_triggers_rebuild() {
        let mut pb = Pedalboard::new("t");
        let id = pb.alloc_instance_id();
        pb.items.push(gain_item(id.get()));
        let mut host = AudioHost::open(&dummy_config(), gain_catalog(), Arc::new(BuiltinFactory), &pb, 64).unwrap();

        let mut replaced = pb.deep_copy();
        let new_id = replaced.alloc_instance_id();
        replaced.items.insert(0, gain_item(new_id.get()));
        let outcome = host.set_pedalboard(&replaced).unwrap();
        assert_eq!(outcome, FastPathOutcome::Rebuilt);
    }
}
