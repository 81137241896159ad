//! Startup sequencing: crash-on-load guard plus the catalog
//! and plugin factory `Model::open` needs. No LV2 discovery ships here
//! — the catalog is a small built-in set
//! paired with `stompbox_audio::plugin::BuiltinFactory`'s dummy/test
//! plugins, exactly the fixtures `stompbox-core`'s own tests use.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::warn;

use stompbox_audio::plugin::{BuiltinFactory, GAIN_URI, PASSTHROUGH_URI, TEST_FAULT_URI};
use stompbox_core::config::Config;
use stompbox_core::host::{Model, NullSystemControl};
use stompbox_types::{ControlPortInfo, PluginCatalog, PluginInfo, StaticCatalog};

use crate::system_control::ProcessSystemControl;

const LOADING_SENTINEL: &str = ".loading";

/// The built-in catalog: the three plugins `stompbox-audio`'s dummy
/// factory can actually instantiate. A real deployment supplies an
/// LV2-backed `PluginCatalog` from outside this crate.
fn builtin_catalog() -> Arc<dyn PluginCatalog> {
    Arc::new(StaticCatalog::new(vec![
        PluginInfo {
            uri: PASSTHROUGH_URI.to_string(),
            name: "Passthrough".to_string(),
            input_ports: 1,
            output_ports: 1,
            control_ports: vec![],
            has_midi_input: false,
            file_properties: vec![],
            factory_presets: vec![],
        },
        PluginInfo {
            uri: GAIN_URI.to_string(),
            name: "Gain".to_string(),
            input_ports: 1,
            output_ports: 1,
            control_ports: vec![ControlPortInfo { symbol: "gain".to_string(), index: 0, default: 1.0, min: 0.0, max: 4.0 }],
            has_midi_input: false,
            file_properties: vec![],
            factory_presets: vec![],
        },
        PluginInfo {
            uri: TEST_FAULT_URI.to_string(),
            name: "Test Fault".to_string(),
            input_ports: 1,
            output_ports: 1,
            control_ports: vec![],
            has_midi_input: false,
            file_properties: vec![],
            factory_presets: vec![],
        },
    ]))
}

/// If the sentinel left over from an abnormal exit is present, delete the
/// saved current preset so `Model::open` falls back to the built-in empty
/// pedalboard instead of replaying whatever preset was loading when the
/// process died. Creates a fresh
/// sentinel either way; callers must call [`clear_sentinel`] once startup
/// completes.
fn arm_crash_guard(data_root: &Path) -> std::io::Result<()> {
    let sentinel = data_root.join(LOADING_SENTINEL);
    if sentinel.exists() {
        warn!(target: "setup", "previous run did not exit cleanly; starting with an empty pedalboard");
        let current_preset = data_root.join("current_preset.json");
        let _ = fs::remove_file(&current_preset);
    }
    fs::create_dir_all(data_root)?;
    fs::write(&sentinel, b"")
}

fn clear_sentinel(data_root: &Path) {
    let _ = fs::remove_file(data_root.join(LOADING_SENTINEL));
}

/// Opens storage, arms the crash-on-load guard, and opens `Model` against
/// the configured audio device. The sentinel is cleared on success so a
/// clean future start sees the normal saved-preset path.
pub fn open_model(config: &Config) -> Result<Arc<Model>, stompbox_core::HostError> {
    let data_root = config.data_root();
    arm_crash_guard(&data_root).map_err(stompbox_core::HostError::from)?;

    let result = Model::open(
        data_root.clone(),
        config.audio_device(),
        builtin_catalog(),
        Arc::new(BuiltinFactory),
        Arc::new(ProcessSystemControl::new()),
        4096,
    );

    if result.is_ok() {
        clear_sentinel(&data_root);
    }
    result.map(Arc::new)
}

#[allow(dead_code)]
fn null_system_control() -> Arc<dyn stompbox_core::host::SystemControl> {
    Arc::new(NullSystemControl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_guard_clears_the_saved_preset_when_armed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let current_preset = dir.path().join("current_preset.json");
        fs::write(&current_preset, b"{}").unwrap();

        arm_crash_guard(dir.path()).unwrap();
        assert!(current_preset.exists());
        assert!(dir.path().join(LOADING_SENTINEL).exists());

        arm_crash_guard(dir.path()).unwrap();
        assert!(!current_preset.exists());

        clear_sentinel(dir.path());
        assert!(!dir.path().join(LOADING_SENTINEL).exists());
    }
}
