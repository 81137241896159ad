//! Filesystem-backed persistence. Every operation here
//! runs on the service thread only; nothing in this module is realtime-safe
//! and nothing reads from another thread.
//!
//! Banks, presets, plugin presets, and uploads are each a JSON file under
//! a fixed directory layout, written with a write-temp-fsync-rename
//! discipline so a crash never leaves a partial file behind.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stompbox_audio::devices::AudioDeviceConfig;
use stompbox_types::{
    BankFile, BankIndex, InstanceId, MidiSystemBindings, Pedalboard, PluginPreset,
    PluginPresetIndex,
};

use crate::error::HostError;

/// Top-level settings blob persisted at `settings.json`:
/// audio device selection, favorites, MIDI system bindings, and an opaque
/// Jack settings blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub audio_device: AudioDeviceConfig,
    #[serde(default)]
    pub favorites: Vec<String>,
    #[serde(default)]
    pub midi_system_bindings: MidiSystemBindings,
    #[serde(default)]
    pub jack_server_settings: serde_json::Value,
}

/// A single entry of a `get_file_list` directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListEntry {
    pub name: String,
    pub relative_path: String,
    pub is_directory: bool,
}

pub struct Storage {
    data_root: PathBuf,
}

impl Storage {
    /// Opens (creating if necessary) the directory layout under
    /// `data_root`: `banks/`, `plugin_presets/`, `user_uploads/`.
    pub fn open(data_root: PathBuf) -> Result<Self, HostError> {
        fs::create_dir_all(data_root.join("banks"))?;
        fs::create_dir_all(data_root.join("plugin_presets"))?;
        fs::create_dir_all(data_root.join("user_uploads"))?;
        Ok(Self { data_root })
    }

    fn banks_dir(&self) -> PathBuf {
        self.data_root.join("banks")
    }

    fn plugin_presets_dir(&self) -> PathBuf {
        self.data_root.join("plugin_presets")
    }

    fn user_uploads_dir(&self) -> PathBuf {
        self.data_root.join("user_uploads")
    }

    fn bank_index_path(&self) -> PathBuf {
        self.banks_dir().join("index.json")
    }

    fn bank_file_path(&self, name: &str) -> PathBuf {
        self.banks_dir().join(format!("{}.json", safe_filename(name)))
    }

    fn plugin_preset_path(&self, plugin_uri: &str) -> PathBuf {
        self.plugin_presets_dir().join(format!("{}.json", safe_filename(plugin_uri)))
    }

    fn current_preset_path(&self) -> PathBuf {
        self.data_root.join("current_preset.json")
    }

    fn settings_path(&self) -> PathBuf {
        self.data_root.join("settings.json")
    }

    // ---- Bank index -----------------------------------------------

    pub fn load_bank_index(&self) -> Result<BankIndex, HostError> {
        read_json_or_default(&self.bank_index_path())
    }

    fn save_bank_index(&self, index: &BankIndex) -> Result<(), HostError> {
        atomic_write_json(&self.bank_index_path(), index)
    }

    // ---- Banks ------------------------------------------------------

    pub fn load_bank(&self, name: &str) -> Result<BankFile, HostError> {
        let path = self.bank_file_path(name);
        if !path.exists() {
            return Ok(BankFile::new(name));
        }
        read_json(&path)
    }

    pub fn save_bank(&self, bank: &BankFile) -> Result<(), HostError> {
        atomic_write_json(&self.bank_file_path(&bank.name), bank)
    }

    /// Removes a bank's file and its index entry. Returns the id that
    /// should become selected (the entry before the removed one, or the
    /// first remaining entry).
    pub fn delete_bank(&self, id: InstanceId) -> Result<Option<InstanceId>, HostError> {
        let mut index = self.load_bank_index()?;
        let Some(pos) = index.entries.iter().position(|e| e.instance_id == id) else {
            return Err(HostError::StateError("bank not found".to_string()));
        };
        let name = index.entries[pos].name.clone();
        index.entries.remove(pos);

        let new_selection = if !index.entries.is_empty() {
            Some(index.entries[pos.min(index.entries.len() - 1)].instance_id)
        } else {
            None
        };
        index.selected_bank = new_selection;
        self.save_bank_index(&index)?;

        let path = self.bank_file_path(&name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(new_selection)
    }

    pub fn move_bank(&self, from: usize, to: usize) -> Result<(), HostError> {
        let mut index = self.load_bank_index()?;
        index.move_bank(from, to);
        self.save_bank_index(&index)
    }

    pub fn rename_bank(&self, id: InstanceId, new_name: &str) -> Result<(), HostError> {
        let mut index = self.load_bank_index()?;
        if index.has_name(new_name) {
            return Err(HostError::StateError("a bank by that name already exists".to_string()));
        }
        let Some(entry) = index.entries.iter_mut().find(|e| e.instance_id == id) else {
            return Err(HostError::StateError("bank not found".to_string()));
        };
        let old_name = entry.name.clone();
        entry.name = new_name.to_string();

        let mut bank = self.load_bank(&old_name)?;
        bank.name = new_name.to_string();
        let old_path = self.bank_file_path(&old_name);
        self.save_bank(&bank)?;
        self.save_bank_index(&index)?;
        if old_path.exists() && old_path != self.bank_file_path(new_name) {
            fs::remove_file(old_path)?;
        }
        Ok(())
    }

    // ---- Presets (within a bank) -------------------------------------

    pub fn get_preset(&self, bank_name: &str, id: InstanceId) -> Result<Pedalboard, HostError> {
        let bank = self.load_bank(bank_name)?;
        bank.get(id)
            .map(|e| e.preset.clone())
            .ok_or_else(|| HostError::StateError("preset not found".to_string()))
    }

    /// Transient "unsaved edits" snapshot of the currently loaded
    /// pedalboard, independent of any bank.
    pub fn save_current_preset(&self, pedalboard: &Pedalboard) -> Result<(), HostError> {
        atomic_write_json(&self.current_preset_path(), pedalboard)
    }

    pub fn load_current_preset(&self) -> Result<Option<Pedalboard>, HostError> {
        let path = self.current_preset_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_json(&path)?))
    }

    pub fn save_current_preset_as(
        &self,
        bank_name: &str,
        pedalboard: Pedalboard,
        after_id: Option<InstanceId>,
    ) -> Result<InstanceId, HostError> {
        let mut bank = self.load_bank(bank_name)?;
        let id = bank
            .add_preset(pedalboard, after_id)
            .map_err(HostError::StateError)?;
        bank.selected_preset = Some(id);
        self.save_bank(&bank)?;
        Ok(id)
    }

    /// Deletes a preset, falling back to a default empty pedalboard if the
    /// bank would otherwise have no selectable preset.
    pub fn delete_preset(&self, bank_name: &str, id: InstanceId) -> Result<InstanceId, HostError> {
        let mut bank = self.load_bank(bank_name)?;
        let new_selection = bank.delete_preset(id).map_err(HostError::StateError)?;
        bank.selected_preset = Some(new_selection);
        self.save_bank(&bank)?;
        Ok(new_selection)
    }

    pub fn rename_preset(&self, bank_name: &str, id: InstanceId, name: &str) -> Result<(), HostError> {
        let mut bank = self.load_bank(bank_name)?;
        bank.rename_preset(id, name).map_err(HostError::StateError)?;
        self.save_bank(&bank)
    }

    pub fn copy_preset(&self, bank_name: &str, from: InstanceId, after_id: Option<InstanceId>) -> Result<InstanceId, HostError> {
        let mut bank = self.load_bank(bank_name)?;
        let source = bank
            .get(from)
            .ok_or_else(|| HostError::StateError("preset not found".to_string()))?
            .preset
            .clone();
        let mut copy = source;
        copy.name = unique_copy_name(&copy.name, |n| bank.has_name(n));
        let id = bank.add_preset(copy, after_id).map_err(HostError::StateError)?;
        self.save_bank(&bank)?;
        Ok(id)
    }

    // ---- Plugin presets ----------------------------------------------

    pub fn get_plugin_presets(&self, plugin_uri: &str) -> Result<Vec<PluginPreset>, HostError> {
        read_json_or_default(&self.plugin_preset_path(plugin_uri))
    }

    pub fn save_plugin_preset(
        &self,
        plugin_uri: &str,
        label: &str,
        control_values: BTreeMap<String, f32>,
        state: stompbox_types::PluginState,
    ) -> Result<InstanceId, HostError> {
        let mut presets: Vec<PluginPreset> = self.get_plugin_presets(plugin_uri)?;
        let mut index = self.load_plugin_preset_index()?;
        let id = InstanceId::new(index.alloc_instance_id());
        presets.push(PluginPreset {
            instance_id: id,
            label: label.to_string(),
            lilv_preset_uri: None,
            control_values,
            state,
        });
        self.save_plugin_preset_index(&index)?;
        atomic_write_json(&self.plugin_preset_path(plugin_uri), &presets)?;
        Ok(id)
    }

    #[allow(clippy::type_complexity)]
    pub fn load_plugin_preset_values(
        &self,
        plugin_uri: &str,
        preset_id: InstanceId,
    ) -> Result<(BTreeMap<String, f32>, stompbox_types::PluginState, Option<String>), HostError> {
        let presets = self.get_plugin_presets(plugin_uri)?;
        let preset = presets
            .into_iter()
            .find(|p| p.instance_id == preset_id)
            .ok_or_else(|| HostError::StateError("plugin preset not found".to_string()))?;
        Ok((preset.control_values, preset.state, preset.lilv_preset_uri))
    }

    pub fn copy_plugin_preset(&self, plugin_uri: &str, from: InstanceId) -> Result<InstanceId, HostError> {
        let mut presets = self.get_plugin_presets(plugin_uri)?;
        let mut index = self.load_plugin_preset_index()?;
        let source = presets
            .iter()
            .find(|p| p.instance_id == from)
            .cloned()
            .ok_or_else(|| HostError::StateError("plugin preset not found".to_string()))?;
        let new_id = InstanceId::new(index.alloc_instance_id());
        let mut copy = source;
        copy.instance_id = new_id;
        copy.label = unique_copy_name(&copy.label, |n| presets.iter().any(|p| p.label == n));
        presets.push(copy);
        self.save_plugin_preset_index(&index)?;
        atomic_write_json(&self.plugin_preset_path(plugin_uri), &presets)?;
        Ok(new_id)
    }

    /// Re-save a plugin's entire preset list (e.g. after reordering or a
    /// factory-preset re-index).
    pub fn update_plugin_presets(&self, plugin_uri: &str, presets: &[PluginPreset]) -> Result<(), HostError> {
        atomic_write_json(&self.plugin_preset_path(plugin_uri), presets)
    }

    fn load_plugin_preset_index(&self) -> Result<PluginPresetIndex, HostError> {
        read_json_or_default(&self.plugin_presets_dir().join("index.json"))
    }

    fn save_plugin_preset_index(&self, index: &PluginPresetIndex) -> Result<(), HostError> {
        atomic_write_json(&self.plugin_presets_dir().join("index.json"), index)
    }

    // ---- User uploads / file properties --------------------------------

    /// Lists files under `user_uploads/<relative_path>` whose extension is
    /// in `allowed_extensions` (case-insensitive), plus subdirectories.
    pub fn get_file_list(&self, relative_path: &str, allowed_extensions: &[String]) -> Result<Vec<FileListEntry>, HostError> {
        let dir = self.resolve_upload_path(relative_path)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                entries.push(FileListEntry {
                    relative_path: join_relative(relative_path, &name),
                    name,
                    is_directory: true,
                });
                continue;
            }
            let matches = allowed_extensions.is_empty()
                || allowed_extensions.iter().any(|ext| name.to_lowercase().ends_with(&ext.to_lowercase()));
            if matches {
                entries.push(FileListEntry {
                    relative_path: join_relative(relative_path, &name),
                    name,
                    is_directory: false,
                });
            }
        }
        Ok(entries)
    }

    /// Writes `bytes` to `user_uploads/<directory>/<name>`. Callers
    /// (`Model`) are responsible for checking that the currently loaded
    /// pedalboard has an item declaring `patch_property` before calling
    /// this — this method only enforces path containment.
    pub fn upload_user_file(&self, directory: &str, name: &str, bytes: &[u8]) -> Result<String, HostError> {
        let dir = self.resolve_upload_path(directory)?;
        fs::create_dir_all(&dir)?;
        let safe_name = safe_filename(name);
        let path = dir.join(&safe_name);
        atomic_write_bytes(&path, bytes)?;
        Ok(join_relative(directory, &safe_name))
    }

    pub fn rename_file_property_file(&self, relative_path: &str, new_name: &str) -> Result<String, HostError> {
        let path = self.resolve_upload_path(relative_path)?;
        let parent = path.parent().ok_or_else(|| HostError::InvalidRequest("invalid path".to_string()))?;
        let safe_name = safe_filename(new_name);
        let new_path = parent.join(&safe_name);
        fs::rename(&path, &new_path)?;
        let parent_rel = relative_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        Ok(join_relative(parent_rel, &safe_name))
    }

    pub fn copy_file_property_file(&self, relative_path: &str, new_name: &str) -> Result<String, HostError> {
        let path = self.resolve_upload_path(relative_path)?;
        let parent = path.parent().ok_or_else(|| HostError::InvalidRequest("invalid path".to_string()))?;
        let safe_name = safe_filename(new_name);
        let new_path = parent.join(&safe_name);
        fs::copy(&path, &new_path)?;
        let parent_rel = relative_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        Ok(join_relative(parent_rel, &safe_name))
    }

    pub fn delete_sample_file(&self, relative_path: &str) -> Result<(), HostError> {
        let path = self.resolve_upload_path(relative_path)?;
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn create_new_sample_directory(&self, relative_path: &str, name: &str) -> Result<String, HostError> {
        let parent = self.resolve_upload_path(relative_path)?;
        let safe_name = safe_filename(name);
        fs::create_dir_all(parent.join(&safe_name))?;
        Ok(join_relative(relative_path, &safe_name))
    }

    /// Resolves a relative path under `user_uploads/`, rejecting anything
    /// that would escape it (`..` components).
    fn resolve_upload_path(&self, relative_path: &str) -> Result<PathBuf, HostError> {
        let relative_path = relative_path.trim_start_matches('/');
        if relative_path.split('/').any(|part| part == "..") {
            return Err(HostError::InvalidRequest("path escapes user_uploads".to_string()));
        }
        Ok(self.user_uploads_dir().join(relative_path))
    }

    /// Converts an absolute on-disk path under `user_uploads/` to a
    /// portable abstract token (`{"wellKnown": dir, "path": rel}`), so
    /// presets referencing uploaded files survive a reinstall at a
    /// different data root.
    pub fn to_abstract_path_json(&self, absolute: &Path) -> Result<serde_json::Value, HostError> {
        let rel = absolute
            .strip_prefix(self.user_uploads_dir())
            .map_err(|_| HostError::InvalidRequest("path is not under user_uploads".to_string()))?;
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        let (well_known, path) = rel_str.split_once('/').unwrap_or((rel_str.as_str(), ""));
        Ok(serde_json::json!({ "wellKnown": well_known, "path": path }))
    }

    pub fn from_abstract_path_json(&self, value: &serde_json::Value) -> Result<PathBuf, HostError> {
        let well_known = value
            .get("wellKnown")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HostError::InvalidRequest("missing wellKnown".to_string()))?;
        let path = value.get("path").and_then(|v| v.as_str()).unwrap_or("");
        self.resolve_upload_path(&format!("{well_known}/{path}"))
    }

    // ---- Settings -------------------------------------------------------

    pub fn load_settings(&self) -> Result<Settings, HostError> {
        read_json_or_default(&self.settings_path())
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), HostError> {
        atomic_write_json(&self.settings_path(), settings)
    }

    pub fn get_favorites(&self) -> Result<Vec<String>, HostError> {
        Ok(self.load_settings()?.favorites)
    }

    pub fn set_favorites(&self, favorites: Vec<String>) -> Result<(), HostError> {
        let mut settings = self.load_settings()?;
        settings.favorites = favorites;
        self.save_settings(&settings)
    }

    pub fn get_system_midi_bindings(&self) -> Result<MidiSystemBindings, HostError> {
        Ok(self.load_settings()?.midi_system_bindings)
    }

    pub fn set_system_midi_bindings(&self, bindings: MidiSystemBindings) -> Result<(), HostError> {
        let mut settings = self.load_settings()?;
        settings.midi_system_bindings = bindings;
        self.save_settings(&settings)
    }

    /// Opaque blob; no Jack process management in scope.
    pub fn get_jack_server_settings(&self) -> Result<serde_json::Value, HostError> {
        Ok(self.load_settings()?.jack_server_settings)
    }

    pub fn set_jack_server_settings(&self, value: serde_json::Value) -> Result<(), HostError> {
        let mut settings = self.load_settings()?;
        settings.jack_server_settings = value;
        self.save_settings(&settings)
    }
}

fn unique_copy_name(base: &str, exists: impl Fn(&str) -> bool) -> String {
    let mut candidate = format!("{base} copy");
    let mut n = 2;
    while exists(&candidate) {
        candidate = format!("{base} copy {n}");
        n += 1;
    }
    candidate
}

fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Reversible ASCII-safe filename encoding: disallowed
/// characters are percent-escaped so arbitrary user-chosen names (bank
/// names, plugin URIs) become valid filenames on any filesystem.
fn safe_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.as_bytes() {
        match *byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(*byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Write-temp-then-fsync-then-rename: the target file is
/// never observed in a partially written state.
fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), HostError> {
    let dir = path.parent().ok_or_else(|| HostError::StorageError("path has no parent".to_string()))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| HostError::StorageError(e.to_string()))?;
    Ok(())
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), HostError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, HostError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn read_json_or_default<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, HostError> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stompbox_types::Pedalboard;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().to_path_buf()).unwrap();
        (dir, storage)
    }

    #[test]
    fn save_and_load_bank_round_trips() {
        let (_dir, storage) = storage();
        let mut bank = BankFile::new("Bank 1");
        bank.add_preset(Pedalboard::new("Clean"), None).unwrap();
        storage.save_bank(&bank).unwrap();

        let loaded = storage.load_bank("Bank 1").unwrap();
        assert_eq!(loaded.presets.len(), 1);
        assert_eq!(loaded.presets[0].preset.name, "Clean");
    }

    #[test]
    fn missing_bank_file_loads_as_empty() {
        let (_dir, storage) = storage();
        let bank = storage.load_bank("Nonexistent").unwrap();
        assert_eq!(bank.presets.len(), 0);
    }

    #[test]
    fn rename_bank_rejects_duplicate_name() {
        let (_dir, storage) = storage();
        let mut index = BankIndex::default();
        let a = index.add_bank(None, "A");
        let _b = index.add_bank(None, "B");
        storage.save_bank_index(&index).unwrap();
        storage.save_bank(&BankFile::new("A")).unwrap();
        storage.save_bank(&BankFile::new("B")).unwrap();

        let err = storage.rename_bank(a, "B").unwrap_err();
        assert!(matches!(err, HostError::StateError(_)));
    }

    #[test]
    fn delete_preset_falls_back_to_default_when_bank_empties() {
        let (_dir, storage) = storage();
        let mut bank = BankFile::new("Bank 1");
        let id = bank.add_preset(Pedalboard::new("Only"), None).unwrap();
        storage.save_bank(&bank).unwrap();

        let new_selection = storage.delete_preset("Bank 1", id).unwrap();
        let reloaded = storage.load_bank("Bank 1").unwrap();
        assert_eq!(reloaded.presets.len(), 1);
        assert_eq!(reloaded.presets[0].instance_id, new_selection);
    }

    #[test]
    fn upload_user_file_rejects_path_traversal() {
        let (_dir, storage) = storage();
        let err = storage.upload_user_file("../../etc", "passwd", b"x").unwrap_err();
        assert!(matches!(err, HostError::InvalidRequest(_)));
    }

    #[test]
    fn upload_then_list_file() {
        let (_dir, storage) = storage();
        storage.upload_user_file("ir", "cab.wav", b"RIFF").unwrap();
        let listing = storage.get_file_list("ir", &["wav".to_string()]).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "cab.wav");
    }

    #[test]
    fn abstract_path_round_trips() {
        let (_dir, storage) = storage();
        storage.upload_user_file("ir", "cab.wav", b"RIFF").unwrap();
        let absolute = storage.user_uploads_dir().join("ir").join("cab.wav");
        let abstract_json = storage.to_abstract_path_json(&absolute).unwrap();
        let resolved = storage.from_abstract_path_json(&abstract_json).unwrap();
        assert_eq!(resolved, absolute);
    }

    #[test]
    fn favorites_round_trip_through_settings() {
        let (_dir, storage) = storage();
        storage.set_favorites(vec!["urn:a".to_string(), "urn:b".to_string()]).unwrap();
        assert_eq!(storage.get_favorites().unwrap(), vec!["urn:a", "urn:b"]);
    }

    #[test]
    fn atomic_write_never_leaves_a_partial_file_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        atomic_write_bytes(&path, b"{\"first\":true}").unwrap();
        atomic_write_bytes(&path, b"{\"second\":true}").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"second\":true}");
    }
}
