use crate::ids::InstanceId;
use crate::pedalboard::Pedalboard;

/// One row of the top-level bank list.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BankIndexEntry {
    pub instance_id: InstanceId,
    pub name: String,
}

/// The ordered list of banks plus which one is selected. Persisted at
/// `banks/index.json`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BankIndex {
    pub selected_bank: Option<InstanceId>,
    pub entries: Vec<BankIndexEntry>,
    next_instance_id: u64,
}

impl BankIndex {
    pub fn has_name(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn add_bank(&mut self, after_id: Option<InstanceId>, name: impl Into<String>) -> InstanceId {
        self.next_instance_id += 1;
        let id = InstanceId::new(self.next_instance_id);
        let entry = BankIndexEntry { instance_id: id, name: name.into() };
        match after_id.and_then(|after| self.entries.iter().position(|e| e.instance_id == after)) {
            Some(pos) => self.entries.insert(pos + 1, entry),
            None => self.entries.push(entry),
        }
        id
    }

    pub fn move_bank(&mut self, from: usize, to: usize) {
        if from >= self.entries.len() || to >= self.entries.len() {
            return;
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
    }

    pub fn get(&self, id: InstanceId) -> Option<&BankIndexEntry> {
        self.entries.iter().find(|e| e.instance_id == id)
    }
}

/// One preset slot in a bank file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BankFileEntry {
    pub instance_id: InstanceId,
    pub preset: Pedalboard,
}

/// A single bank: its ordered preset list and the selected preset.
/// Persisted at `banks/<safe-name>.json`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BankFile {
    pub name: String,
    pub selected_preset: Option<InstanceId>,
    pub presets: Vec<BankFileEntry>,
    next_instance_id: u64,
}

impl BankFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selected_preset: None,
            presets: Vec::new(),
            next_instance_id: 0,
        }
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.presets.iter().any(|p| p.preset.name == name)
    }

    pub fn has_item(&self, id: InstanceId) -> bool {
        self.presets.iter().any(|p| p.instance_id == id)
    }

    /// Add a preset, erroring if its name collides with an existing one
    /// (names are unique within a bank, matching the original's
    /// `addPreset` behavior).
    pub fn add_preset(&mut self, preset: Pedalboard, after_id: Option<InstanceId>) -> Result<InstanceId, String> {
        if self.has_name(&preset.name) {
            return Err("A preset by that name already exists.".to_string());
        }
        self.next_instance_id += 1;
        let id = InstanceId::new(self.next_instance_id);
        let entry = BankFileEntry { instance_id: id, preset };
        match after_id.and_then(|after| self.presets.iter().position(|p| p.instance_id == after)) {
            Some(pos) => self.presets.insert(pos + 1, entry),
            None => self.presets.push(entry),
        }
        Ok(id)
    }

    pub fn rename_preset(&mut self, id: InstanceId, name: impl Into<String>) -> Result<(), String> {
        let name = name.into();
        if self.has_name(&name) {
            return Err("A preset by that name already exists.".to_string());
        }
        let Some(entry) = self.presets.iter_mut().find(|p| p.instance_id == id) else {
            return Err("Preset not found.".to_string());
        };
        entry.preset.name = name;
        Ok(())
    }

    /// Remove a preset, returning the id that should become selected if
    /// the removed preset was the current selection. If the bank would
    /// become empty, a default empty preset is inserted to preserve the
    /// "exactly one preset selected" invariant.
    pub fn delete_preset(&mut self, id: InstanceId) -> Result<InstanceId, String> {
        let Some(pos) = self.presets.iter().position(|p| p.instance_id == id) else {
            return Err("Preset not found.".to_string());
        };
        self.presets.remove(pos);

        if self.presets.is_empty() {
            let default_id = self.add_preset(Pedalboard::make_default(), None).expect("default name is unique");
            return Ok(default_id);
        }

        let new_selection = if pos < self.presets.len() {
            self.presets[pos].instance_id
        } else {
            self.presets[pos - 1].instance_id
        };
        Ok(new_selection)
    }

    pub fn move_preset(&mut self, from: usize, to: usize) {
        if from >= self.presets.len() || to >= self.presets.len() {
            return;
        }
        let entry = self.presets.remove(from);
        self.presets.insert(to, entry);
    }

    pub fn get(&self, id: InstanceId) -> Option<&BankFileEntry> {
        self.presets.iter().find(|p| p.instance_id == id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut BankFileEntry> {
        self.presets.iter_mut().find(|p| p.instance_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_preset_rejects_duplicate_name() {
        let mut bank = BankFile::new("Bank 1");
        bank.add_preset(Pedalboard::new("Clean"), None).unwrap();
        let err = bank.add_preset(Pedalboard::new("Clean"), None).unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn delete_last_preset_creates_default() {
        let mut bank = BankFile::new("Bank 1");
        let id = bank.add_preset(Pedalboard::new("Only"), None).unwrap();
        let new_selection = bank.delete_preset(id).unwrap();
        assert_eq!(bank.presets.len(), 1);
        assert_eq!(bank.presets[0].instance_id, new_selection);
    }

    #[test]
    fn bank_index_add_after_preserves_order() {
        let mut idx = BankIndex::default();
        let a = idx.add_bank(None, "A");
        let b = idx.add_bank(Some(a), "B");
        let c = idx.add_bank(Some(a), "C");
        let names: Vec<&str> = idx.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "B"]);
        assert_ne!(b, c);
    }
}
