/// How a `MidiBinding` responds to incoming MIDI: not bound, bound to a
/// note (latching a control on note-on), or bound to a continuous
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MidiBindingType {
    None,
    Note,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RotaryControlType {
    Linear,
    Circular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SwitchControlType {
    Latch,
    Momentary,
}

/// Binds one pedalboard-item control to an incoming MIDI note or
/// controller message. Mirrors the original `MidiBinding` field set.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MidiBinding {
    pub symbol: String,
    /// `-1` means omni (accept on any channel).
    pub channel: i32,
    pub binding_type: MidiBindingType,
    pub note: u8,
    pub control: u8,
    pub min_value: f32,
    pub max_value: f32,
    pub rotary_scale: f32,
    pub linear_control_type: RotaryControlType,
    pub switch_control_type: SwitchControlType,
}

impl MidiBinding {
    pub const CHANNEL_OMNI: i32 = -1;

    /// A binding for a system-level control (shutdown, next preset, ...)
    /// rather than a pedalboard item control.
    pub fn system_binding(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn wants_channel(&self, incoming_channel: u8) -> bool {
        self.channel < 0 || self.channel as u8 == incoming_channel
    }
}

impl Default for MidiBinding {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            channel: Self::CHANNEL_OMNI,
            binding_type: MidiBindingType::None,
            note: 60,
            control: 1,
            min_value: 0.0,
            max_value: 1.0,
            rotary_scale: 1.0,
            linear_control_type: RotaryControlType::Linear,
            switch_control_type: SwitchControlType::Latch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MidiDeviceSelection {
    Any,
    None,
    List(Vec<String>),
}

/// Per-item MIDI routing filter: which device(s) and channel this item's
/// [`MidiBinding`]s respond to.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MidiChannelBinding {
    pub device_selection: MidiDeviceSelection,
    /// `-1` means omni.
    pub channel: i32,
    pub accept_program_changes: bool,
    pub accept_common_messages: bool,
}

impl MidiChannelBinding {
    pub const CHANNEL_OMNI: i32 = -1;

    pub fn wants_message(&self, status: u8) -> bool {
        if status < 0xF0 {
            self.channel < 0 || (status & 0x0F) as i32 == self.channel
        } else {
            self.accept_common_messages
        }
    }

    pub fn wants_program_change(&self, status: u8) -> bool {
        if !self.accept_program_changes {
            return false;
        }
        self.channel < 0 || (status & 0x0F) as i32 == self.channel
    }

    pub fn wants_device(&self, device_name: &str) -> bool {
        match &self.device_selection {
            MidiDeviceSelection::Any => true,
            MidiDeviceSelection::None => false,
            MidiDeviceSelection::List(names) => names.iter().any(|n| n == device_name),
        }
    }
}

impl Default for MidiChannelBinding {
    fn default() -> Self {
        Self {
            device_selection: MidiDeviceSelection::Any,
            channel: Self::CHANNEL_OMNI,
            accept_program_changes: true,
            accept_common_messages: true,
        }
    }
}

/// Process-wide MIDI-to-action bindings (next/previous preset, panic,
/// shutdown, hotspot toggle). The bindings themselves are fully modeled;
/// the side effects they trigger are opaque calls into external
/// collaborators (see DESIGN.md open question 3).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MidiSystemBindings {
    pub next_preset: Option<MidiBinding>,
    pub previous_preset: Option<MidiBinding>,
    pub next_bank: Option<MidiBinding>,
    pub previous_bank: Option<MidiBinding>,
    pub shutdown: Option<MidiBinding>,
    pub hotspot_toggle: Option<MidiBinding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omni_binding_accepts_every_channel() {
        let b = MidiBinding::default();
        assert!(b.wants_channel(0));
        assert!(b.wants_channel(15));
    }

    #[test]
    fn channel_binding_rejects_other_channels() {
        let mut b = MidiBinding::default();
        b.channel = 3;
        assert!(b.wants_channel(3));
        assert!(!b.wants_channel(4));
    }

    #[test]
    fn device_selection_none_rejects_everything() {
        let cb = MidiChannelBinding {
            device_selection: MidiDeviceSelection::None,
            ..Default::default()
        };
        assert!(!cb.wants_device("any-device"));
    }

    #[test]
    fn device_selection_list_matches_by_name() {
        let cb = MidiChannelBinding {
            device_selection: MidiDeviceSelection::List(vec!["Korg nanoKONTROL2".into()]),
            ..Default::default()
        };
        assert!(cb.wants_device("Korg nanoKONTROL2"));
        assert!(!cb.wants_device("Other Device"));
    }
}
