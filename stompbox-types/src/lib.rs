//! # stompbox-types
//!
//! Shared data model for the stompbox pedalboard host: the pedalboard
//! graph, snapshots, bank/preset indices, MIDI bindings, and the traits
//! through which the host consumes an external plugin catalog.
//!
//! Every type here is a pure, serde-serializable value type. Nothing in
//! this crate touches threads, files, or sockets — that belongs to
//! `stompbox-audio`, `stompbox-core`, and `stompbox-net` respectively.

mod atom;
mod bank;
mod catalog;
mod ids;
mod midi;
mod pedalboard;
mod preset;
mod snapshot;
mod vu;

pub use atom::{Atom, UriMap};
pub use bank::{BankFile, BankFileEntry, BankIndex, BankIndexEntry};
pub use catalog::{ControlPortInfo, FilePropertyInfo, PluginCatalog, PluginInfo, StaticCatalog};
pub use ids::InstanceId;
pub use midi::{
    MidiBinding, MidiBindingType, MidiChannelBinding, MidiDeviceSelection, MidiSystemBindings,
    RotaryControlType, SwitchControlType,
};
pub use pedalboard::{ControlValue, Item, Pedalboard, PluginState, SplitType};
pub use preset::{PluginPreset, PluginPresetIndex, PluginPresetIndexEntry};
pub use snapshot::{Snapshot, SnapshotValue};
pub use vu::VuAccumulator;
