//! `AudioHost` (C5) and `Model` (C7): the orchestrator that drives the
//! realtime audio thread and the session-facing façade control-plane
//! connections call into.
//!
//! `AudioHost` owns the realtime thread (`stompbox_audio::AudioDriver`) and
//! the structure-preserving fast-path decision. `Model` wraps it with the
//! service-side pedalboard/bank/settings state, the subscriber registry, and
//! a single recursive mutex so that broadcast fan-out
//! can snapshot the subscriber set without racing a re-entrant call.

mod audio_host;
mod model;
mod subscriptions;

pub use audio_host::{AudioHost, FastPathOutcome};
pub use model::Model;
pub use subscriptions::SubscriptionKind;

use std::sync::Arc;

use stompbox_types::InstanceId;

/// Identifies one `Session` (C8) connection, unique for the lifetime of the
/// process. Allocated by `stompbox-net` and handed to `Model` on `hello`.
pub type ClientId = u64;

/// Who a [`Notification`] is delivered to.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Every session currently registered, except `exclude` if given.
    All { exclude: Option<ClientId> },
    One(ClientId),
}

/// One event Model hands to the sessions that should hear about it.
/// `stompbox-net`'s `ControlProtocol` maps each variant onto a wire message.
#[derive(Debug, Clone)]
pub enum Notification {
    ControlChanged { instance_id: InstanceId, symbol: String, value: f32 },
    InputVolumeChanged { db: f32 },
    OutputVolumeChanged { db: f32 },
    ItemEnabledChanged { instance_id: InstanceId, enabled: bool },
    ItemTitleChanged { instance_id: InstanceId, title: Option<String>, color: Option<String> },
    PedalboardChanged(Box<stompbox_types::Pedalboard>),
    VuUpdate { instance_id: InstanceId, input_max_l: f32, input_max_r: f32, output_max_l: f32, output_max_r: f32 },
    PortMonitorUpdate { handle: u64, value: f32 },
    PatchPropertyChanged { instance_id: InstanceId, uri: String, atom_bytes: Vec<u8> },
    /// Direct reply to one session's `getPatchProperty`/`setPatchProperty`
    /// request.
    /// `error` is set instead of `value` when even the cached fallback
    /// came up empty ("No response").
    PatchPropertyReply { request_id: u64, uri: String, value: Option<Vec<u8>>, error: Option<String> },
    MidiValueLearned { instance_id: InstanceId, port_index: u32, value: f32 },
    /// Reply to one session's `listenForMidiEvent` once the next raw MIDI
    /// message arrives.
    MidiLearnResult { cc0: u8, cc1: u8, cc2: u8 },
    AudioFault(String),
    PluginFault { instance_id: InstanceId, text: String },
}

/// One addressed notification as it leaves `Model`.
pub struct Outgoing {
    pub target: Target,
    pub notification: Notification,
}

/// Callback a `Session` registers with `Model` on `hello` so broadcasts can
/// reach it without `Model` holding a socket or a channel of its own.
/// Invoked outside `Model`'s internal lock.
pub type SessionSink = Arc<dyn Fn(Notification) + Send + Sync>;

/// Opaque side effects the MIDI system-binding ladder triggers.
/// A host binary supplies the real
/// implementation (systemd, a GPIO line for the hotspot relay, ...); tests
/// use a recording stub.
pub trait SystemControl: Send + Sync {
    fn shutdown(&self);
    fn restart(&self);
    fn set_hotspot_enabled(&self, enabled: bool);
}

/// A `SystemControl` that does nothing, for configurations without the
/// hardware it would otherwise drive (e.g. running against the dummy audio
/// device in tests).
pub struct NullSystemControl;

impl SystemControl for NullSystemControl {
    fn shutdown(&self) {
        log::warn!(target: "host", "shutdown requested but no SystemControl is configured");
    }
    fn restart(&self) {
        log::warn!(target: "host", "restart requested but no SystemControl is configured");
    }
    fn set_hotspot_enabled(&self, _enabled: bool) {
        log::warn!(target: "host", "hotspot toggle requested but no SystemControl is configured");
    }
}
