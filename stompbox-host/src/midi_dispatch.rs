//! MIDI polling loop: drains `MidiInputManager` on a steady tick and feeds
//! each event to `Model::handle_midi_event`, which owns the binding ladder
//! (control binding, channel binding, system binding).
//! Kept separate from the control-plane pump thread in `stompbox-net`
//! since MIDI input has nothing to do with the WebSocket return-ring drain.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use stompbox_core::host::Model;
use stompbox_core::midi::MidiInputManager;

const MIDI_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Connects to the first available MIDI input port, if any, and spawns a
/// background thread polling it into `model`. Returns immediately;
/// absence of any MIDI port is not an error.
pub fn spawn(model: Arc<Model>) {
    thread::spawn(move || {
        let mut manager = MidiInputManager::new();
        manager.refresh_ports();
        let port = manager.list_ports().first().map(|p| p.index);

        let Some(port) = port else {
            info!(target: "midi", "no MIDI input ports available");
            return;
        };

        if let Err(e) = manager.connect(port) {
            warn!(target: "midi", "failed to connect MIDI input: {e}");
            return;
        }
        let device_name = manager.connected_port_name().unwrap_or("unknown").to_string();
        info!(target: "midi", "listening for MIDI input on {device_name}");

        loop {
            for event in manager.poll_events() {
                model.handle_midi_event(&device_name, event);
            }
            thread::sleep(MIDI_POLL_INTERVAL);
        }
    });
}
