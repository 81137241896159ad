//! MIDI input transport: port enumeration, connection, and raw-byte
//! parsing. The parsing logic is transport-agnostic and owes nothing to
//! any particular binding scheme. Binding dispatch (matching a parsed event
//! against a pedalboard's `MidiBinding`/`MidiChannelBinding` or the
//! process-wide `MidiSystemBindings`) lives in `host::Model`, not here.

use midir::{MidiInput, MidiInputConnection};
use std::sync::mpsc::{self, Receiver, Sender};

/// One MIDI event with the timestamp midir hands back (microseconds since
/// an arbitrary, driver-specific epoch).
#[derive(Debug, Clone, Copy)]
pub struct MidiEvent {
    pub timestamp_us: u64,
    pub kind: MidiEventKind,
}

#[derive(Debug, Clone, Copy)]
pub enum MidiEventKind {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: i16 },
    ProgramChange { channel: u8, program: u8 },
    Aftertouch { channel: u8, pressure: u8 },
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
}

impl MidiEvent {
    pub fn new(timestamp_us: u64, kind: MidiEventKind) -> Self {
        Self { timestamp_us, kind }
    }

    /// The MIDI channel this event was sent on, `0..16`, if it has one.
    pub fn channel(&self) -> u8 {
        match self.kind {
            MidiEventKind::NoteOn { channel, .. }
            | MidiEventKind::NoteOff { channel, .. }
            | MidiEventKind::ControlChange { channel, .. }
            | MidiEventKind::PitchBend { channel, .. }
            | MidiEventKind::ProgramChange { channel, .. }
            | MidiEventKind::Aftertouch { channel, .. }
            | MidiEventKind::PolyAftertouch { channel, .. } => channel,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// Owns a midir connection and drains it into a plain channel so the
/// service thread can poll on its own schedule instead of blocking inside
/// midir's callback.
pub struct MidiInputManager {
    midi_in: Option<MidiInput>,
    connection: Option<MidiInputConnection<()>>,
    event_receiver: Option<Receiver<MidiEvent>>,
    event_sender: Option<Sender<MidiEvent>>,
    connected_port_name: Option<String>,
    available_ports: Vec<MidiPortInfo>,
}

impl MidiInputManager {
    pub fn new() -> Self {
        let midi_in = MidiInput::new("stompbox").ok();
        Self {
            midi_in,
            connection: None,
            event_receiver: None,
            event_sender: None,
            connected_port_name: None,
            available_ports: Vec::new(),
        }
    }

    pub fn refresh_ports(&mut self) {
        self.available_ports.clear();
        if let Some(ref midi_in) = self.midi_in {
            let ports = midi_in.ports();
            for (index, port) in ports.iter().enumerate() {
                if let Ok(name) = midi_in.port_name(port) {
                    self.available_ports.push(MidiPortInfo { index, name });
                }
            }
        }
    }

    pub fn list_ports(&self) -> &[MidiPortInfo] {
        &self.available_ports
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connected_port_name(&self) -> Option<&str> {
        self.connected_port_name.as_deref()
    }

    pub fn connect(&mut self, port_index: usize) -> Result<(), String> {
        self.disconnect();

        let midi_in = MidiInput::new("stompbox").map_err(|e| e.to_string())?;
        let ports = midi_in.ports();
        if port_index >= ports.len() {
            return Err(format!("invalid port index: {port_index}"));
        }

        let port = &ports[port_index];
        let port_name = midi_in.port_name(port).unwrap_or_else(|_| "Unknown".to_string());

        let (tx, rx) = mpsc::channel();
        self.event_sender = Some(tx.clone());
        self.event_receiver = Some(rx);

        let connection = midi_in
            .connect(
                port,
                "stompbox-input",
                move |timestamp, message, _| {
                    if let Some(kind) = parse_midi_message(message) {
                        let _ = tx.send(MidiEvent::new(timestamp, kind));
                    }
                },
                (),
            )
            .map_err(|e| e.to_string())?;

        self.connection = Some(connection);
        self.connected_port_name = Some(port_name);
        self.midi_in = MidiInput::new("stompbox").ok();

        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.event_receiver = None;
        self.event_sender = None;
        self.connected_port_name = None;
    }

    /// Drain every event received since the last poll. Non-blocking.
    pub fn poll_events(&self) -> Vec<MidiEvent> {
        let mut events = Vec::new();
        if let Some(ref rx) = self.event_receiver {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        events
    }
}

impl Default for MidiInputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MidiInputManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn parse_midi_message(data: &[u8]) -> Option<MidiEventKind> {
    if data.is_empty() {
        return None;
    }

    let status = data[0];
    let channel = status & 0x0F;
    let message_type = status & 0xF0;

    match message_type {
        0x80 => {
            if data.len() >= 3 {
                Some(MidiEventKind::NoteOff { channel, note: data[1] })
            } else {
                None
            }
        }
        0x90 => {
            if data.len() >= 3 {
                let velocity = data[2];
                if velocity == 0 {
                    Some(MidiEventKind::NoteOff { channel, note: data[1] })
                } else {
                    Some(MidiEventKind::NoteOn { channel, note: data[1], velocity })
                }
            } else {
                None
            }
        }
        0xA0 => {
            if data.len() >= 3 {
                Some(MidiEventKind::PolyAftertouch { channel, note: data[1], pressure: data[2] })
            } else {
                None
            }
        }
        0xB0 => {
            if data.len() >= 3 {
                Some(MidiEventKind::ControlChange { channel, controller: data[1], value: data[2] })
            } else {
                None
            }
        }
        0xC0 => {
            if data.len() >= 2 {
                Some(MidiEventKind::ProgramChange { channel, program: data[1] })
            } else {
                None
            }
        }
        0xD0 => {
            if data.len() >= 2 {
                Some(MidiEventKind::Aftertouch { channel, pressure: data[1] })
            } else {
                None
            }
        }
        0xE0 => {
            if data.len() >= 3 {
                let lsb = data[1] as i16;
                let msb = data[2] as i16;
                let value = ((msb << 7) | lsb) - 8192;
                Some(MidiEventKind::PitchBend { channel, value })
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_note_on() {
        let event = parse_midi_message(&[0x90, 60, 100]).unwrap();
        assert!(matches!(event, MidiEventKind::NoteOn { channel: 0, note: 60, velocity: 100 }));
    }

    #[test]
    fn parse_note_on_velocity_zero_is_note_off() {
        let event = parse_midi_message(&[0x90, 60, 0]).unwrap();
        assert!(matches!(event, MidiEventKind::NoteOff { .. }));
    }

    #[test]
    fn parse_control_change() {
        let event = parse_midi_message(&[0xB0, 1, 64]).unwrap();
        assert!(matches!(event, MidiEventKind::ControlChange { channel: 0, controller: 1, value: 64 }));
    }

    #[test]
    fn parse_pitch_bend_center() {
        let event = parse_midi_message(&[0xE0, 0x00, 0x40]).unwrap();
        assert!(matches!(event, MidiEventKind::PitchBend { value: 0, .. }));
    }

    #[test]
    fn parse_empty_or_short_messages_return_none() {
        assert!(parse_midi_message(&[]).is_none());
        assert!(parse_midi_message(&[0x90, 60]).is_none());
    }

    #[test]
    fn event_channel_accessor_matches_every_variant() {
        let event = MidiEvent::new(0, MidiEventKind::ControlChange { channel: 3, controller: 7, value: 1 });
        assert_eq!(event.channel(), 3);
    }
}
