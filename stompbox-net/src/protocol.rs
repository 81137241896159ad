//! ControlProtocol (C9): frame grammar over the bidirectional WebSocket
//! transport. A stateless codec — nothing here touches a
//! socket or `Model`; `Session` (see [`crate::session`]) is the only thing
//! that calls into this module.
//!
//! Every frame is a two-element JSON array `[header, body]`. `header` is
//! `{ message, reply?, replyTo? }`; `body` is message-specific and decoded
//! only once `header.message` picks which [`ClientMessage`] variant it is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stompbox_types::{Atom, InstanceId, MidiSystemBindings, Pedalboard};

/// `{ message, reply?, replyTo? }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "replyTo")]
    pub reply_to: Option<u64>,
}

/// The wire representation of one frame: serializes/deserializes as the
/// two-element array, not as a `{header, body}`
/// object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame(pub FrameHeader, pub Value);

impl Frame {
    pub fn request(message: impl Into<String>, reply_to: Option<u64>, body: impl Serialize) -> Self {
        Frame(
            FrameHeader { message: message.into(), reply: None, reply_to },
            serde_json::to_value(body).unwrap_or(Value::Null),
        )
    }

    /// A reply frame: same message name, `reply` echoes the inbound
    /// frame's `replyTo`.
    pub fn reply(message: impl Into<String>, reply: Option<u64>, body: impl Serialize) -> Self {
        Frame(
            FrameHeader { message: message.into(), reply, reply_to: None },
            serde_json::to_value(body).unwrap_or(Value::Null),
        )
    }

    /// The canonical error response: `{message: "error"}`
    /// with a string body.
    pub fn error(reply: Option<u64>, text: impl Into<String>) -> Self {
        Frame(
            FrameHeader { message: "error".to_string(), reply, reply_to: None },
            Value::String(text.into()),
        )
    }

    /// A broadcast notification: carries neither `reply` nor `replyTo`.
    pub fn notify(message: impl Into<String>, body: impl Serialize) -> Self {
        Frame(
            FrameHeader { message: message.into(), reply: None, reply_to: None },
            serde_json::to_value(body).unwrap_or(Value::Null),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message {0:?}")]
    UnknownMessage(String),
    #[error("malformed body for {message}: {source}")]
    BadBody { message: String, source: serde_json::Error },
}

/// One decoded inbound request, already matched against the message
/// catalog (non-exhaustive).
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Hello { client_name: String },
    CurrentPedalboard,
    UpdateCurrentPedalboard { pedalboard: Pedalboard },
    SetControl { instance_id: InstanceId, symbol: String, value: f32 },
    PreviewControl { instance_id: InstanceId, symbol: String, value: f32 },
    SetInputVolume { db: f32 },
    SetOutputVolume { db: f32 },
    SetPedalboardItemEnable { instance_id: InstanceId, enabled: bool },
    SetPedalboardItemTitle { instance_id: InstanceId, title: Option<String>, color: Option<String> },
    SetSnapshot { index: usize },
    SetJackSettings { value: serde_json::Value },
    SaveCurrentPreset,
    SaveCurrentPresetAs { bank_name: String, preset_name: String, after_id: Option<InstanceId> },
    LoadPreset { id: InstanceId },
    DeletePresetItem { bank_name: String, id: InstanceId },
    RenamePresetItem { bank_name: String, id: InstanceId, name: String },
    CopyPreset { bank_name: String, from: InstanceId, after_id: Option<InstanceId> },
    MoveBank { from: usize, to: usize },
    OpenBank { name: String },
    RenameBank { id: InstanceId, name: String },
    DeleteBankItem { id: InstanceId },
    LoadPluginPreset { instance_id: InstanceId, plugin_uri: String, preset_id: InstanceId },
    CopyPluginPreset { plugin_uri: String, from: InstanceId },
    GetPluginPresets { plugin_uri: String },
    AddVuSubscription { instance_id: InstanceId },
    RemoveVuSubscription { handle: u64 },
    MonitorPort { instance_id: InstanceId, port_symbol_index: u32, update_rate_hz: u32 },
    UnmonitorPort { handle: u64 },
    GetPatchProperty { instance_id: InstanceId, uri: String },
    SetPatchProperty { instance_id: InstanceId, uri: String, value: Atom },
    ListenForMidiEvent,
    CancelListenForMidiEvent,
    MonitorPatchProperty { instance_id: InstanceId, uri: String },
    CancelMonitorPatchProperty { handle: u64 },
    GetFavorites,
    SetFavorites { favorites: Vec<String> },
    GetSystemMidiBindings,
    SetSystemMidiBindings { bindings: MidiSystemBindings },
    Shutdown,
    Restart,
}

macro_rules! body {
    ($message:expr, $body:expr) => {
        serde_json::from_value($body).map_err(|source| DecodeError::BadBody { message: $message.to_string(), source })
    };
}

impl ClientMessage {
    /// Decodes `frame.1` (the body) according to `frame.0.message`. Returns
    /// [`DecodeError::UnknownMessage`] for anything outside the catalog —
    /// the caller turns that into the wire-level `"error"` response.
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let message = frame.0.message.as_str();
        let body = frame.1.clone();
        Ok(match message {
            "hello" | "ehlo" => {
                #[derive(Deserialize)]
                struct B {
                    client_name: String,
                }
                let b: B = body!(message, body)?;
                ClientMessage::Hello { client_name: b.client_name }
            }
            "currentPedalboard" => ClientMessage::CurrentPedalboard,
            "updateCurrentPedalboard" => {
                #[derive(Deserialize)]
                struct B {
                    pedalboard: Pedalboard,
                }
                let b: B = body!(message, body)?;
                ClientMessage::UpdateCurrentPedalboard { pedalboard: b.pedalboard }
            }
            "setControl" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    symbol: String,
                    value: f32,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetControl { instance_id: b.instance_id, symbol: b.symbol, value: b.value }
            }
            "previewControl" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    symbol: String,
                    value: f32,
                }
                let b: B = body!(message, body)?;
                ClientMessage::PreviewControl { instance_id: b.instance_id, symbol: b.symbol, value: b.value }
            }
            "setInputVolume" => {
                #[derive(Deserialize)]
                struct B {
                    db: f32,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetInputVolume { db: b.db }
            }
            "setOutputVolume" => {
                #[derive(Deserialize)]
                struct B {
                    db: f32,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetOutputVolume { db: b.db }
            }
            "setPedalboardItemEnable" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    enabled: bool,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetPedalboardItemEnable { instance_id: b.instance_id, enabled: b.enabled }
            }
            "setPedalboardItemTitle" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    title: Option<String>,
                    color: Option<String>,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetPedalboardItemTitle { instance_id: b.instance_id, title: b.title, color: b.color }
            }
            "setSnapshot" => {
                #[derive(Deserialize)]
                struct B {
                    index: usize,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetSnapshot { index: b.index }
            }
            "setJackSettings" => {
                #[derive(Deserialize)]
                struct B {
                    value: serde_json::Value,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetJackSettings { value: b.value }
            }
            "saveCurrentPreset" => ClientMessage::SaveCurrentPreset,
            "saveCurrentPresetAs" => {
                #[derive(Deserialize)]
                struct B {
                    bank_name: String,
                    preset_name: String,
                    #[serde(default)]
                    after_id: Option<InstanceId>,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SaveCurrentPresetAs { bank_name: b.bank_name, preset_name: b.preset_name, after_id: b.after_id }
            }
            "loadPreset" => {
                #[derive(Deserialize)]
                struct B {
                    id: InstanceId,
                }
                let b: B = body!(message, body)?;
                ClientMessage::LoadPreset { id: b.id }
            }
            "deletePresetItem" => {
                #[derive(Deserialize)]
                struct B {
                    bank_name: String,
                    id: InstanceId,
                }
                let b: B = body!(message, body)?;
                ClientMessage::DeletePresetItem { bank_name: b.bank_name, id: b.id }
            }
            "renamePresetItem" => {
                #[derive(Deserialize)]
                struct B {
                    bank_name: String,
                    id: InstanceId,
                    name: String,
                }
                let b: B = body!(message, body)?;
                ClientMessage::RenamePresetItem { bank_name: b.bank_name, id: b.id, name: b.name }
            }
            "copyPreset" => {
                #[derive(Deserialize)]
                struct B {
                    bank_name: String,
                    from: InstanceId,
                    #[serde(default)]
                    after_id: Option<InstanceId>,
                }
                let b: B = body!(message, body)?;
                ClientMessage::CopyPreset { bank_name: b.bank_name, from: b.from, after_id: b.after_id }
            }
            "moveBank" => {
                #[derive(Deserialize)]
                struct B {
                    from: usize,
                    to: usize,
                }
                let b: B = body!(message, body)?;
                ClientMessage::MoveBank { from: b.from, to: b.to }
            }
            "openBank" => {
                #[derive(Deserialize)]
                struct B {
                    name: String,
                }
                let b: B = body!(message, body)?;
                ClientMessage::OpenBank { name: b.name }
            }
            "renameBank" => {
                #[derive(Deserialize)]
                struct B {
                    id: InstanceId,
                    name: String,
                }
                let b: B = body!(message, body)?;
                ClientMessage::RenameBank { id: b.id, name: b.name }
            }
            "deleteBankItem" => {
                #[derive(Deserialize)]
                struct B {
                    id: InstanceId,
                }
                let b: B = body!(message, body)?;
                ClientMessage::DeleteBankItem { id: b.id }
            }
            "loadPluginPreset" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    plugin_uri: String,
                    preset_id: InstanceId,
                }
                let b: B = body!(message, body)?;
                ClientMessage::LoadPluginPreset { instance_id: b.instance_id, plugin_uri: b.plugin_uri, preset_id: b.preset_id }
            }
            "copyPluginPreset" => {
                #[derive(Deserialize)]
                struct B {
                    plugin_uri: String,
                    from: InstanceId,
                }
                let b: B = body!(message, body)?;
                ClientMessage::CopyPluginPreset { plugin_uri: b.plugin_uri, from: b.from }
            }
            "getPluginPresets" => {
                #[derive(Deserialize)]
                struct B {
                    plugin_uri: String,
                }
                let b: B = body!(message, body)?;
                ClientMessage::GetPluginPresets { plugin_uri: b.plugin_uri }
            }
            "addVuSubscription" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                }
                let b: B = body!(message, body)?;
                ClientMessage::AddVuSubscription { instance_id: b.instance_id }
            }
            "removeVuSubscription" => {
                #[derive(Deserialize)]
                struct B {
                    handle: u64,
                }
                let b: B = body!(message, body)?;
                ClientMessage::RemoveVuSubscription { handle: b.handle }
            }
            "monitorPort" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    port_symbol_index: u32,
                    #[serde(default = "default_update_rate")]
                    update_rate_hz: u32,
                }
                let b: B = body!(message, body)?;
                ClientMessage::MonitorPort { instance_id: b.instance_id, port_symbol_index: b.port_symbol_index, update_rate_hz: b.update_rate_hz }
            }
            "unmonitorPort" => {
                #[derive(Deserialize)]
                struct B {
                    handle: u64,
                }
                let b: B = body!(message, body)?;
                ClientMessage::UnmonitorPort { handle: b.handle }
            }
            "getPatchProperty" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    uri: String,
                }
                let b: B = body!(message, body)?;
                ClientMessage::GetPatchProperty { instance_id: b.instance_id, uri: b.uri }
            }
            "setPatchProperty" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    uri: String,
                    value: Atom,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetPatchProperty { instance_id: b.instance_id, uri: b.uri, value: b.value }
            }
            "listenForMidiEvent" => ClientMessage::ListenForMidiEvent,
            "cancelListenForMidiEvent" => ClientMessage::CancelListenForMidiEvent,
            "monitorPatchProperty" => {
                #[derive(Deserialize)]
                struct B {
                    instance_id: InstanceId,
                    uri: String,
                }
                let b: B = body!(message, body)?;
                ClientMessage::MonitorPatchProperty { instance_id: b.instance_id, uri: b.uri }
            }
            "cancelMonitorPatchProperty" => {
                #[derive(Deserialize)]
                struct B {
                    handle: u64,
                }
                let b: B = body!(message, body)?;
                ClientMessage::CancelMonitorPatchProperty { handle: b.handle }
            }
            "getFavorites" => ClientMessage::GetFavorites,
            "setFavorites" => {
                #[derive(Deserialize)]
                struct B {
                    favorites: Vec<String>,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetFavorites { favorites: b.favorites }
            }
            "getSystemMidiBindings" => ClientMessage::GetSystemMidiBindings,
            "setSystemMidiBindings" => {
                #[derive(Deserialize)]
                struct B {
                    bindings: MidiSystemBindings,
                }
                let b: B = body!(message, body)?;
                ClientMessage::SetSystemMidiBindings { bindings: b.bindings }
            }
            "shutdown" => ClientMessage::Shutdown,
            "restart" => ClientMessage::Restart,
            other => return Err(DecodeError::UnknownMessage(other.to_string())),
        })
    }
}

fn default_update_rate() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_set_control() {
        let frame = Frame::request(
            "setControl",
            Some(1),
            serde_json::json!({ "instance_id": 3, "symbol": "gain", "value": 0.5 }),
        );
        let msg = ClientMessage::decode(&frame).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SetControl { instance_id, symbol, value }
                if instance_id == InstanceId::new(3) && symbol == "gain" && value == 0.5
        ));
    }

    #[test]
    fn unknown_message_is_rejected() {
        let frame = Frame::request("doesNotExist", None, Value::Null);
        assert!(matches!(ClientMessage::decode(&frame), Err(DecodeError::UnknownMessage(_))));
    }

    #[test]
    fn frame_round_trips_as_two_element_array() {
        let frame = Frame::request("hello", Some(7), serde_json::json!({ "client_name": "browser" }));
        let encoded = serde_json::to_string(&frame).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert!(value.is_array());
        assert_eq!(value.as_array().unwrap().len(), 2);

        let decoded: Frame = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.0.message, "hello");
        assert_eq!(decoded.0.reply_to, Some(7));
    }

    #[test]
    fn error_frame_has_error_message_and_string_body() {
        let frame = Frame::error(Some(4), "duplicate name");
        assert_eq!(frame.0.message, "error");
        assert_eq!(frame.0.reply, Some(4));
        assert_eq!(frame.1, Value::String("duplicate name".to_string()));
    }
}
