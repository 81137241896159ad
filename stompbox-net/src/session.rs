//! Session (C8): the per-connection state a `ControlProtocol` dispatch loop
//! runs against. Owns nothing the realtime thread touches — a session is
//! pure service-thread bookkeeping plus a handle back into [`Model`].
//!
//! VU and port-monitor traffic is frequent and droppable; everything else
//! is a direct reply or a one-shot broadcast and is never dropped. Because
//! the transport here is one blocking WebSocket per connection rather than
//! a buffered outbox, "droppable" is expressed as an in-flight cap instead
//! of a queue-depth cap: at most [`VU_INFLIGHT_CAP`] VU deliveries may be in
//! the middle of a socket write at once, process-wide.

use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tungstenite::WebSocket;

use stompbox_core::host::{ClientId, Model, Notification};
use stompbox_types::{Atom, Pedalboard};

use crate::framing::{read_frame, write_frame, FrameIoError};
use crate::protocol::{ClientMessage, DecodeError, Frame};

/// Process-wide ceiling on concurrent in-flight VU deliveries: beyond this, a VU update is dropped rather than queued, since a
/// stale meter reading is worthless once a fresher one exists.
const VU_INFLIGHT_CAP: usize = 5;

/// Shared across every `Session` in the process so the cap in
/// [`VU_INFLIGHT_CAP`] is enforced globally, not per-connection.
#[derive(Clone, Default)]
pub struct VuBudget(Arc<AtomicUsize>);

impl VuBudget {
    pub fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    /// Reserves one slot; `None` means the cap is already saturated and the
    /// caller should drop this update.
    fn try_acquire(&self) -> Option<VuPermit> {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current >= VU_INFLIGHT_CAP {
                return None;
            }
            if self.0.compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                return Some(VuPermit(self.0.clone()));
            }
        }
    }
}

struct VuPermit(Arc<AtomicUsize>);

impl Drop for VuPermit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs one connection to completion: registers with `model`, alternates
/// between reading client requests and letting broadcasts arrive through
/// the sink closure, and unregisters on disconnect.
pub fn run(model: Arc<Model>, read_ws: WebSocket<TcpStream>, write_ws: Arc<Mutex<WebSocket<TcpStream>>>, vu_budget: VuBudget) {
    let sink_write = write_ws.clone();
    let sink_budget = vu_budget;
    let client_id = model.register_session(Arc::new(move |notification: Notification| {
        deliver(&sink_write, &sink_budget, notification);
    }));
    info!(target: "session", "client {client_id} connected");

    let result = read_loop(&model, client_id, read_ws, &write_ws);
    if let Err(err) = result {
        debug!(target: "session", "client {client_id} read loop ended: {err}");
    }

    model.unregister_session(client_id);
    info!(target: "session", "client {client_id} disconnected");
}

fn read_loop(
    model: &Arc<Model>,
    client_id: ClientId,
    mut read_ws: WebSocket<TcpStream>,
    write_ws: &Arc<Mutex<WebSocket<TcpStream>>>,
) -> Result<(), FrameIoError> {
    loop {
        let frame = read_frame(&mut read_ws)?;
        let reply_to = frame.0.reply_to;
        let message_name = frame.0.message.clone();

        let outcome = ClientMessage::decode(&frame).map(|msg| dispatch(model, client_id, msg));
        let reply = match outcome {
            Ok(Ok(body)) => Frame::reply(&message_name, reply_to, body),
            Ok(Err(host_err)) => Frame::error(reply_to, host_err.wire_message()),
            Err(DecodeError::UnknownMessage(name)) => Frame::error(reply_to, format!("unknown message {name:?}")),
            Err(DecodeError::BadBody { message, source }) => Frame::error(reply_to, format!("malformed body for {message}: {source}")),
        };

        let mut ws = write_ws.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        write_frame(&mut ws, &reply)?;
    }
}

/// Executes one decoded request against `model` and builds its reply body.
/// Requests with no meaningful reply payload answer with `null`.
fn dispatch(model: &Model, client_id: ClientId, msg: ClientMessage) -> Result<serde_json::Value, stompbox_core::HostError> {
    use serde_json::json;

    Ok(match msg {
        ClientMessage::Hello { client_name } => {
            info!(target: "session", "client {client_id} said hello as {client_name:?}");
            json!({ "pedalboard": model.current_pedalboard(), "bankName": model.current_bank_name() })
        }
        ClientMessage::CurrentPedalboard => json!(model.current_pedalboard()),
        ClientMessage::UpdateCurrentPedalboard { pedalboard } => {
            model.update_current_pedalboard(client_id, pedalboard)?;
            serde_json::Value::Null
        }
        ClientMessage::SetControl { instance_id, symbol, value } => {
            model.set_control(client_id, instance_id, &symbol, value)?;
            serde_json::Value::Null
        }
        ClientMessage::PreviewControl { instance_id, symbol, value } => {
            model.preview_control(client_id, instance_id, &symbol, value)?;
            serde_json::Value::Null
        }
        ClientMessage::SetInputVolume { db } => {
            model.set_input_volume_db(client_id, db)?;
            serde_json::Value::Null
        }
        ClientMessage::SetOutputVolume { db } => {
            model.set_output_volume_db(client_id, db)?;
            serde_json::Value::Null
        }
        ClientMessage::SetPedalboardItemEnable { instance_id, enabled } => {
            model.set_item_enabled(client_id, instance_id, enabled)?;
            serde_json::Value::Null
        }
        ClientMessage::SetPedalboardItemTitle { instance_id, title, color } => {
            model.set_item_title(client_id, instance_id, title, color);
            serde_json::Value::Null
        }
        ClientMessage::SetSnapshot { index } => {
            model.set_snapshot(client_id, index)?;
            serde_json::Value::Null
        }
        ClientMessage::SetJackSettings { value } => {
            model.set_jack_server_settings(value)?;
            serde_json::Value::Null
        }
        ClientMessage::SaveCurrentPreset => {
            model.save_current_preset()?;
            serde_json::Value::Null
        }
        ClientMessage::SaveCurrentPresetAs { bank_name, preset_name, after_id } => {
            let id = model.save_current_preset_as(&bank_name, &preset_name, after_id)?;
            json!({ "id": id })
        }
        ClientMessage::LoadPreset { id } => {
            model.load_preset(client_id, id)?;
            serde_json::Value::Null
        }
        ClientMessage::DeletePresetItem { bank_name, id } => {
            let new_selection = model.delete_preset_item(&bank_name, id)?;
            json!({ "selected": new_selection })
        }
        ClientMessage::RenamePresetItem { bank_name, id, name } => {
            model.rename_preset_item(&bank_name, id, &name)?;
            serde_json::Value::Null
        }
        ClientMessage::CopyPreset { bank_name, from, after_id } => {
            let id = model.copy_preset(&bank_name, from, after_id)?;
            json!({ "id": id })
        }
        ClientMessage::MoveBank { from, to } => {
            model.move_bank(from, to)?;
            serde_json::Value::Null
        }
        ClientMessage::OpenBank { name } => {
            model.open_bank(client_id, &name)?;
            serde_json::Value::Null
        }
        ClientMessage::RenameBank { id, name } => {
            model.rename_bank(id, &name)?;
            serde_json::Value::Null
        }
        ClientMessage::DeleteBankItem { id } => {
            let new_selection = model.delete_bank_item(id)?;
            json!({ "selected": new_selection })
        }
        ClientMessage::LoadPluginPreset { instance_id, plugin_uri, preset_id } => {
            model.load_plugin_preset(client_id, instance_id, &plugin_uri, preset_id)?;
            serde_json::Value::Null
        }
        ClientMessage::CopyPluginPreset { plugin_uri, from } => {
            let id = model.copy_plugin_preset(&plugin_uri, from)?;
            json!({ "id": id })
        }
        ClientMessage::GetPluginPresets { plugin_uri } => {
            json!(model.get_plugin_presets(&plugin_uri)?)
        }
        ClientMessage::AddVuSubscription { instance_id } => {
            let handle = model.add_vu_subscription(client_id, instance_id)?;
            json!({ "handle": handle })
        }
        ClientMessage::RemoveVuSubscription { handle } => {
            model.remove_vu_subscription(handle)?;
            serde_json::Value::Null
        }
        ClientMessage::MonitorPort { instance_id, port_symbol_index, update_rate_hz } => {
            let handle = model.monitor_port(client_id, instance_id, port_symbol_index, update_rate_hz)?;
            json!({ "handle": handle })
        }
        ClientMessage::UnmonitorPort { handle } => {
            model.unmonitor_port(handle)?;
            serde_json::Value::Null
        }
        ClientMessage::GetPatchProperty { instance_id, uri } => {
            let request_id = model.send_get_patch_property(client_id, instance_id, &uri)?;
            json!({ "requestId": request_id })
        }
        ClientMessage::SetPatchProperty { instance_id, uri, value } => {
            let request_id = model.send_set_patch_property(client_id, instance_id, &uri, &value)?;
            json!({ "requestId": request_id })
        }
        ClientMessage::ListenForMidiEvent => {
            model.listen_for_midi_event(client_id);
            serde_json::Value::Null
        }
        ClientMessage::CancelListenForMidiEvent => {
            model.cancel_listen_for_midi_event(client_id);
            serde_json::Value::Null
        }
        ClientMessage::MonitorPatchProperty { instance_id, uri } => {
            let handle = model.monitor_patch_property(client_id, instance_id, &uri);
            json!({ "handle": handle })
        }
        ClientMessage::CancelMonitorPatchProperty { handle } => {
            model.cancel_monitor_patch_property(handle);
            serde_json::Value::Null
        }
        ClientMessage::GetFavorites => json!(model.get_favorites()?),
        ClientMessage::SetFavorites { favorites } => {
            model.set_favorites(favorites)?;
            serde_json::Value::Null
        }
        ClientMessage::GetSystemMidiBindings => json!(model.get_system_midi_bindings()),
        ClientMessage::SetSystemMidiBindings { bindings } => {
            model.set_system_midi_bindings(bindings)?;
            serde_json::Value::Null
        }
        ClientMessage::Shutdown => {
            model.shutdown();
            serde_json::Value::Null
        }
        ClientMessage::Restart => {
            model.restart();
            serde_json::Value::Null
        }
    })
}

/// Turns one [`Notification`] into a wire frame and writes it, applying the
/// VU in-flight cap. Runs on whatever thread `Model::dispatch` calls the
/// sink from (the pump thread, or re-entrantly from a session's own reader
/// thread via the reentrant mutex) — never under `Model`'s lock.
fn deliver(write_ws: &Arc<Mutex<WebSocket<TcpStream>>>, vu_budget: &VuBudget, notification: Notification) {
    let _permit = if matches!(notification, Notification::VuUpdate { .. }) {
        match vu_budget.try_acquire() {
            Some(permit) => Some(permit),
            None => return,
        }
    } else {
        None
    };

    let frame = notification_to_frame(&notification);
    let mut ws = match write_ws.lock() {
        Ok(ws) => ws,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(err) = write_frame(&mut ws, &frame) {
        warn!(target: "session", "dropping notification, socket write failed: {err}");
    }
}

fn notification_to_frame(notification: &Notification) -> Frame {
    use serde_json::json;

    match notification {
        Notification::ControlChanged { instance_id, symbol, value } => {
            Frame::notify("controlChanged", json!({ "instanceId": instance_id, "symbol": symbol, "value": value }))
        }
        Notification::InputVolumeChanged { db } => Frame::notify("inputVolumeChanged", json!({ "db": db })),
        Notification::OutputVolumeChanged { db } => Frame::notify("outputVolumeChanged", json!({ "db": db })),
        Notification::ItemEnabledChanged { instance_id, enabled } => {
            Frame::notify("itemEnabledChanged", json!({ "instanceId": instance_id, "enabled": enabled }))
        }
        Notification::ItemTitleChanged { instance_id, title, color } => {
            Frame::notify("itemTitleChanged", json!({ "instanceId": instance_id, "title": title, "color": color }))
        }
        Notification::PedalboardChanged(pedalboard) => {
            let pedalboard: &Pedalboard = pedalboard;
            Frame::notify("pedalboardChanged", json!(pedalboard))
        }
        Notification::VuUpdate { instance_id, input_max_l, input_max_r, output_max_l, output_max_r } => Frame::notify(
            "vuUpdate",
            json!({
                "instanceId": instance_id,
                "inputMaxL": input_max_l,
                "inputMaxR": input_max_r,
                "outputMaxL": output_max_l,
                "outputMaxR": output_max_r,
            }),
        ),
        Notification::PortMonitorUpdate { handle, value } => Frame::notify("portMonitorUpdate", json!({ "handle": handle, "value": value })),
        Notification::PatchPropertyChanged { instance_id, uri, atom_bytes } => {
            let atom: Option<Atom> = serde_json::from_slice(atom_bytes).ok();
            Frame::notify("patchPropertyChanged", json!({ "instanceId": instance_id, "uri": uri, "value": atom }))
        }
        Notification::PatchPropertyReply { request_id, uri, value, error } => {
            let atom = value.as_ref().and_then(|bytes| serde_json::from_slice::<Atom>(bytes).ok());
            Frame::notify("patchPropertyReply", json!({ "requestId": request_id, "uri": uri, "value": atom, "error": error }))
        }
        Notification::MidiValueLearned { instance_id, port_index, value } => {
            Frame::notify("midiValueLearned", json!({ "instanceId": instance_id, "portIndex": port_index, "value": value }))
        }
        Notification::MidiLearnResult { cc0, cc1, cc2 } => Frame::notify("midiLearnResult", json!({ "cc0": cc0, "cc1": cc1, "cc2": cc2 })),
        Notification::AudioFault(text) => Frame::notify("audioFault", json!({ "text": text })),
        Notification::PluginFault { instance_id, text } => {
            Frame::notify("pluginFault", json!({ "instanceId": instance_id, "text": text }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vu_budget_drops_beyond_the_cap() {
        let budget = VuBudget::new();
        let mut permits = Vec::new();
        for _ in 0..VU_INFLIGHT_CAP {
            permits.push(budget.try_acquire().expect("under cap"));
        }
        assert!(budget.try_acquire().is_none());
        permits.pop();
        assert!(budget.try_acquire().is_some());
    }
}
