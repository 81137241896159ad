//! End-to-end coverage of the WebSocket control plane against a dummy-driver
//! `Model`.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tungstenite::{Message, WebSocket};

use stompbox_audio::devices::{AudioDeviceConfig, DUMMY_DEVICE_PREFIX};
use stompbox_audio::plugin::{BuiltinFactory, GAIN_URI};
use stompbox_core::host::{Model, NullSystemControl};
use stompbox_types::{ControlPortInfo, ControlValue, Item, Pedalboard, PluginCatalog, PluginInfo, PluginState, StaticCatalog};

fn dummy_config() -> AudioDeviceConfig {
    AudioDeviceConfig {
        input_device: Some(format!("{DUMMY_DEVICE_PREFIX}in")),
        output_device: Some(format!("{DUMMY_DEVICE_PREFIX}out")),
        sample_rate: 48000,
        period_frames: 32,
        period_count: 2,
    }
}

fn gain_catalog() -> Arc<dyn PluginCatalog> {
    Arc::new(StaticCatalog::new(vec![PluginInfo {
        uri: GAIN_URI.to_string(),
        name: "Gain".to_string(),
        input_ports: 1,
        output_ports: 1,
        control_ports: vec![ControlPortInfo { symbol: "gain".to_string(), index: 0, default: 1.0, min: 0.0, max: 4.0 }],
        has_midi_input: false,
        file_properties: vec![],
        factory_presets: vec![],
    }]))
}

/// Spins up a real listener bound to an ephemeral port, serving `model` in
/// the background, and returns the port.
fn spawn_server(model: Arc<Model>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        stompbox_net::serve(listener, model).unwrap();
    });
    port
}

fn connect(port: u16) -> WebSocket<TcpStream> {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    tungstenite::client(format!("ws://127.0.0.1:{port}"), stream).unwrap().0
}

fn send(ws: &mut WebSocket<TcpStream>, message: &str, reply_to: Option<u64>, body: serde_json::Value) {
    let frame = stompbox_net::Frame::request(message, reply_to, body);
    ws.send(Message::Text(serde_json::to_string(&frame).unwrap().into())).unwrap();
}

fn recv(ws: &mut WebSocket<TcpStream>) -> stompbox_net::Frame {
    loop {
        match ws.read().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

fn open_model() -> (Arc<Model>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let mut pedalboard = Pedalboard::new("test");
    let id = pedalboard.alloc_instance_id();
    pedalboard.items.push(Item::Plugin {
        instance_id: id,
        plugin_uri: GAIN_URI.to_string(),
        enabled: true,
        use_mod_ui: false,
        control_values: vec![ControlValue::new("gain", 1.0)],
        state: PluginState::default(),
        lilv_preset_uri: None,
        path_properties: Default::default(),
        midi_bindings: Vec::new(),
        midi_channel_binding: None,
        title: None,
        color: None,
    });
    let storage = stompbox_core::storage::Storage::open(dir.path().to_path_buf()).unwrap();
    storage.save_current_preset(&pedalboard).unwrap();

    let model = Model::open(dir.path().to_path_buf(), dummy_config(), gain_catalog(), Arc::new(BuiltinFactory), Arc::new(NullSystemControl), 64).unwrap();
    (Arc::new(model), dir)
}

#[test]
fn hello_returns_the_current_pedalboard() {
    let (model, _dir) = open_model();
    let port = spawn_server(model);
    let mut ws = connect(port);

    send(&mut ws, "hello", Some(1), serde_json::json!({ "client_name": "test" }));
    let reply = recv(&mut ws);
    assert_eq!(reply.0.message, "hello");
    assert_eq!(reply.0.reply, Some(1));
    assert!(reply.1.get("pedalboard").is_some());
}

#[test]
fn unknown_message_gets_an_error_reply() {
    let (model, _dir) = open_model();
    let port = spawn_server(model);
    let mut ws = connect(port);

    send(&mut ws, "notAThing", Some(2), serde_json::json!({}));
    let reply = recv(&mut ws);
    assert_eq!(reply.0.message, "error");
    assert_eq!(reply.0.reply, Some(2));
}

#[test]
fn set_control_broadcasts_to_other_sessions_but_not_the_sender() {
    let (model, _dir) = open_model();
    let port = spawn_server(model.clone());

    let mut sender = connect(port);
    send(&mut sender, "hello", Some(1), serde_json::json!({ "client_name": "sender" }));
    let hello_reply = recv(&mut sender);
    let pedalboard = hello_reply.1.get("pedalboard").unwrap().clone();
    let instance_id = pedalboard["items"][0]["Plugin"]["instance_id"].clone();

    let mut listener = connect(port);
    send(&mut listener, "hello", Some(1), serde_json::json!({ "client_name": "listener" }));
    recv(&mut listener);

    send(
        &mut sender,
        "setControl",
        Some(2),
        serde_json::json!({ "instance_id": instance_id, "symbol": "gain", "value": 2.0 }),
    );
    let ack = recv(&mut sender);
    assert_eq!(ack.0.message, "setControl");

    let broadcast = recv(&mut listener);
    assert_eq!(broadcast.0.message, "controlChanged");
    assert!(broadcast.0.reply.is_none());
    assert_eq!(broadcast.1["value"], 2.0);
}

#[test]
fn disconnecting_a_session_lets_the_vu_subscription_slot_go() {
    let (model, _dir) = open_model();
    let port = spawn_server(model.clone());

    let mut ws = connect(port);
    send(&mut ws, "hello", Some(1), serde_json::json!({ "client_name": "sub" }));
    let hello_reply = recv(&mut ws);
    let pedalboard = hello_reply.1.get("pedalboard").unwrap().clone();
    let instance_id: u64 = pedalboard["items"][0]["Plugin"]["instance_id"].as_u64().unwrap();

    send(&mut ws, "addVuSubscription", Some(2), serde_json::json!({ "instance_id": instance_id }));
    let ack = recv(&mut ws);
    assert!(ack.1.get("handle").is_some());

    drop(ws);
    std::thread::sleep(Duration::from_millis(200));

    // The subscription registry no longer references a dropped client; a
    // fresh connection proves the server is still alive and well.
    let mut probe = connect(port);
    send(&mut probe, "currentPedalboard", Some(1), serde_json::json!(null));
    let reply = recv(&mut probe);
    assert_eq!(reply.0.message, "currentPedalboard");
}
