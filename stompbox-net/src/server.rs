//! Control-plane server: accepts WebSocket connections and hands each one to
//! [`crate::session::run`], plus a dedicated thread that drains `Model`'s
//! return ring on a steady tick.
//!
//! A non-blocking listener accept loop, one thread per connection doing
//! blocking I/O. There's no separate action-channel/dirty-flags/broadcast
//! machinery here — `Model` already does the dirty-tracking and broadcast
//! fan-out this crate's sessions only need to relay.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use tungstenite::protocol::Role;
use tungstenite::WebSocket;

use stompbox_core::host::Model;

use crate::session::{self, VuBudget};

/// How often the pump thread drains `Model`'s return ring.
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Binds `addr` and serves connections until the process exits. Blocks the
/// calling thread in the accept loop; spawns the pump thread and one reader
/// thread per connection.
pub fn run(addr: &str, model: Arc<Model>) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!(target: "server", "control plane listening on {addr}");
    serve(listener, model)
}

/// Serves an already-bound listener. Split out from [`run`] so tests can
/// bind to `127.0.0.1:0` and learn the chosen port before connecting.
pub fn serve(listener: TcpListener, model: Arc<Model>) -> io::Result<()> {
    let pump_model = model.clone();
    thread::spawn(move || loop {
        pump_model.pump();
        thread::sleep(PUMP_INTERVAL);
    });

    let vu_budget = VuBudget::new();
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                error!(target: "server", "accept error: {err}");
                continue;
            }
        };
        let model = model.clone();
        let vu_budget = vu_budget.clone();
        thread::spawn(move || {
            if let Err(err) = handle_connection(stream, model, vu_budget) {
                warn!(target: "server", "connection handshake failed: {err}");
            }
        });
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, model: Arc<Model>, vu_budget: VuBudget) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr().ok();
    let read_stream = stream.try_clone()?;

    let read_ws = tungstenite::accept(stream).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    info!(target: "server", "accepted websocket connection from {peer:?}");

    // The handshake already ran on `stream`; re-wrap the cloned descriptor
    // as an established server-role socket so reads and writes can proceed
    // independently from two threads without sharing handshake state.
    let write_ws = WebSocket::from_raw_socket(read_stream, Role::Server, None);
    let write_ws = Arc::new(Mutex::new(write_ws));

    session::run(model, read_ws, write_ws, vu_budget);
    Ok(())
}
