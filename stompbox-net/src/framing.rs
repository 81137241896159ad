//! Frame transport over a WebSocket connection.
//!
//! The control plane rides `tungstenite::Message::Text` frames instead of a
//! raw length-prefixed stream: the browser client speaks WebSocket natively,
//! so the length-prefix discipline a raw TCP transport would need is the
//! WebSocket layer's job now, not ours. What survives is the size sanity
//! check and the JSON (de)serialization around it.

use std::net::TcpStream;

use tungstenite::{Message, WebSocket};

use crate::protocol::Frame;

/// A generous ceiling for a pedalboard-plus-state JSON payload.
const MAX_FRAME_BYTES: usize = 100_000_000;

#[derive(Debug, thiserror::Error)]
pub enum FrameIoError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

/// Blocks until the next text frame arrives, decoding it as a [`Frame`].
/// Ping/pong/binary frames are consumed and skipped transparently.
pub fn read_frame(ws: &mut WebSocket<TcpStream>) -> Result<Frame, FrameIoError> {
    loop {
        let message = ws.read()?;
        match message {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    return Err(FrameIoError::TooLarge(text.len()));
                }
                return Ok(serde_json::from_str(&text)?);
            }
            Message::Close(_) => return Err(FrameIoError::Closed),
            // tungstenite answers Ping with Pong internally on read(); Binary
            // and Pong frames carry nothing this protocol understands.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => continue,
        }
    }
}

pub fn write_frame(ws: &mut WebSocket<TcpStream>, frame: &Frame) -> Result<(), FrameIoError> {
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameHeader;
    use std::net::TcpListener;

    fn connected_pair() -> (WebSocket<TcpStream>, WebSocket<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_thread = std::thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            tungstenite::client(format!("ws://{addr}"), stream).unwrap().0
        });
        let (stream, _) = listener.accept().unwrap();
        let server = tungstenite::accept(stream).unwrap();
        let client = client_thread.join().unwrap();
        (server, client)
    }

    #[test]
    fn frame_round_trips_over_a_real_socket() {
        let (mut server, mut client) = connected_pair();
        let frame = Frame::request("hello", None, serde_json::json!({ "client_name": "test" }));
        write_frame(&mut client, &frame).unwrap();
        let received = read_frame(&mut server).unwrap();
        assert_eq!(received.0.message, "hello");

        let reply = Frame::reply("hello", Some(1), serde_json::json!({ "ok": true }));
        write_frame(&mut server, &reply).unwrap();
        let received = read_frame(&mut client).unwrap();
        assert_eq!(received.0, FrameHeader { message: "hello".to_string(), reply: Some(1), reply_to: None });
    }
}
