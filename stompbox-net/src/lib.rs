//! ControlProtocol (C9) and Session (C8): the WebSocket-facing half of the
//! host. Everything below this crate talks to `stompbox-core`'s
//! `Model`; nothing here touches the realtime thread directly.

pub mod framing;
pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{ClientMessage, DecodeError, Frame, FrameHeader};
pub use server::{run, serve};
pub use session::VuBudget;
