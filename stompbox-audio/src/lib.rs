//! # stompbox-audio
//!
//! The realtime-facing half of the stompbox pedalboard host: the
//! lock-free message ring (C1), the realtime-resident plugin graph (C2),
//! and the duplex audio driver that owns the realtime thread (C3).
//!
//! Nothing in this crate is async and nothing above [`ring`] and
//! [`messages`] may allocate, log, or lock once the realtime thread is
//! running — see each module's doc comment for its exact contract.

pub mod devices;
pub mod driver;
pub mod graph;
pub mod messages;
pub mod plugin;
pub mod ring;

pub use driver::{AudioDriver, OpenError};
pub use graph::{BuildError, GraphNode, PluginGraph};
pub use plugin::{PluginFactory, PluginInstance};
pub use ring::{ring, PopError, PushError, RingConsumer, RingProducer};
