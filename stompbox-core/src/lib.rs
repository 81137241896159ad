//! # stompbox-core
//!
//! Service-thread library for the stompbox pedalboard host: configuration,
//! MIDI input, filesystem-backed storage, and the `host` module that
//! orchestrates the realtime audio thread (`stompbox-audio`) on behalf of
//! the control-plane sessions (`stompbox-net`).
//!
//! ## Module overview
//!
//! - [`config`] — TOML configuration loading (embedded defaults + user override)
//! - [`error`] — `HostError`, the single error type every service-thread
//!   operation returns
//! - [`midi`] — MIDI port enumeration and raw-byte event parsing
//! - [`storage`] — banks, presets, plugin presets, uploads, settings
//! - [`host`] — `AudioHost` and `Model`, the orchestrator and session-facing
//!   façade

pub mod config;
pub mod error;
pub mod host;
pub mod midi;
pub mod storage;

pub use error::HostError;
