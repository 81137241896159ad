//! Crate-wide error type for everything that runs on the service thread
//!. The realtime thread never constructs or propagates one of
//! these — its faults cross the return ring as plain enum variants
//! (`stompbox_audio::messages::ReturnMessage::Lv2RealtimeError`/`AlsaFatal`)
//! and are converted to a `HostError` only once they reach this side.

/// One error kind per failure class. Variants map directly onto the wire-level
/// `{"message": "error"}` response `stompbox-net` sends back to the
/// originating request.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Malformed frame, unknown message, out-of-range argument.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Operation valid in isolation but not in the current state (e.g.
    /// rename to a duplicate name).
    #[error("{0}")]
    StateError(String),

    /// Filesystem failure during a save/load; prior on-disk state is left
    /// intact by the atomic-rename discipline.
    #[error("storage error: {0}")]
    StorageError(String),

    /// `PatchGet`/`PatchSet` expired before the realtime thread replied.
    #[error("realtime request timed out")]
    RealtimeTimeout,

    /// The audio driver signalled a fatal error.
    #[error("audio fault: {0}")]
    AudioFault(String),

    /// A plugin instance reported an error via the return ring.
    #[error("plugin fault on instance {instance_id}: {text}")]
    PluginFault { instance_id: u64, text: String },
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        HostError::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self {
        HostError::InvalidRequest(e.to_string())
    }
}

impl HostError {
    /// The wire-level error body: every error reply is the string `"error"`
    /// on the header with this as the body.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_becomes_storage_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let host_err: HostError = io_err.into();
        assert!(matches!(host_err, HostError::StorageError(_)));
    }

    #[test]
    fn wire_message_is_the_display_string() {
        let err = HostError::StateError("duplicate name".to_string());
        assert_eq!(err.wire_message(), "duplicate name");
    }
}
