//! Error types for signaling.

use fileflow_protocol::PROTOCOL_VERSION;

use crate::description::DescriptionKind;

/// Errors produced while building, parsing or acting on session
/// descriptions. Every variant is fatal to the session being negotiated.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("malformed session description: {0}")]
    Malformed(String),

    #[error("expected {expected} description, got {actual}")]
    UnexpectedKind {
        expected: DescriptionKind,
        actual: DescriptionKind,
    },

    #[error("session mismatch: expected {expected}, got {actual}")]
    SessionMismatch { expected: String, actual: String },

    #[error("unsupported protocol version {0} (expected {PROTOCOL_VERSION})")]
    UnsupportedVersion(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for peer")]
    Timeout,

    #[error("peer rejected authentication")]
    AuthRejected,

    #[error("no candidate reachable")]
    Unreachable,
}

impl SignalingError {
    /// Whether the error comes from an unusable blob rather than the network.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            SignalingError::Malformed(_)
                | SignalingError::UnexpectedKind { .. }
                | SignalingError::SessionMismatch { .. }
                | SignalingError::UnsupportedVersion(_)
        )
    }
}
