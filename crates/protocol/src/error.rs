//! Error types for the wire protocol.

/// Errors produced while encoding, decoding or validating protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid capability: {0}")]
    InvalidCapability(String),
}
