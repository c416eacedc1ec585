use fileflow_protocol::ProtocolError;
use fileflow_signaling::SignalingError;
use fileflow_transfer::{StorageError, TransferError};

use crate::types::SessionState;

/// Errors from the message channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("message channel is not open")]
    ChannelNotOpen,

    #[error("a stream is already attached")]
    AlreadyAttached,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors surfaced by [`TransferSession`](crate::TransferSession).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not allowed while the session is {0}")]
    InvalidState(SessionState),

    #[error("session is not active")]
    NotActive,

    #[error("session closed: {0}")]
    Closed(String),

    #[error("invalid capabilities: {0}")]
    InvalidCapabilities(#[from] ProtocolError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
