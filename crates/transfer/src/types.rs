use std::fmt;

use serde::{Deserialize, Serialize};

use fileflow_protocol::TransferId;
use fileflow_protocol::constants::DEFAULT_MIME_TYPE;

/// Which peer holds the original bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Lifecycle of one transfer. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Transferring,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            TransferStatus::Pending => 0,
            TransferStatus::Transferring => 1,
            TransferStatus::Completed | TransferStatus::Failed => 2,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_become(self, next: TransferStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Transferring => "transferring",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        })
    }
}

/// Why a transfer ended up [`TransferStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Cancelled by the local application.
    Cancelled,
    /// Cancelled by the peer.
    RemoteCancelled,
    /// No progress within the watchdog timeout.
    WatchdogTimeout,
    /// The byte store refused the assembled file, or the source could not be read.
    StorageError,
    /// The peer connection dropped.
    TransportFailure,
    /// The session was closed locally.
    SessionClosed,
    ChecksumMismatch,
    /// The peer sent a chunk or ack that does not fit the transfer.
    ProtocolViolation,
    /// The peer reported an error for this transfer.
    RemoteError,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Cancelled => "cancelled",
            FailureReason::RemoteCancelled => "remote-cancelled",
            FailureReason::WatchdogTimeout => "watchdog-timeout",
            FailureReason::StorageError => "storage-error",
            FailureReason::TransportFailure => "transport-failure",
            FailureReason::SessionClosed => "session-closed",
            FailureReason::ChecksumMismatch => "checksum-mismatch",
            FailureReason::ProtocolViolation => "protocol-violation",
            FailureReason::RemoteError => "remote-error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the application knows about a file before sending it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileMeta {
    /// Metadata with the generic binary MIME type.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// Read-only view of a transfer handed to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub direction: Direction,
    pub name: String,
    pub declared_size: u64,
    pub mime_type: String,
    pub status: TransferStatus,
    pub bytes_acknowledged: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub failure: Option<FailureReason>,
}

impl TransferSnapshot {
    /// Progress in percent (0-100). A zero-byte file is 100 once complete.
    pub fn percent(&self) -> f64 {
        if self.declared_size == 0 {
            return if self.status == TransferStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        self.bytes_acknowledged as f64 / self.declared_size as f64 * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
