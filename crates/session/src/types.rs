//! Public types for the transfer session.

use std::fmt;

use serde::{Deserialize, Serialize};

use fileflow_protocol::{CapabilityDescriptor, TransferId};
use fileflow_transfer::TransferSnapshot;

use crate::connection::ConnectionState;

/// Lifecycle of a session. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, nothing on the wire yet.
    Idle,
    /// Blobs exchanged or being exchanged; capabilities not yet agreed.
    Negotiating,
    /// Capabilities agreed; files can flow.
    Active,
    Closed,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Negotiating => 1,
            SessionState::Active => 2,
            SessionState::Closed => 3,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_become(self, next: SessionState) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Events published by a session.
///
/// Delivered over a broadcast channel: an observer that falls more than
/// `event_buffer` events behind misses the oldest ones, and can always
/// resynchronise from [`TransferSession::transfers`](crate::TransferSession::transfers).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ConnectionChanged(ConnectionState),
    /// The reconciled descriptor both sides now run on.
    CapabilitiesNegotiated(CapabilityDescriptor),
    /// A transfer was registered, by `send_file` or a peer `file-info`.
    TransferAdded(TransferSnapshot),
    TransferUpdated(TransferSnapshot),
    /// The peer reported an error, for one transfer or the whole session.
    RemoteError {
        transfer_id: Option<TransferId>,
        message: String,
    },
}
