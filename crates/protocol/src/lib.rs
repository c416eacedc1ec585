//! Wire protocol for FileFlow transfer sessions.
//!
//! Every application message travels as one JSON object per frame, tagged
//! by its `type` field. Chunk payloads are base64-encoded inside the JSON.

pub mod capability;
pub mod codec;
pub mod constants;
pub mod error;
pub mod messages;

// Re-export primary types for convenience.
pub use capability::CapabilityDescriptor;
pub use codec::{decode, encode};
pub use constants::PROTOCOL_VERSION;
pub use error::ProtocolError;
pub use messages::{Ack, Cancel, Chunk, ErrorReport, FileInfo, Message, Ready};

/// Opaque transfer identifier shared by both peers.
pub type TransferId = String;
