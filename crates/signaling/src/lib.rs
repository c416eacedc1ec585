//! Offer/answer signaling for FileFlow sessions.
//!
//! The offering peer binds a TCP listener and publishes its host
//! candidates in an opaque blob. The answering peer parses that blob,
//! publishes its own blob carrying a one-time token, and dials the offer's
//! candidates. The offering peer only admits the connection that presents
//! the token from the answer it was given.
//!
//! How blobs travel between devices (typed code, QR, chat) is up to the
//! caller; they only have to arrive byte-for-byte.

pub mod code;
pub mod codec;
pub mod description;
pub mod error;
pub mod gather;
pub mod handshake;

pub use code::{
    format_connection_code, generate_connection_code, is_valid_connection_code,
    parse_connection_code,
};
pub use codec::{PendingAnswer, PendingOffer, SignalingCodec, SignalingConfig};
pub use description::{Candidate, DescriptionKind, SessionDescription};
pub use error::SignalingError;

use std::time::Duration;

/// Default bound on candidate gathering.
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on reaching the remote peer over TCP.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the answering side waiting to be admitted.
///
/// The answer blob travels out of band, so this covers a human relaying it.
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for reading the token from an admitted connection.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);
