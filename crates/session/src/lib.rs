//! Transfer session orchestration for FileFlow.
//!
//! A [`TransferSession`] takes a session from signaling to an open message
//! channel, negotiates capabilities with the peer, and then streams files in
//! both directions. Observers follow progress through [`SessionEvent`]s or by
//! polling [`TransferSession::transfers`].

mod actor;
pub mod config;
pub mod connection;
pub mod error;
mod pumps;
mod session;
pub mod types;

pub use config::SessionConfig;
pub use connection::{ConnectionState, SessionConnection};
pub use error::{ConnectionError, SessionError};
pub use session::TransferSession;
pub use types::{SessionEvent, SessionState};
