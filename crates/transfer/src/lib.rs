//! Per-file transfer bookkeeping for FileFlow sessions.
//!
//! The [`TransferRegistry`] owns every transfer record of a session and is
//! the only place status and acknowledged bytes change. The
//! [`ChunkScheduler`] decides which chunk goes out next under the
//! acknowledgment window, and a [`ByteStore`] receives completed inbound
//! files.

mod chunk;
mod progress;
mod registry;
mod scheduler;
mod store;
mod types;
mod validation;

pub use chunk::{ChunkLedger, ChunkPlan, ChunkSource, checksum_bytes};
pub use progress::{ProgressTracker, SpeedCalculator, format_bytes, format_speed};
pub use registry::{AckOutcome, ChunkReceipt, TransferRegistry};
pub use scheduler::{ChunkScheduler, MessageSink, PumpReport};
pub use store::{ByteStore, DirectoryStore, MemoryStore};
pub use types::{Direction, FailureReason, FileMeta, TransferSnapshot, TransferStatus};
pub use validation::sanitize_file_name;

use fileflow_protocol::TransferId;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer already registered: {0}")]
    Duplicate(TransferId),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(TransferId),

    #[error("transfer {id} is already {status}")]
    Terminal {
        id: TransferId,
        status: TransferStatus,
    },

    #[error("invalid chunk for {id}: {reason}")]
    InvalidChunk { id: TransferId, reason: String },

    #[error("checksum mismatch on chunk {index} of {id}")]
    ChecksumMismatch { id: TransferId, index: u32 },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u32),

    #[error("file of {size} bytes needs more than {max} chunks")]
    TooManyChunks { size: u64, max: u32 },

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("message channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by a [`ByteStore`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}
