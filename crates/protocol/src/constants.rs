/// Protocol version carried in signaling descriptions.
///
/// Peers refuse descriptions advertising a different version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Chunk size of the standard capability tier (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Chunk size of the high-speed capability tier (5 MiB).
pub const HIGH_SPEED_CHUNK_SIZE: u32 = 5 * 1024 * 1024;

/// Largest chunk size a descriptor may advertise (16 MiB).
pub const MAX_CHUNK_SIZE: u32 = 16 * 1024 * 1024;

/// Largest encoded frame accepted on the message channel (32 MiB).
///
/// Leaves room for a [`MAX_CHUNK_SIZE`] payload after base64 expansion.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Chunks in flight shared by all concurrently admitted transfers.
///
/// Each outbound transfer gets `WINDOW_BUDGET_CHUNKS / max_concurrent`
/// chunks of window (at least one).
pub const WINDOW_BUDGET_CHUNKS: usize = 8;

/// MIME type used when the announcing side does not know better.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
