use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHUNK_SIZE, HIGH_SPEED_CHUNK_SIZE, MAX_CHUNK_SIZE, WINDOW_BUDGET_CHUNKS,
};
use crate::error::ProtocolError;

/// Transfer tuning parameters one peer can safely handle.
///
/// Each side announces its own descriptor once the channel opens; both then
/// run on [`reconcile`](Self::reconcile)d values for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Bytes per chunk.
    pub chunk_size: u32,
    /// Outbound transfers allowed to stream at the same time.
    pub max_concurrent_transfers: u32,
    /// Whether the device runs in the high-speed tier.
    pub high_speed: bool,
    /// Whether chunks carry a SHA-256 checksum.
    #[serde(default, skip_serializing_if = "is_false")]
    pub checksum: bool,
}

impl CapabilityDescriptor {
    /// Conservative tier for slower devices.
    pub const fn standard() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_transfers: 1,
            high_speed: false,
            checksum: false,
        }
    }

    /// Tier for devices with spare CPU, memory and bandwidth.
    pub const fn high_speed() -> Self {
        Self {
            chunk_size: HIGH_SPEED_CHUNK_SIZE,
            max_concurrent_transfers: 3,
            high_speed: true,
            checksum: true,
        }
    }

    /// Rejects descriptors no peer could honour.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.chunk_size == 0 {
            return Err(ProtocolError::InvalidCapability(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidCapability(format!(
                "chunk size {} exceeds maximum {MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(ProtocolError::InvalidCapability(
                "max concurrent transfers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Combines two descriptors by taking the more conservative value of
    /// every field. The result does not depend on argument order.
    pub fn reconcile(&self, other: &Self) -> Self {
        Self {
            chunk_size: self.chunk_size.min(other.chunk_size),
            max_concurrent_transfers: self
                .max_concurrent_transfers
                .min(other.max_concurrent_transfers),
            high_speed: self.high_speed && other.high_speed,
            checksum: self.checksum && other.checksum,
        }
    }

    /// Chunks one outbound transfer may have in flight.
    pub fn flow_window(&self) -> usize {
        let slots = self.max_concurrent_transfers.max(1) as usize;
        (WINDOW_BUDGET_CHUNKS / slots).max(1)
    }
}

impl Default for CapabilityDescriptor {
    fn default() -> Self {
        Self::standard()
    }
}

fn is_false(v: &bool) -> bool {
    !v
}
