use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use fileflow_protocol::constants::MAX_CHUNK_SIZE;

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkPlan
// ---------------------------------------------------------------------------

/// How a file of `declared_size` bytes splits into fixed-size chunks.
///
/// A zero-byte file still has one (empty) chunk so the receiver sees
/// something to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    declared_size: u64,
    chunk_size: u32,
    total_chunks: u32,
}

impl ChunkPlan {
    pub fn new(declared_size: u64, chunk_size: u32) -> Result<Self, TransferError> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        let total = declared_size.div_ceil(u64::from(chunk_size)).max(1);
        let total_chunks = u32::try_from(total).map_err(|_| TransferError::TooManyChunks {
            size: declared_size,
            max: u32::MAX,
        })?;
        Ok(Self {
            declared_size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range covered by chunk `index`, or `None` past the end.
    pub fn range(&self, index: u32) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        let start = u64::from(index) * u64::from(self.chunk_size);
        let end = (start + u64::from(self.chunk_size)).min(self.declared_size);
        Some(start..end)
    }

    /// Expected payload length of chunk `index`.
    pub fn payload_len(&self, index: u32) -> Option<usize> {
        self.range(index).map(|r| (r.end - r.start) as usize)
    }

    /// Bytes covered by the first `chunks` chunks.
    pub fn prefix_bytes(&self, chunks: u32) -> u64 {
        (u64::from(chunks) * u64::from(self.chunk_size)).min(self.declared_size)
    }
}

// ---------------------------------------------------------------------------
// ChunkLedger
// ---------------------------------------------------------------------------

/// Which chunk indices have been counted, plus the contiguous prefix.
///
/// Counting an index twice is a no-op, so duplicate deliveries never inflate
/// progress and out-of-order deliveries never make it regress.
#[derive(Debug, Clone)]
pub struct ChunkLedger {
    counted: Vec<bool>,
    count: u32,
    prefix: u32,
}

impl ChunkLedger {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            counted: vec![false; total_chunks as usize],
            count: 0,
            prefix: 0,
        }
    }

    /// Counts `index`. Returns false if it was already counted or out of range.
    pub fn record(&mut self, index: u32) -> bool {
        let Some(slot) = self.counted.get_mut(index as usize) else {
            return false;
        };
        if *slot {
            return false;
        }
        *slot = true;
        self.count += 1;
        while self
            .counted
            .get(self.prefix as usize)
            .copied()
            .unwrap_or(false)
        {
            self.prefix += 1;
        }
        true
    }

    pub fn contains(&self, index: u32) -> bool {
        self.counted.get(index as usize).copied().unwrap_or(false)
    }

    /// Number of distinct indices counted.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Length of the run of counted indices starting at 0.
    pub fn contiguous_prefix(&self) -> u32 {
        self.prefix
    }

    pub fn is_complete(&self) -> bool {
        self.prefix as usize == self.counted.len()
    }
}

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// Where outbound chunk bytes come from.
///
/// File sources are read one chunk at a time at the chunk's offset, so a
/// large file never sits in memory as a whole.
#[derive(Debug, Clone)]
pub enum ChunkSource {
    Memory(Arc<[u8]>),
    File(PathBuf),
}

impl ChunkSource {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        ChunkSource::Memory(bytes.into())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        ChunkSource::File(path.as_ref().to_path_buf())
    }

    /// Current size of the underlying bytes.
    pub async fn size(&self) -> Result<u64, TransferError> {
        match self {
            ChunkSource::Memory(bytes) => Ok(bytes.len() as u64),
            ChunkSource::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }

    /// Reads the payload of chunk `index` under `plan`.
    pub async fn read_chunk(&self, plan: &ChunkPlan, index: u32) -> Result<Vec<u8>, TransferError> {
        let range = plan.range(index).ok_or_else(|| TransferError::InvalidChunk {
            id: String::new(),
            reason: format!("index {index} out of {}", plan.total_chunks()),
        })?;
        let len = (range.end - range.start) as usize;
        match self {
            ChunkSource::Memory(bytes) => {
                let start = range.start as usize;
                bytes
                    .get(start..start + len)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "source shorter than declared size",
                        )
                        .into()
                    })
            }
            ChunkSource::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u32 = 1024 * 1024;

    #[test]
    fn checksum_known_value() {
        assert_eq!(
            checksum_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn plan_two_and_a_half_mib() {
        let plan = ChunkPlan::new(2_621_440, MIB).unwrap();
        assert_eq!(plan.total_chunks(), 3);
        assert_eq!(plan.payload_len(0), Some(MIB as usize));
        assert_eq!(plan.payload_len(1), Some(MIB as usize));
        assert_eq!(plan.payload_len(2), Some(524_288));
        assert_eq!(plan.payload_len(3), None);
    }

    #[test]
    fn plan_payloads_sum_to_size() {
        for (size, chunk) in [(0u64, 4u32), (1, 4), (4, 4), (5, 4), (1000, 7), (4096, 1024)] {
            let plan = ChunkPlan::new(size, chunk).unwrap();
            let expected = if size == 0 {
                1
            } else {
                size.div_ceil(u64::from(chunk)) as u32
            };
            assert_eq!(plan.total_chunks(), expected, "size {size} chunk {chunk}");
            let sum: u64 = (0..plan.total_chunks())
                .map(|i| plan.payload_len(i).unwrap() as u64)
                .sum();
            assert_eq!(sum, size);
        }
    }

    #[test]
    fn plan_zero_byte_file_has_one_empty_chunk() {
        let plan = ChunkPlan::new(0, MIB).unwrap();
        assert_eq!(plan.total_chunks(), 1);
        assert_eq!(plan.payload_len(0), Some(0));
        assert_eq!(plan.prefix_bytes(1), 0);
    }

    #[test]
    fn plan_rejects_bad_chunk_size() {
        assert!(matches!(
            ChunkPlan::new(10, 0),
            Err(TransferError::InvalidChunkSize(0))
        ));
        assert!(ChunkPlan::new(10, MAX_CHUNK_SIZE + 1).is_err());
    }

    #[test]
    fn plan_prefix_bytes_caps_at_size() {
        let plan = ChunkPlan::new(2_621_440, MIB).unwrap();
        assert_eq!(plan.prefix_bytes(0), 0);
        assert_eq!(plan.prefix_bytes(2), 2 * u64::from(MIB));
        assert_eq!(plan.prefix_bytes(3), 2_621_440);
    }

    #[test]
    fn ledger_counts_each_index_once() {
        let mut ledger = ChunkLedger::new(3);
        assert!(ledger.record(0));
        assert!(!ledger.record(0));
        assert_eq!(ledger.count(), 1);
        assert_eq!(ledger.contiguous_prefix(), 1);
    }

    #[test]
    fn ledger_prefix_waits_for_gap() {
        let mut ledger = ChunkLedger::new(3);
        ledger.record(2);
        assert_eq!(ledger.contiguous_prefix(), 0);
        ledger.record(0);
        assert_eq!(ledger.contiguous_prefix(), 1);
        ledger.record(1);
        assert_eq!(ledger.contiguous_prefix(), 3);
        assert!(ledger.is_complete());
    }

    #[test]
    fn ledger_ignores_out_of_range() {
        let mut ledger = ChunkLedger::new(1);
        assert!(!ledger.record(1));
        assert!(!ledger.contains(1));
        assert_eq!(ledger.count(), 0);
    }

    #[tokio::test]
    async fn memory_source_reads_chunks() {
        let source = ChunkSource::from_bytes(b"abcdefghij".to_vec());
        let plan = ChunkPlan::new(10, 4).unwrap();
        assert_eq!(source.size().await.unwrap(), 10);
        assert_eq!(source.read_chunk(&plan, 0).await.unwrap(), b"abcd");
        assert_eq!(source.read_chunk(&plan, 2).await.unwrap(), b"ij");
        assert!(source.read_chunk(&plan, 3).await.is_err());
    }

    #[tokio::test]
    async fn memory_source_shorter_than_plan() {
        let source = ChunkSource::from_bytes(b"abc".to_vec());
        let plan = ChunkPlan::new(10, 4).unwrap();
        assert!(source.read_chunk(&plan, 1).await.is_err());
    }

    #[tokio::test]
    async fn file_source_reads_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &data).unwrap();

        let source = ChunkSource::from_path(&path);
        let plan = ChunkPlan::new(1000, 300).unwrap();
        assert_eq!(source.size().await.unwrap(), 1000);
        assert_eq!(source.read_chunk(&plan, 1).await.unwrap(), &data[300..600]);
        assert_eq!(source.read_chunk(&plan, 3).await.unwrap(), &data[900..]);
    }

    #[tokio::test]
    async fn file_source_missing_file() {
        let source = ChunkSource::from_path("/nonexistent/fileflow/data.bin");
        let plan = ChunkPlan::new(10, 4).unwrap();
        assert!(matches!(
            source.read_chunk(&plan, 0).await,
            Err(TransferError::Io(_))
        ));
    }
}
