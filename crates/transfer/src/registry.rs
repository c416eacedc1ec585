//! The single owner of transfer state within a session.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fileflow_protocol::TransferId;

use crate::chunk::{ChunkLedger, ChunkPlan, checksum_bytes};
use crate::types::{Direction, FailureReason, FileMeta, TransferSnapshot, TransferStatus};
use crate::{StorageError, TransferError};

struct TransferRecord {
    id: TransferId,
    direction: Direction,
    meta: FileMeta,
    status: TransferStatus,
    failure: Option<FailureReason>,
    plan: ChunkPlan,
    ledger: ChunkLedger,
    bytes_acknowledged: u64,
    /// Inbound assembly buffer, sized on the first chunk.
    buffer: Vec<u8>,
    last_progress: Instant,
}

impl TransferRecord {
    fn new(id: TransferId, direction: Direction, meta: FileMeta, plan: ChunkPlan) -> Self {
        Self {
            id,
            direction,
            meta,
            status: TransferStatus::Pending,
            failure: None,
            ledger: ChunkLedger::new(plan.total_chunks()),
            plan,
            bytes_acknowledged: 0,
            buffer: Vec::new(),
            last_progress: Instant::now(),
        }
    }

    fn advance(&mut self, next: TransferStatus) -> bool {
        if !self.status.can_become(next) {
            return false;
        }
        self.status = next;
        true
    }

    fn fail(&mut self, reason: FailureReason) -> bool {
        if !self.advance(TransferStatus::Failed) {
            return false;
        }
        self.failure = Some(reason);
        self.buffer = Vec::new();
        info!(transfer = %self.id, %reason, "transfer failed");
        true
    }

    /// Recomputes acknowledged bytes from the contiguous prefix.
    fn refresh_acknowledged(&mut self) {
        let bytes = self.plan.prefix_bytes(self.ledger.contiguous_prefix());
        if bytes > self.bytes_acknowledged {
            self.bytes_acknowledged = bytes;
        }
    }

    fn terminal_error(&self) -> TransferError {
        TransferError::Terminal {
            id: self.id.clone(),
            status: self.status,
        }
    }

    fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id.clone(),
            direction: self.direction,
            name: self.meta.name.clone(),
            declared_size: self.meta.size,
            mime_type: self.meta.mime_type.clone(),
            status: self.status,
            bytes_acknowledged: self.bytes_acknowledged,
            chunk_size: self.plan.chunk_size(),
            total_chunks: self.plan.total_chunks(),
            failure: self.failure,
        }
    }
}

/// Result of accepting one inbound chunk.
#[derive(Debug)]
pub struct ChunkReceipt {
    pub index: u32,
    /// Acknowledged bytes after this chunk, to echo in the `ack`.
    pub bytes_acknowledged: u64,
    /// False for a duplicate delivery.
    pub newly_counted: bool,
    /// The whole file, once the last missing chunk arrives. Hand it to the
    /// byte store and report back with [`TransferRegistry::finish_inbound`].
    pub assembled: Option<Vec<u8>>,
}

/// Result of applying one ack on the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    /// False for a duplicate ack; only new acks free window space.
    pub newly_counted: bool,
    pub completed: bool,
    pub bytes_acknowledged: u64,
}

/// Every transfer of one session, in announcement order.
#[derive(Default)]
pub struct TransferRegistry {
    records: HashMap<TransferId, TransferRecord>,
    order: Vec<TransferId>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, record: TransferRecord) {
        let id = record.id.clone();
        if self.records.insert(id.clone(), record).is_some() {
            self.order.retain(|existing| *existing != id);
        }
        self.order.push(id);
    }

    fn record_mut(&mut self, id: &str) -> Result<&mut TransferRecord, TransferError> {
        self.records
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownTransfer(id.to_string()))
    }

    /// Registers a file this side will send. Nothing goes on the wire yet.
    pub fn announce_outbound(
        &mut self,
        meta: FileMeta,
        chunk_size: u32,
    ) -> Result<TransferId, TransferError> {
        let plan = ChunkPlan::new(meta.size, chunk_size)?;
        let id = Uuid::new_v4().to_string();
        debug!(transfer = %id, name = %meta.name, size = meta.size, "outbound transfer registered");
        self.insert(TransferRecord::new(id.clone(), Direction::Outbound, meta, plan));
        Ok(id)
    }

    /// Registers a file announced by the peer under the peer's id.
    ///
    /// A terminal record with the same id is replaced; a live one is a
    /// [`TransferError::Duplicate`].
    pub fn announce_inbound(
        &mut self,
        id: &str,
        meta: FileMeta,
        chunk_size: u32,
    ) -> Result<(), TransferError> {
        if let Some(existing) = self.records.get(id) {
            if !existing.status.is_terminal() {
                warn!(transfer = %id, "duplicate announcement for live transfer");
                return Err(TransferError::Duplicate(id.to_string()));
            }
            debug!(transfer = %id, "replacing terminal transfer record");
        }
        let plan = ChunkPlan::new(meta.size, chunk_size)?;
        debug!(transfer = %id, name = %meta.name, size = meta.size, "inbound transfer registered");
        self.insert(TransferRecord::new(id.to_string(), Direction::Inbound, meta, plan));
        Ok(())
    }

    /// Accepts one chunk on the receiving side.
    ///
    /// A chunk that does not fit the transfer (wrong total, index out of
    /// range, wrong length) fails it with `protocol-violation`; a checksum
    /// mismatch fails it with `checksum-mismatch`. Duplicates are accepted
    /// and counted once.
    pub fn record_chunk_received(
        &mut self,
        id: &str,
        index: u32,
        total_chunks: u32,
        payload: &[u8],
        checksum: Option<&str>,
    ) -> Result<ChunkReceipt, TransferError> {
        let record = self.record_mut(id)?;
        if record.status.is_terminal() {
            return Err(record.terminal_error());
        }

        let violation = if record.direction != Direction::Inbound {
            Some("chunk for an outbound transfer".to_string())
        } else if total_chunks != record.plan.total_chunks() {
            Some(format!(
                "total chunks {total_chunks}, expected {}",
                record.plan.total_chunks()
            ))
        } else {
            match record.plan.payload_len(index) {
                None => Some(format!("index {index} out of {total_chunks}")),
                Some(len) if len != payload.len() => Some(format!(
                    "chunk {index} has {} bytes, expected {len}",
                    payload.len()
                )),
                Some(_) => None,
            }
        };
        if let Some(reason) = violation {
            warn!(transfer = %id, %reason, "invalid chunk");
            record.fail(FailureReason::ProtocolViolation);
            return Err(TransferError::InvalidChunk {
                id: id.to_string(),
                reason,
            });
        }

        if let Some(expected) = checksum {
            if checksum_bytes(payload) != expected {
                warn!(transfer = %id, index, "chunk checksum mismatch");
                record.fail(FailureReason::ChecksumMismatch);
                return Err(TransferError::ChecksumMismatch {
                    id: id.to_string(),
                    index,
                });
            }
        }

        record.advance(TransferStatus::Transferring);

        let newly_counted = record.ledger.record(index);
        if newly_counted {
            let Ok(declared) = usize::try_from(record.plan.declared_size()) else {
                let reason = format!(
                    "declared size {} does not fit in memory",
                    record.plan.declared_size()
                );
                warn!(transfer = %id, %reason, "rejecting chunk");
                record.fail(FailureReason::ProtocolViolation);
                return Err(TransferError::InvalidChunk {
                    id: id.to_string(),
                    reason,
                });
            };
            if record.buffer.len() != declared {
                record.buffer.resize(declared, 0);
            }
            if let Some(range) = record.plan.range(index) {
                record.buffer[range.start as usize..range.end as usize].copy_from_slice(payload);
            }
            record.last_progress = Instant::now();
            record.refresh_acknowledged();
        } else {
            debug!(transfer = %id, index, "duplicate chunk ignored");
        }

        let assembled = (newly_counted && record.ledger.is_complete())
            .then(|| std::mem::take(&mut record.buffer));

        Ok(ChunkReceipt {
            index,
            bytes_acknowledged: record.bytes_acknowledged,
            newly_counted,
            assembled,
        })
    }

    /// Records the byte store's verdict on an assembled inbound file.
    ///
    /// Returns the new snapshot, or `None` if the transfer ended meanwhile.
    pub fn finish_inbound(
        &mut self,
        id: &str,
        stored: Result<(), StorageError>,
    ) -> Option<TransferSnapshot> {
        let record = self.records.get_mut(id)?;
        if record.status.is_terminal() {
            debug!(transfer = %id, status = %record.status, "store result for ended transfer");
            return None;
        }
        match stored {
            Ok(()) => {
                record.advance(TransferStatus::Completed);
                info!(transfer = %id, bytes = record.bytes_acknowledged, "inbound transfer completed");
            }
            Err(e) => {
                warn!(transfer = %id, error = %e, "byte store rejected file");
                record.fail(FailureReason::StorageError);
            }
        }
        Some(record.snapshot())
    }

    /// Applies an ack on the sending side.
    ///
    /// `sent` is the number of chunks already handed to the channel; an ack
    /// for any later index is a protocol violation. `bytes_acked` is the
    /// peer's own count; it is only cross-checked.
    pub fn record_ack(
        &mut self,
        id: &str,
        index: u32,
        bytes_acked: u64,
        sent: u32,
    ) -> Result<AckOutcome, TransferError> {
        let record = self.record_mut(id)?;
        if record.status.is_terminal() {
            return Err(record.terminal_error());
        }
        let violation = if record.direction != Direction::Outbound {
            Some("ack for an inbound transfer".to_string())
        } else if index >= record.plan.total_chunks() {
            Some(format!("unexpected ack {index} of {}", record.plan.total_chunks()))
        } else if index >= sent {
            Some(format!("ack {index} for a chunk not sent yet ({sent} sent)"))
        } else {
            None
        };
        if let Some(reason) = violation {
            warn!(transfer = %id, %reason, "invalid ack");
            record.fail(FailureReason::ProtocolViolation);
            return Err(TransferError::InvalidChunk {
                id: id.to_string(),
                reason,
            });
        }

        let newly_counted = record.ledger.record(index);
        if newly_counted {
            record.last_progress = Instant::now();
            record.refresh_acknowledged();
        }
        if bytes_acked != record.bytes_acknowledged {
            debug!(
                transfer = %id,
                local = record.bytes_acknowledged,
                remote = bytes_acked,
                "acknowledged byte counts differ"
            );
        }

        record.advance(TransferStatus::Transferring);
        let completed = record.ledger.is_complete() && record.advance(TransferStatus::Completed);
        if completed {
            info!(transfer = %id, bytes = record.bytes_acknowledged, "outbound transfer completed");
        }

        Ok(AckOutcome {
            newly_counted,
            completed,
            bytes_acknowledged: record.bytes_acknowledged,
        })
    }

    /// Pending → Transferring. Returns false if the transfer was not pending.
    pub fn mark_transferring(&mut self, id: &str) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        let moved = record.advance(TransferStatus::Transferring);
        if moved {
            record.last_progress = Instant::now();
        }
        moved
    }

    /// Restarts the stall clock of a transfer.
    pub fn touch(&mut self, id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            record.last_progress = Instant::now();
        }
    }

    /// Forces a transfer to Failed. Idempotent; returns whether it changed.
    pub fn mark_failed(&mut self, id: &str, reason: FailureReason) -> bool {
        match self.records.get_mut(id) {
            Some(record) => record.fail(reason),
            None => {
                debug!(transfer = %id, %reason, "failure for unknown transfer");
                false
            }
        }
    }

    /// Cancels a transfer on behalf of the local application.
    ///
    /// Returns true when the transfer was live and the peer must be told.
    pub fn cancel(&mut self, id: &str) -> Result<bool, TransferError> {
        let record = self.record_mut(id)?;
        Ok(record.fail(FailureReason::Cancelled))
    }

    /// Fails every non-terminal transfer, returning their ids.
    pub fn fail_all_active(&mut self, reason: FailureReason) -> Vec<TransferId> {
        let mut failed = Vec::new();
        for id in &self.order {
            if let Some(record) = self.records.get_mut(id) {
                if record.fail(reason) {
                    failed.push(id.clone());
                }
            }
        }
        failed
    }

    /// Live transfers that made no progress for `timeout`.
    pub fn stalled(&self, now: Instant, timeout: Duration) -> Vec<TransferId> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| {
                !r.status.is_terminal() && now.saturating_duration_since(r.last_progress) >= timeout
            })
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn snapshot(&self, id: &str) -> Option<TransferSnapshot> {
        self.records.get(id).map(TransferRecord::snapshot)
    }

    pub fn snapshots(&self) -> Vec<TransferSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .map(TransferRecord::snapshot)
            .collect()
    }

    pub fn status(&self, id: &str) -> Option<TransferStatus> {
        self.records.get(id).map(|r| r.status)
    }

    pub fn direction(&self, id: &str) -> Option<Direction> {
        self.records.get(id).map(|r| r.direction)
    }

    pub fn meta(&self, id: &str) -> Option<&FileMeta> {
        self.records.get(id).map(|r| &r.meta)
    }

    pub fn plan(&self, id: &str) -> Option<ChunkPlan> {
        self.records.get(id).map(|r| r.plan)
    }

    /// Number of peer-announced transfers that have not reached a terminal state.
    pub fn live_inbound(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.direction == Direction::Inbound && !r.status.is_terminal())
            .count()
    }

    /// Whether the transfer exists and is not terminal.
    pub fn is_live(&self, id: &str) -> bool {
        self.status(id).is_some_and(|s| !s.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u32 = 1024 * 1024;

    fn inbound(registry: &mut TransferRegistry, size: u64, chunk_size: u32) -> TransferId {
        let id = Uuid::new_v4().to_string();
        registry
            .announce_inbound(&id, FileMeta::new("file.bin", size), chunk_size)
            .unwrap();
        id
    }

    fn payload(plan: &ChunkPlan, index: u32) -> Vec<u8> {
        vec![index as u8; plan.payload_len(index).unwrap()]
    }

    #[test]
    fn announce_outbound_is_pending() {
        let mut registry = TransferRegistry::new();
        let id = registry
            .announce_outbound(FileMeta::new("a.txt", 10), 4)
            .unwrap();
        let snap = registry.snapshot(&id).unwrap();
        assert_eq!(snap.status, TransferStatus::Pending);
        assert_eq!(snap.direction, Direction::Outbound);
        assert_eq!(snap.total_chunks, 3);
        assert_eq!(snap.bytes_acknowledged, 0);
    }

    #[test]
    fn announce_outbound_ids_are_unique() {
        let mut registry = TransferRegistry::new();
        let a = registry.announce_outbound(FileMeta::new("a", 1), 4).unwrap();
        let b = registry.announce_outbound(FileMeta::new("a", 1), 4).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_inbound_announcement_rejected() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 10, 4);
        let err = registry
            .announce_inbound(&id, FileMeta::new("other", 10), 4)
            .unwrap_err();
        assert!(matches!(err, TransferError::Duplicate(_)));
    }

    #[test]
    fn live_inbound_ignores_outbound_and_terminal() {
        let mut registry = TransferRegistry::new();
        registry.announce_outbound(FileMeta::new("out", 4), 4).unwrap();
        let first = inbound(&mut registry, 10, 4);
        inbound(&mut registry, 10, 4);
        assert_eq!(registry.live_inbound(), 2);

        registry.mark_failed(&first, FailureReason::RemoteCancelled);
        assert_eq!(registry.live_inbound(), 1);
    }

    #[test]
    fn terminal_inbound_record_can_be_replaced() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 10, 4);
        registry.mark_failed(&id, FailureReason::RemoteCancelled);
        registry
            .announce_inbound(&id, FileMeta::new("again", 10), 4)
            .unwrap();
        let snap = registry.snapshot(&id).unwrap();
        assert_eq!(snap.status, TransferStatus::Pending);
        assert_eq!(snap.name, "again");
        assert_eq!(registry.snapshots().len(), 1);
    }

    #[test]
    fn receive_two_and_a_half_mib() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 2_621_440, MIB);
        let plan = registry.plan(&id).unwrap();

        let r0 = registry
            .record_chunk_received(&id, 0, 3, &payload(&plan, 0), None)
            .unwrap();
        assert_eq!(r0.bytes_acknowledged, u64::from(MIB));
        assert_eq!(registry.status(&id), Some(TransferStatus::Transferring));

        registry
            .record_chunk_received(&id, 1, 3, &payload(&plan, 1), None)
            .unwrap();
        let r2 = registry
            .record_chunk_received(&id, 2, 3, &payload(&plan, 2), None)
            .unwrap();
        assert_eq!(r2.bytes_acknowledged, 2_621_440);

        let bytes = r2.assembled.unwrap();
        assert_eq!(bytes.len(), 2_621_440);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[MIB as usize], 1);
        assert_eq!(bytes[2_621_439], 2);

        // Completed only after the store accepted the bytes.
        assert_eq!(registry.status(&id), Some(TransferStatus::Transferring));
        let snap = registry.finish_inbound(&id, Ok(())).unwrap();
        assert_eq!(snap.status, TransferStatus::Completed);
        assert_eq!(snap.bytes_acknowledged, 2_621_440);
    }

    #[test]
    fn duplicate_chunk_counted_once() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 10, 4);
        let plan = registry.plan(&id).unwrap();

        let first = registry
            .record_chunk_received(&id, 0, 3, &payload(&plan, 0), None)
            .unwrap();
        let again = registry
            .record_chunk_received(&id, 0, 3, &payload(&plan, 0), None)
            .unwrap();
        assert!(first.newly_counted);
        assert!(!again.newly_counted);
        assert_eq!(again.bytes_acknowledged, 4);
    }

    #[test]
    fn out_of_order_chunks_never_regress() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 10, 4);
        let plan = registry.plan(&id).unwrap();

        let mut last = 0;
        for index in [2, 0, 1] {
            let receipt = registry
                .record_chunk_received(&id, index, 3, &payload(&plan, index), None)
                .unwrap();
            assert!(receipt.bytes_acknowledged >= last);
            assert!(receipt.bytes_acknowledged <= 10);
            last = receipt.bytes_acknowledged;
        }
        assert_eq!(last, 10);
    }

    #[test]
    fn zero_byte_file_completes_on_single_empty_chunk() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 0, MIB);
        let receipt = registry
            .record_chunk_received(&id, 0, 1, &[], None)
            .unwrap();
        assert_eq!(receipt.assembled, Some(Vec::new()));
        let snap = registry.finish_inbound(&id, Ok(())).unwrap();
        assert_eq!(snap.status, TransferStatus::Completed);
        assert_eq!(snap.bytes_acknowledged, 0);
    }

    #[test]
    fn store_failure_fails_transfer() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 3, 4);
        registry
            .record_chunk_received(&id, 0, 1, b"abc", None)
            .unwrap();
        let snap = registry
            .finish_inbound(
                &id,
                Err(StorageError::Io(std::io::Error::other("disk full"))),
            )
            .unwrap();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert_eq!(snap.failure, Some(FailureReason::StorageError));
    }

    #[test]
    fn wrong_payload_length_is_protocol_violation() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 10, 4);
        let err = registry
            .record_chunk_received(&id, 0, 3, b"ab", None)
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidChunk { .. }));
        let snap = registry.snapshot(&id).unwrap();
        assert_eq!(snap.failure, Some(FailureReason::ProtocolViolation));
    }

    #[test]
    fn wrong_total_and_index_rejected() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 10, 4);
        assert!(
            registry
                .record_chunk_received(&id, 0, 4, b"abcd", None)
                .is_err()
        );

        let id = inbound(&mut registry, 10, 4);
        assert!(
            registry
                .record_chunk_received(&id, 3, 3, b"ab", None)
                .is_err()
        );
    }

    #[test]
    fn checksum_verified_when_present() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 4, 4);
        let good = checksum_bytes(b"abcd");
        let receipt = registry
            .record_chunk_received(&id, 0, 1, b"abcd", Some(&good))
            .unwrap();
        assert!(receipt.assembled.is_some());

        let id = inbound(&mut registry, 4, 4);
        let err = registry
            .record_chunk_received(&id, 0, 1, b"abcd", Some(&checksum_bytes(b"abce")))
            .unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch { index: 0, .. }));
        assert_eq!(
            registry.snapshot(&id).unwrap().failure,
            Some(FailureReason::ChecksumMismatch)
        );
    }

    #[test]
    fn terminal_transfer_rejects_everything() {
        let mut registry = TransferRegistry::new();
        let id = inbound(&mut registry, 10, 4);
        assert!(registry.cancel(&id).unwrap());

        let err = registry
            .record_chunk_received(&id, 0, 3, b"abcd", None)
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Terminal {
                status: TransferStatus::Failed,
                ..
            }
        ));
        assert!(!registry.cancel(&id).unwrap());
        assert!(!registry.mark_failed(&id, FailureReason::WatchdogTimeout));
        assert!(!registry.mark_transferring(&id));
        let snap = registry.snapshot(&id).unwrap();
        assert_eq!(snap.failure, Some(FailureReason::Cancelled));
        assert_eq!(snap.bytes_acknowledged, 0);
    }

    #[test]
    fn cancel_unknown_transfer() {
        let mut registry = TransferRegistry::new();
        assert!(matches!(
            registry.cancel("nope"),
            Err(TransferError::UnknownTransfer(_))
        ));
    }

    #[test]
    fn acks_complete_outbound_transfer() {
        let mut registry = TransferRegistry::new();
        let id = registry
            .announce_outbound(FileMeta::new("a", 2_621_440), MIB)
            .unwrap();
        assert!(registry.mark_transferring(&id));

        let a0 = registry.record_ack(&id, 0, u64::from(MIB), 3).unwrap();
        assert!(a0.newly_counted);
        assert!(!a0.completed);

        let dup = registry.record_ack(&id, 0, u64::from(MIB), 3).unwrap();
        assert!(!dup.newly_counted);

        registry.record_ack(&id, 1, 2 * u64::from(MIB), 3).unwrap();
        let last = registry.record_ack(&id, 2, 2_621_440, 3).unwrap();
        assert!(last.completed);
        assert_eq!(last.bytes_acknowledged, 2_621_440);
        assert_eq!(registry.status(&id), Some(TransferStatus::Completed));

        assert!(matches!(
            registry.record_ack(&id, 2, 2_621_440, 3),
            Err(TransferError::Terminal { .. })
        ));
    }

    #[test]
    fn ack_out_of_range_is_protocol_violation() {
        let mut registry = TransferRegistry::new();
        let id = registry.announce_outbound(FileMeta::new("a", 8), 4).unwrap();
        assert!(registry.record_ack(&id, 5, 8, 2).is_err());
        assert_eq!(
            registry.snapshot(&id).unwrap().failure,
            Some(FailureReason::ProtocolViolation)
        );
    }

    #[test]
    fn ack_for_unsent_chunk_is_protocol_violation() {
        let mut registry = TransferRegistry::new();
        let id = registry.announce_outbound(FileMeta::new("a", 12), 4).unwrap();
        registry.mark_transferring(&id);

        registry.record_ack(&id, 0, 4, 1).unwrap();
        assert!(matches!(
            registry.record_ack(&id, 1, 8, 1),
            Err(TransferError::InvalidChunk { .. })
        ));
        let snapshot = registry.snapshot(&id).unwrap();
        assert_eq!(snapshot.status, TransferStatus::Failed);
        assert_eq!(snapshot.failure, Some(FailureReason::ProtocolViolation));
        assert_eq!(snapshot.bytes_acknowledged, 4);
    }

    #[test]
    fn ack_before_any_chunk_is_protocol_violation() {
        let mut registry = TransferRegistry::new();
        let id = registry.announce_outbound(FileMeta::new("a", 4), 4).unwrap();
        assert!(registry.record_ack(&id, 0, 4, 0).is_err());
        assert_eq!(registry.status(&id), Some(TransferStatus::Failed));
    }

    #[test]
    fn fail_all_active_skips_terminal() {
        let mut registry = TransferRegistry::new();
        let a = registry.announce_outbound(FileMeta::new("a", 4), 4).unwrap();
        let b = registry.announce_outbound(FileMeta::new("b", 4), 4).unwrap();
        registry.mark_transferring(&a);
        registry.record_ack(&a, 0, 4, 1).unwrap();

        let failed = registry.fail_all_active(FailureReason::SessionClosed);
        assert_eq!(failed, vec![b.clone()]);
        assert_eq!(registry.status(&a), Some(TransferStatus::Completed));
        assert_eq!(
            registry.snapshot(&b).unwrap().failure,
            Some(FailureReason::SessionClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reports_idle_transfers() {
        let mut registry = TransferRegistry::new();
        let a = registry.announce_outbound(FileMeta::new("a", 8), 4).unwrap();
        let b = registry.announce_outbound(FileMeta::new("b", 8), 4).unwrap();
        registry.mark_transferring(&a);
        registry.mark_transferring(&b);

        tokio::time::advance(Duration::from_secs(20)).await;
        registry.record_ack(&a, 0, 4, 1).unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        let stalled = registry.stalled(Instant::now(), Duration::from_secs(30));
        assert_eq!(stalled, vec![b]);
    }

    #[test]
    fn snapshots_keep_announcement_order() {
        let mut registry = TransferRegistry::new();
        let names = ["one", "two", "three"];
        for name in names {
            registry.announce_outbound(FileMeta::new(name, 1), 4).unwrap();
        }
        let listed: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(listed, names);
    }
}
