//! Outbound chunk scheduling under an acknowledgment window.
//!
//! A transfer goes through three stages here: queued (waiting for one of
//! the `max_concurrent_transfers` slots), admitted (its `file-info` is out,
//! waiting for the receiver's `ready`) and streaming (chunks flow while the
//! window has room). Every send re-checks the registry, so a cancelled or
//! failed transfer stops at the next chunk boundary.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use fileflow_protocol::{CapabilityDescriptor, Chunk, FileInfo, Message, TransferId};

use crate::TransferError;
use crate::chunk::{ChunkPlan, ChunkSource, checksum_bytes};
use crate::registry::TransferRegistry;
use crate::types::FailureReason;

/// Where scheduled messages go. Sending must not wait for the peer.
pub trait MessageSink {
    fn send_message(&self, message: Message) -> Result<(), TransferError>;
}

struct Lane {
    plan: ChunkPlan,
    source: ChunkSource,
    ready: bool,
    next_index: u32,
    in_flight: u32,
}

/// What one [`ChunkScheduler::pump`] call did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Transfers whose `file-info` went out.
    pub admitted: Vec<TransferId>,
    pub chunks_sent: u32,
    /// Transfers failed because their source could not be read.
    pub failed: Vec<TransferId>,
}

pub struct ChunkScheduler {
    window: u32,
    max_concurrent: usize,
    checksum: bool,
    queue: VecDeque<(TransferId, ChunkSource)>,
    lanes: HashMap<TransferId, Lane>,
    /// Admission order, for fair filling.
    admitted: Vec<TransferId>,
}

impl ChunkScheduler {
    /// Scheduler for a session running on the reconciled `capabilities`.
    pub fn new(capabilities: &CapabilityDescriptor) -> Self {
        Self {
            window: capabilities.flow_window() as u32,
            max_concurrent: capabilities.max_concurrent_transfers.max(1) as usize,
            checksum: capabilities.checksum,
            queue: VecDeque::new(),
            lanes: HashMap::new(),
            admitted: Vec::new(),
        }
    }

    /// Chunks each transfer may have unacknowledged.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Queues a registered outbound transfer.
    pub fn enqueue(&mut self, id: TransferId, source: ChunkSource) {
        debug!(transfer = %id, queued = self.queue.len() + 1, "transfer queued");
        self.queue.push_back((id, source));
    }

    /// The receiver accepted the transfer; its window opens.
    pub fn on_ready(&mut self, id: &str) -> bool {
        match self.lanes.get_mut(id) {
            Some(lane) if !lane.ready => {
                lane.ready = true;
                true
            }
            Some(_) => false,
            None => {
                debug!(transfer = %id, "ready for transfer that is not admitted");
                false
            }
        }
    }

    /// A new ack frees one window slot. Duplicate acks free nothing.
    pub fn on_ack(&mut self, id: &str, newly_counted: bool) {
        if !newly_counted {
            return;
        }
        if let Some(lane) = self.lanes.get_mut(id) {
            lane.in_flight = lane.in_flight.saturating_sub(1);
        }
    }

    /// Forgets a transfer, freeing its slot. Returns false if it was unknown.
    pub fn release(&mut self, id: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|(queued, _)| queued != id);
        let was_queued = self.queue.len() != before;
        let was_admitted = self.lanes.remove(id).is_some();
        self.admitted.retain(|a| a != id);
        was_queued || was_admitted
    }

    pub fn is_admitted(&self, id: &str) -> bool {
        self.lanes.contains_key(id)
    }

    /// Whether the transfer was admitted and is still waiting for `ready`.
    pub fn awaiting_ready(&self, id: &str) -> bool {
        self.lanes.get(id).is_some_and(|lane| !lane.ready)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn active(&self) -> usize {
        self.lanes.len()
    }

    /// Chunks handed to the sink but not yet acknowledged.
    pub fn in_flight(&self, id: &str) -> u32 {
        self.lanes.get(id).map_or(0, |lane| lane.in_flight)
    }

    /// Chunks handed to the sink so far.
    pub fn sent(&self, id: &str) -> u32 {
        self.lanes.get(id).map_or(0, |lane| lane.next_index)
    }

    /// Retires ended transfers, admits queued ones and fills every open
    /// window. Call after anything that may have freed capacity.
    ///
    /// Only a closed sink is an error; a transfer whose source cannot be
    /// read is failed with `storage-error` and listed in the report.
    pub async fn pump<S: MessageSink>(
        &mut self,
        registry: &mut TransferRegistry,
        sink: &S,
    ) -> Result<PumpReport, TransferError> {
        let mut report = PumpReport::default();
        loop {
            self.retire(registry);
            self.admit(registry, sink, &mut report)?;
            if !self.fill(registry, sink, &mut report).await? {
                return Ok(report);
            }
        }
    }

    fn retire(&mut self, registry: &TransferRegistry) {
        let ended: Vec<TransferId> = self
            .admitted
            .iter()
            .filter(|id| !registry.is_live(id))
            .cloned()
            .collect();
        for id in ended {
            debug!(transfer = %id, "slot freed");
            self.release(&id);
        }
    }

    fn admit<S: MessageSink>(
        &mut self,
        registry: &mut TransferRegistry,
        sink: &S,
        report: &mut PumpReport,
    ) -> Result<(), TransferError> {
        while self.lanes.len() < self.max_concurrent {
            let Some((id, source)) = self.queue.pop_front() else {
                break;
            };
            let (Some(meta), Some(plan)) = (registry.meta(&id), registry.plan(&id)) else {
                warn!(transfer = %id, "queued transfer missing from registry");
                continue;
            };
            if !registry.is_live(&id) {
                debug!(transfer = %id, "skipping ended transfer");
                continue;
            }

            sink.send_message(Message::FileInfo(FileInfo {
                transfer_id: id.clone(),
                file_name: meta.name.clone(),
                file_size: meta.size,
                mime_type: meta.mime_type.clone(),
            }))?;
            registry.touch(&id);
            debug!(transfer = %id, "transfer admitted");

            self.lanes.insert(
                id.clone(),
                Lane {
                    plan,
                    source,
                    ready: false,
                    next_index: 0,
                    in_flight: 0,
                },
            );
            self.admitted.push(id.clone());
            report.admitted.push(id);
        }
        Ok(())
    }

    /// Returns true if a lane failed and capacity may have opened up.
    async fn fill<S: MessageSink>(
        &mut self,
        registry: &mut TransferRegistry,
        sink: &S,
        report: &mut PumpReport,
    ) -> Result<bool, TransferError> {
        let mut freed = false;
        for id in self.admitted.clone() {
            let Some(lane) = self.lanes.get_mut(&id) else {
                continue;
            };
            if !lane.ready {
                continue;
            }
            while lane.in_flight < self.window && lane.next_index < lane.plan.total_chunks() {
                if !registry.is_live(&id) {
                    break;
                }
                let index = lane.next_index;
                let payload = match lane.source.read_chunk(&lane.plan, index).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(transfer = %id, index, error = %e, "cannot read chunk");
                        registry.mark_failed(&id, FailureReason::StorageError);
                        report.failed.push(id.clone());
                        freed = true;
                        break;
                    }
                };
                let checksum = self.checksum.then(|| checksum_bytes(&payload));
                sink.send_message(Message::Chunk(Chunk {
                    transfer_id: id.clone(),
                    index,
                    total_chunks: lane.plan.total_chunks(),
                    payload,
                    checksum,
                }))?;
                lane.next_index += 1;
                lane.in_flight += 1;
                report.chunks_sent += 1;
            }
        }
        Ok(freed)
    }
}
