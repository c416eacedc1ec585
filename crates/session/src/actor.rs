//! The session actor.
//!
//! One task per session owns the transfer registry and the chunk scheduler
//! and handles, in arrival order: application commands, inbound messages
//! and watchdog ticks. Nothing else mutates transfer state; the handle only
//! reads the snapshots this task publishes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use fileflow_protocol::{
    Ack, CapabilityDescriptor, Chunk, ErrorReport, FileInfo, Message, Ready, TransferId,
};
use fileflow_transfer::{
    ChunkScheduler, ChunkSource, Direction, FailureReason, FileMeta, StorageError,
    TransferRegistry, TransferStatus,
};

use crate::connection::Inbound;
use crate::error::SessionError;
use crate::session::Shared;
use crate::types::{SessionEvent, SessionState};

/// Shortest watchdog period accepted; `interval` rejects zero.
const MIN_WATCHDOG_INTERVAL: Duration = Duration::from_millis(10);

/// Requests from the handle. Each carries its own reply channel.
pub(crate) enum Command {
    SendFile {
        meta: FileMeta,
        source: ChunkSource,
        reply: oneshot::Sender<Result<TransferId, SessionError>>,
    },
    Cancel {
        id: TransferId,
        reply: oneshot::Sender<Result<bool, SessionError>>,
    },
}

enum Exit {
    /// `close()` or a negotiation failure cancelled the session.
    Local,
    /// The channel ended under us.
    Remote(Option<String>),
}

/// Attaches `stream` and runs the session until it closes.
pub(crate) async fn run<S>(shared: Arc<Shared>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    if let Err(e) = shared.connection.attach(stream) {
        shared.fail_negotiation(&e.to_string());
        return;
    }
    let (Some(inbound), Some(commands)) = (shared.connection.take_inbound(), shared.take_commands())
    else {
        shared.fail_negotiation("session is already running");
        return;
    };

    let mut actor = Actor {
        shared,
        registry: TransferRegistry::new(),
        scheduler: None,
        negotiated: None,
    };
    actor.run(inbound, commands).await;
}

struct Actor {
    shared: Arc<Shared>,
    registry: TransferRegistry,
    /// Present once capabilities are agreed.
    scheduler: Option<ChunkScheduler>,
    negotiated: Option<CapabilityDescriptor>,
}

impl Actor {
    async fn run(
        &mut self,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let local = self.shared.local;
        if let Err(e) = self.shared.connection.send(&Message::Capability(local)) {
            self.shared
                .fail_negotiation(&format!("cannot announce capabilities: {e}"));
            return;
        }
        debug!(
            chunk_size = local.chunk_size,
            max_concurrent = local.max_concurrent_transfers,
            "capabilities announced"
        );

        let deadline = tokio::time::sleep(self.shared.config.connect_timeout);
        tokio::pin!(deadline);
        let mut watchdog =
            tokio::time::interval(self.shared.config.watchdog_interval.max(MIN_WATCHDOG_INTERVAL));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => break Exit::Local,

                _ = &mut deadline, if self.negotiated.is_none() => {
                    self.shared.fail_negotiation("capability exchange timed out");
                    break Exit::Local;
                }

                Some(command) = commands.recv() => self.handle_command(command).await,

                item = inbound.recv() => match item {
                    Some(Inbound::Message(message)) => {
                        if let Err(reason) = self.handle_message(message).await {
                            self.shared.fail_negotiation(&reason);
                            break Exit::Local;
                        }
                    }
                    Some(Inbound::Invalid(reason)) => {
                        debug!(%reason, "skipped undecodable frame");
                    }
                    Some(Inbound::Closed { error }) => break Exit::Remote(error),
                    None => break Exit::Remote(None),
                },

                _ = watchdog.tick(), if self.negotiated.is_some() => self.check_watchdog().await,
            }
        };

        self.shutdown(exit);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendFile {
                meta,
                source,
                reply,
            } => {
                let result = self.send_file(meta, source).await;
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                let result = self.cancel(&id).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn send_file(
        &mut self,
        meta: FileMeta,
        source: ChunkSource,
    ) -> Result<TransferId, SessionError> {
        let (Some(negotiated), Some(scheduler)) = (self.negotiated, self.scheduler.as_mut()) else {
            return Err(SessionError::NotActive);
        };
        let id = self.registry.announce_outbound(meta, negotiated.chunk_size)?;
        scheduler.enqueue(id.clone(), source);
        if let Some(snapshot) = self.registry.snapshot(&id) {
            self.shared.publish(snapshot, true);
        }
        self.pump().await;
        Ok(id)
    }

    async fn cancel(&mut self, id: &str) -> Result<bool, SessionError> {
        // A queued outbound transfer was never announced to the peer.
        let announced = self.registry.direction(id) == Some(Direction::Inbound)
            || self.scheduler.as_ref().is_some_and(|s| s.is_admitted(id));

        let live = self.registry.cancel(id)?;
        if live {
            info!(transfer = %id, "transfer cancelled");
            if announced {
                self.send(Message::cancel(id));
            }
            self.release(id);
            self.publish(id);
            self.pump().await;
        }
        Ok(live)
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    /// Returns an error only for faults that end the negotiation.
    async fn handle_message(&mut self, message: Message) -> Result<(), String> {
        let Some(negotiated) = self.negotiated else {
            match message {
                Message::Capability(remote) => return self.negotiate(remote),
                Message::Error(report) => self.on_remote_error(report).await,
                other => {
                    warn!(kind = other.kind(), "message before capability exchange");
                    self.reply_error(other.transfer_id(), "capabilities not negotiated yet");
                }
            }
            return Ok(());
        };

        match message {
            Message::Capability(_) => warn!("ignoring repeated capability message"),
            Message::FileInfo(info) => self.on_file_info(info, &negotiated),
            Message::Ready(ready) => self.on_ready(ready).await,
            Message::Chunk(chunk) => self.on_chunk(chunk).await,
            Message::Ack(ack) => self.on_ack(ack).await,
            Message::Cancel(cancel) => self.on_remote_cancel(&cancel.transfer_id).await,
            Message::Error(report) => self.on_remote_error(report).await,
        }
        Ok(())
    }

    fn negotiate(&mut self, remote: CapabilityDescriptor) -> Result<(), String> {
        if let Err(e) = remote.validate() {
            self.reply_error(None, format!("invalid capabilities: {e}"));
            return Err(format!("peer sent invalid capabilities: {e}"));
        }

        let reconciled = self.shared.local.reconcile(&remote);
        info!(
            chunk_size = reconciled.chunk_size,
            max_concurrent = reconciled.max_concurrent_transfers,
            high_speed = reconciled.high_speed,
            checksum = reconciled.checksum,
            "capabilities negotiated"
        );
        self.scheduler = Some(ChunkScheduler::new(&reconciled));
        self.negotiated = Some(reconciled);
        self.shared.set_negotiated(reconciled);
        self.shared.advance(SessionState::Active);
        Ok(())
    }

    fn on_file_info(&mut self, info: FileInfo, negotiated: &CapabilityDescriptor) {
        let FileInfo {
            transfer_id: id,
            file_name,
            file_size,
            mime_type,
        } = info;

        let limit = self.shared.config.max_file_size;
        if file_size > limit {
            warn!(transfer = %id, size = file_size, limit, "refusing oversized file");
            self.reply_error(
                Some(id.as_str()),
                format!("file of {file_size} bytes exceeds the limit of {limit}"),
            );
            return;
        }

        // A re-announced live id falls through to the duplicate check below.
        let cap = negotiated.max_concurrent_transfers as usize;
        if !self.registry.is_live(&id) && self.registry.live_inbound() >= cap {
            warn!(transfer = %id, cap, "refusing transfer beyond negotiated concurrency");
            self.reply_error(
                Some(id.as_str()),
                format!("too many concurrent transfers (limit {cap})"),
            );
            return;
        }

        let meta = FileMeta::new(file_name, file_size).with_mime_type(mime_type);
        if let Err(e) = self
            .registry
            .announce_inbound(&id, meta, negotiated.chunk_size)
        {
            warn!(transfer = %id, error = %e, "cannot accept announced file");
            self.reply_error(Some(id.as_str()), e.to_string());
            return;
        }
        if let Some(snapshot) = self.registry.snapshot(&id) {
            self.shared.publish(snapshot, true);
        }
        self.send(Message::Ready(Ready {
            transfer_id: id,
            high_speed: negotiated.high_speed,
        }));
    }

    async fn on_ready(&mut self, ready: Ready) {
        let id = ready.transfer_id;
        if self.registry.direction(&id) != Some(Direction::Outbound) || !self.registry.is_live(&id)
        {
            debug!(transfer = %id, "ready for unknown or ended transfer");
            return;
        }
        let opened = self.scheduler.as_mut().is_some_and(|s| s.on_ready(&id));
        if opened && self.registry.mark_transferring(&id) {
            debug!(transfer = %id, "receiver ready");
            self.publish(&id);
        }
        self.pump().await;
    }

    async fn on_chunk(&mut self, chunk: Chunk) {
        let id = chunk.transfer_id;
        if !self.registry.is_live(&id) {
            debug!(transfer = %id, index = chunk.index, "chunk for unknown or ended transfer dropped");
            return;
        }

        let receipt = match self.registry.record_chunk_received(
            &id,
            chunk.index,
            chunk.total_chunks,
            &chunk.payload,
            chunk.checksum.as_deref(),
        ) {
            Ok(receipt) => receipt,
            Err(e) => {
                self.reply_error(Some(id.as_str()), e.to_string());
                self.publish(&id);
                return;
            }
        };
        trace!(transfer = %id, index = receipt.index, bytes = receipt.bytes_acknowledged, "chunk received");

        let ack = Message::Ack(Ack {
            transfer_id: id.clone(),
            index: receipt.index,
            bytes_acked: receipt.bytes_acknowledged,
        });

        let Some(bytes) = receipt.assembled else {
            self.send(ack);
            if receipt.newly_counted {
                self.publish(&id);
            }
            return;
        };

        // Last chunk: the file must be stored before the sender hears it is done.
        let stored = self.store(&id, bytes).await;
        let Some(snapshot) = self.registry.finish_inbound(&id, stored) else {
            return;
        };
        if snapshot.status == TransferStatus::Completed {
            self.send(ack);
        } else {
            self.reply_error(Some(id.as_str()), "receiver could not store the file");
        }
        self.shared.publish(snapshot, false);
    }

    async fn on_ack(&mut self, ack: Ack) {
        let id = ack.transfer_id;
        if !self.registry.is_live(&id) {
            debug!(transfer = %id, index = ack.index, "ack for unknown or ended transfer dropped");
            return;
        }

        // Zero until the lane is ready and has sent something.
        let sent = self.scheduler.as_ref().map_or(0, |s| s.sent(&id));
        match self.registry.record_ack(&id, ack.index, ack.bytes_acked, sent) {
            Ok(outcome) => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.on_ack(&id, outcome.newly_counted);
                }
                if outcome.newly_counted || outcome.completed {
                    self.publish(&id);
                }
            }
            Err(e) => {
                self.reply_error(Some(id.as_str()), e.to_string());
                self.publish(&id);
            }
        }
        self.pump().await;
    }

    async fn on_remote_cancel(&mut self, id: &str) {
        if !self.registry.mark_failed(id, FailureReason::RemoteCancelled) {
            debug!(transfer = %id, "cancel for unknown or ended transfer");
            return;
        }
        info!(transfer = %id, "transfer cancelled by peer");
        self.release(id);
        self.publish(id);
        self.pump().await;
    }

    async fn on_remote_error(&mut self, report: ErrorReport) {
        warn!(
            transfer = report.transfer_id.as_deref().unwrap_or("-"),
            message = %report.message,
            "peer reported an error"
        );
        self.shared.emit(SessionEvent::RemoteError {
            transfer_id: report.transfer_id.clone(),
            message: report.message,
        });

        let Some(id) = report.transfer_id else {
            return;
        };
        if self.registry.mark_failed(&id, FailureReason::RemoteError) {
            self.release(&id);
            self.publish(&id);
            self.pump().await;
        }
    }

    // -----------------------------------------------------------------------
    // Watchdog and shutdown
    // -----------------------------------------------------------------------

    async fn check_watchdog(&mut self) {
        let timeout = self.shared.config.watchdog_timeout;
        let mut fired = false;

        for id in self.registry.stalled(Instant::now(), timeout) {
            let queued = self.registry.direction(&id) == Some(Direction::Outbound)
                && !self.scheduler.as_ref().is_some_and(|s| s.is_admitted(&id));
            if queued {
                continue;
            }
            if self.registry.mark_failed(&id, FailureReason::WatchdogTimeout) {
                warn!(transfer = %id, timeout_ms = timeout.as_millis() as u64, "transfer stalled");
                self.send(Message::cancel(&id));
                self.release(&id);
                self.publish(&id);
                fired = true;
            }
        }

        if fired {
            self.pump().await;
        }
    }

    fn shutdown(&mut self, exit: Exit) {
        let reason = match exit {
            Exit::Local => FailureReason::SessionClosed,
            Exit::Remote(_) => FailureReason::TransportFailure,
        };
        for id in self.registry.fail_all_active(reason) {
            self.publish(&id);
        }

        match exit {
            Exit::Local => {
                self.shared.connection.close();
                self.shared.close_with("closed locally");
            }
            Exit::Remote(_) if self.negotiated.is_none() => {
                self.shared
                    .fail_negotiation("peer disconnected during capability exchange");
            }
            Exit::Remote(error) => {
                let reason = match error {
                    Some(e) => format!("transport failure: {e}"),
                    None => "peer disconnected".to_string(),
                };
                info!(%reason, "session ended");
                self.shared.connection.close();
                self.shared.cancel.cancel();
                self.shared.close_with(reason);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Admits queued transfers and fills open windows.
    async fn pump(&mut self) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        match scheduler
            .pump(&mut self.registry, &self.shared.connection)
            .await
        {
            Ok(report) => {
                if report.chunks_sent > 0 || !report.admitted.is_empty() {
                    trace!(
                        admitted = report.admitted.len(),
                        chunks = report.chunks_sent,
                        "scheduler pumped"
                    );
                }
                for id in report.failed {
                    self.reply_error(Some(id.as_str()), "sender could not read the file");
                    self.publish(&id);
                }
            }
            Err(e) => debug!("scheduler stopped: {e}"),
        }
    }

    async fn store(&self, id: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let store = self.shared.store.clone();
        let key = id.to_string();
        tokio::task::spawn_blocking(move || store.put(&key, bytes))
            .await
            .unwrap_or_else(|e| Err(StorageError::Io(io::Error::other(e))))
    }

    fn release(&mut self, id: &str) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.release(id);
        }
    }

    fn publish(&self, id: &str) {
        if let Some(snapshot) = self.registry.snapshot(id) {
            self.shared.publish(snapshot, false);
        }
    }

    fn send(&self, message: Message) {
        if let Err(e) = self.shared.connection.send(&message) {
            debug!(kind = message.kind(), "message dropped: {e}");
        }
    }

    fn reply_error(&self, transfer_id: Option<&str>, message: impl Into<String>) {
        self.send(Message::error(transfer_id, message));
    }
}
