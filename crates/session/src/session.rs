//! Application-facing session handle.
//!
//! A [`TransferSession`] is cheap to clone; every clone drives the same
//! session. Lifecycle calls (`start`, `complete`, `accept`, `close`) run on
//! the caller's task, while everything that happens once the channel is up
//! runs on the session actor (see `actor.rs`) and is observed through
//! snapshots and [`SessionEvent`]s.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fileflow_protocol::{CapabilityDescriptor, TransferId};
use fileflow_signaling::{PendingOffer, SignalingCodec};
use fileflow_transfer::{
    ByteStore, ChunkSource, FileMeta, StorageError, TransferError, TransferSnapshot,
};

use crate::actor::{self, Command};
use crate::config::SessionConfig;
use crate::connection::{ConnectionState, SessionConnection};
use crate::error::SessionError;
use crate::types::{SessionEvent, SessionState};

/// State shared between the handle, the actor and helper tasks.
pub(crate) struct Shared {
    pub(crate) local: CapabilityDescriptor,
    pub(crate) config: SessionConfig,
    pub(crate) store: Arc<dyn ByteStore>,
    pub(crate) connection: SessionConnection,
    pub(crate) cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    close_reason: Mutex<Option<String>>,
    negotiated: Mutex<Option<CapabilityDescriptor>>,
    /// Latest snapshot of every transfer, in announcement order.
    transfers: Mutex<Vec<TransferSnapshot>>,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    offer: Mutex<Option<PendingOffer>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Moves the session forward; backwards moves are ignored.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        let moved = self.state.send_if_modified(|current| {
            if current.can_become(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            info!(state = %next, "session state changed");
            self.emit(SessionEvent::StateChanged(next));
        }
        moved
    }

    /// Closes the session, keeping the first reason given.
    pub(crate) fn close_with(&self, reason: impl Into<String>) -> bool {
        lock(&self.close_reason).get_or_insert_with(|| reason.into());
        self.advance(SessionState::Closed)
    }

    /// Ends a session that never became active.
    pub(crate) fn fail_negotiation(&self, reason: &str) {
        warn!(%reason, "negotiation failed");
        self.connection.fail(reason);
        self.cancel.cancel();
        self.close_with(reason);
    }

    pub(crate) fn set_negotiated(&self, capabilities: CapabilityDescriptor) {
        *lock(&self.negotiated) = Some(capabilities);
        self.emit(SessionEvent::CapabilitiesNegotiated(capabilities));
    }

    pub(crate) fn take_commands(&self) -> Option<mpsc::UnboundedReceiver<Command>> {
        lock(&self.command_rx).take()
    }

    /// Stores a snapshot and tells observers. Unchanged updates are dropped.
    pub(crate) fn publish(&self, snapshot: TransferSnapshot, added: bool) {
        {
            let mut cache = lock(&self.transfers);
            if added {
                cache.retain(|s| s.id != snapshot.id);
                cache.push(snapshot.clone());
            } else {
                match cache.iter_mut().find(|s| s.id == snapshot.id) {
                    Some(existing) if *existing == snapshot => return,
                    Some(existing) => *existing = snapshot.clone(),
                    None => cache.push(snapshot.clone()),
                }
            }
        }
        self.emit(if added {
            SessionEvent::TransferAdded(snapshot)
        } else {
            SessionEvent::TransferUpdated(snapshot)
        });
    }

    fn closed_error(&self) -> SessionError {
        let reason = lock(&self.close_reason)
            .clone()
            .unwrap_or_else(|| "session closed".to_string());
        SessionError::Closed(reason)
    }
}

/// One file-transfer session with one peer.
///
/// The offering side calls [`start`](Self::start) and
/// [`complete`](Self::complete); the answering side calls
/// [`accept`](Self::accept) and then [`wait_active`](Self::wait_active).
/// A session never goes back: after `Closed`, create a new one.
#[derive(Clone)]
pub struct TransferSession {
    shared: Arc<Shared>,
}

impl TransferSession {
    /// Creates an idle session advertising `capabilities`.
    ///
    /// Completed inbound files are written to `store` under their transfer id.
    pub fn new(
        capabilities: CapabilityDescriptor,
        store: Arc<dyn ByteStore>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        capabilities.validate()?;

        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (commands, command_rx) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared {
                local: capabilities,
                config,
                store,
                connection: SessionConnection::new(),
                cancel: CancellationToken::new(),
                state,
                close_reason: Mutex::new(None),
                negotiated: Mutex::new(None),
                transfers: Mutex::new(Vec::new()),
                events,
                commands,
                command_rx: Mutex::new(Some(command_rx)),
                offer: Mutex::new(None),
                driver: Mutex::new(None),
            }),
        })
    }

    /// Offering side: binds a listener and returns the offer blob.
    pub async fn start(&self) -> Result<String, SessionError> {
        self.begin()?;
        let codec = SignalingCodec::new(self.shared.config.signaling());
        match codec.create_offer().await {
            Ok((offer, blob)) => {
                info!(session = %offer.session_id(), port = offer.local_port(), "offer ready");
                *lock(&self.shared.offer) = Some(offer);
                Ok(blob)
            }
            Err(e) => {
                self.shared.fail_negotiation(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Offering side: admits the peer holding `answer_blob` and returns
    /// once capabilities are agreed.
    pub async fn complete(&self, answer_blob: &str) -> Result<(), SessionError> {
        let offer = lock(&self.shared.offer)
            .take()
            .ok_or_else(|| SessionError::InvalidState(self.state()))?;

        let accepted = tokio::select! {
            _ = self.shared.cancel.cancelled() => return Err(self.shared.closed_error()),
            accepted = offer.accept_answer(answer_blob) => accepted,
        };
        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.fail_negotiation(&e.to_string());
                return Err(e.into());
            }
        };

        self.spawn_driver(actor::run(self.shared.clone(), stream));
        self.wait_active().await
    }

    /// Answering side: returns the answer blob and connects in the
    /// background. Use [`wait_active`](Self::wait_active) or the event
    /// stream to learn when the session is up.
    pub async fn accept(&self, offer_blob: &str) -> Result<String, SessionError> {
        self.begin()?;
        let codec = SignalingCodec::new(self.shared.config.signaling());
        let (pending, blob) = match codec.create_answer(offer_blob).await {
            Ok(answer) => answer,
            Err(e) => {
                self.shared.fail_negotiation(&e.to_string());
                return Err(e.into());
            }
        };
        info!(session = %pending.session_id(), "answer ready");

        let shared = self.shared.clone();
        self.spawn_driver(async move {
            let connected = tokio::select! {
                _ = shared.cancel.cancelled() => return,
                connected = pending.connect() => connected,
            };
            match connected {
                Ok(stream) => actor::run(shared, stream).await,
                Err(e) => shared.fail_negotiation(&e.to_string()),
            }
        });
        Ok(blob)
    }

    /// Runs the session over a stream the caller already established.
    ///
    /// Both ends must call this on their halves; capability exchange
    /// happens as usual. Must be called from a tokio runtime.
    pub fn open<S>(&self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.begin()?;
        self.spawn_driver(actor::run(self.shared.clone(), stream));
        Ok(())
    }

    /// Resolves once the session is active; errors if it closes first.
    pub async fn wait_active(&self) -> Result<(), SessionError> {
        let mut rx = self.shared.state.subscribe();
        let reached = rx
            .wait_for(|s| *s != SessionState::Idle && *s != SessionState::Negotiating)
            .await
            .map(|s| *s)
            .unwrap_or(SessionState::Closed);
        match reached {
            SessionState::Active => Ok(()),
            _ => Err(self.shared.closed_error()),
        }
    }

    /// Queues a file for sending and returns its transfer id.
    ///
    /// The declared size is taken from `source`.
    pub async fn send_file(
        &self,
        meta: FileMeta,
        source: ChunkSource,
    ) -> Result<TransferId, SessionError> {
        if self.state() != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        let size = source.size().await?;
        let meta = if meta.size == size {
            meta
        } else {
            debug!(name = %meta.name, declared = meta.size, actual = size, "using source size");
            FileMeta { size, ..meta }
        };

        let (reply, rx) = oneshot::channel();
        self.shared
            .commands
            .send(Command::SendFile {
                meta,
                source,
                reply,
            })
            .map_err(|_| self.shared.closed_error())?;
        rx.await.map_err(|_| self.shared.closed_error())?
    }

    /// Cancels a transfer in either direction.
    ///
    /// Returns false if it had already ended.
    pub async fn cancel(&self, id: &str) -> Result<bool, SessionError> {
        if self.state() != SessionState::Active {
            return match self.transfer(id) {
                Some(_) => Ok(false),
                None => Err(TransferError::UnknownTransfer(id.to_string()).into()),
            };
        }
        let (reply, rx) = oneshot::channel();
        self.shared
            .commands
            .send(Command::Cancel {
                id: id.to_string(),
                reply,
            })
            .map_err(|_| self.shared.closed_error())?;
        rx.await.map_err(|_| self.shared.closed_error())?
    }

    /// Every transfer of this session, in announcement order.
    pub fn transfers(&self) -> Vec<TransferSnapshot> {
        lock(&self.shared.transfers).clone()
    }

    pub fn transfer(&self, id: &str) -> Option<TransferSnapshot> {
        lock(&self.shared.transfers)
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Reads a completed inbound file back from the byte store.
    pub async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let store = self.shared.store.clone();
        let key = id.to_string();
        let fetched = tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))?;
        Ok(fetched?)
    }

    /// The reconciled descriptor, once negotiated.
    pub fn negotiated_capabilities(&self) -> Option<CapabilityDescriptor> {
        *lock(&self.shared.negotiated)
    }

    /// The descriptor this side advertises.
    pub fn local_capabilities(&self) -> CapabilityDescriptor {
        self.shared.local
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<String> {
        lock(&self.shared.close_reason).clone()
    }

    /// Closes the session. Live transfers fail with `session-closed`.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        lock(&self.shared.offer).take();

        let driver = lock(&self.shared.driver).take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!("session task ended abnormally: {e}");
            }
        }

        self.shared.connection.close();
        self.shared.close_with("closed locally");
    }

    /// Idle → Negotiating, plus the connection-state forwarder.
    fn begin(&self) -> Result<(), SessionError> {
        if !self.shared.advance(SessionState::Negotiating) {
            return Err(SessionError::InvalidState(self.state()));
        }

        let shared = self.shared.clone();
        let mut rx = self.shared.connection.subscribe_state();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                debug!(%state, "connection state changed");
                shared.emit(SessionEvent::ConnectionChanged(state));
                if matches!(state, ConnectionState::Disconnected | ConnectionState::Error) {
                    break;
                }
            }
        });
        Ok(())
    }

    fn spawn_driver<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        if let Some(previous) = lock(&self.shared.driver).replace(handle) {
            previous.abort();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fileflow_transfer::{MemoryStore, TransferStatus};

    use super::*;

    fn session(capabilities: CapabilityDescriptor) -> TransferSession {
        let config = SessionConfig {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        TransferSession::new(capabilities, Arc::new(MemoryStore::new()), config).unwrap()
    }

    fn pair(
        left: CapabilityDescriptor,
        right: CapabilityDescriptor,
    ) -> (TransferSession, TransferSession) {
        let (a, b) = tokio::io::duplex(1 << 20);
        let sender = session(left);
        let receiver = session(right);
        sender.open(a).unwrap();
        receiver.open(b).unwrap();
        (sender, receiver)
    }

    async fn wait_status(session: &TransferSession, id: &str, status: TransferStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if session.transfer(id).is_some_and(|s| s.status == status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("status not reached");
    }

    #[test]
    fn rejects_invalid_capabilities() {
        let bad = CapabilityDescriptor {
            chunk_size: 0,
            ..CapabilityDescriptor::standard()
        };
        let result = TransferSession::new(bad, Arc::new(MemoryStore::new()), SessionConfig::default());
        assert!(matches!(result, Err(SessionError::InvalidCapabilities(_))));
    }

    #[tokio::test]
    async fn send_before_active_is_refused() {
        let s = session(CapabilityDescriptor::standard());
        let err = s
            .send_file(FileMeta::new("a", 1), ChunkSource::from_bytes(vec![1u8]))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotActive));
    }

    #[tokio::test]
    async fn negotiates_conservative_capabilities() {
        let (sender, receiver) = pair(
            CapabilityDescriptor::high_speed(),
            CapabilityDescriptor::standard(),
        );
        sender.wait_active().await.unwrap();
        receiver.wait_active().await.unwrap();

        let expected = CapabilityDescriptor::standard();
        assert_eq!(sender.negotiated_capabilities(), Some(expected));
        assert_eq!(receiver.negotiated_capabilities(), Some(expected));
        assert_eq!(sender.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn transfers_small_file() {
        let (sender, receiver) = pair(
            CapabilityDescriptor {
                chunk_size: 4,
                ..CapabilityDescriptor::standard()
            },
            CapabilityDescriptor::standard(),
        );
        sender.wait_active().await.unwrap();
        receiver.wait_active().await.unwrap();

        let data = b"hello, transfer".to_vec();
        let id = sender
            .send_file(
                FileMeta::new("hello.txt", 0).with_mime_type("text/plain"),
                ChunkSource::from_bytes(data.clone()),
            )
            .await
            .unwrap();

        wait_status(&sender, &id, TransferStatus::Completed).await;
        wait_status(&receiver, &id, TransferStatus::Completed).await;

        let snapshot = receiver.transfer(&id).unwrap();
        assert_eq!(snapshot.declared_size, data.len() as u64);
        assert_eq!(snapshot.total_chunks, 4);
        assert_eq!(snapshot.mime_type, "text/plain");
        assert_eq!(receiver.fetch(&id).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn close_reaches_peer() {
        let (sender, receiver) = pair(
            CapabilityDescriptor::standard(),
            CapabilityDescriptor::standard(),
        );
        sender.wait_active().await.unwrap();
        receiver.wait_active().await.unwrap();

        receiver.close().await;
        assert_eq!(receiver.state(), SessionState::Closed);
        assert_eq!(receiver.connection_state(), ConnectionState::Disconnected);

        tokio::time::timeout(Duration::from_secs(2), async {
            while sender.state() != SessionState::Closed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("sender should notice the disconnect");
        assert!(sender.wait_active().await.is_err());
    }

    #[tokio::test]
    async fn open_twice_is_invalid() {
        let s = session(CapabilityDescriptor::standard());
        let (a, _b) = tokio::io::duplex(64);
        s.open(a).unwrap();
        let (c, _d) = tokio::io::duplex(64);
        assert!(matches!(
            s.open(c),
            Err(SessionError::InvalidState(SessionState::Negotiating))
        ));
        s.close().await;
    }

    #[tokio::test]
    async fn close_while_idle() {
        let s = session(CapabilityDescriptor::standard());
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(s.close_reason().as_deref(), Some("closed locally"));
        assert!(matches!(s.start().await, Err(SessionError::InvalidState(_))));
    }

    #[tokio::test]
    async fn cancel_unknown_transfer() {
        let (sender, _receiver) = pair(
            CapabilityDescriptor::standard(),
            CapabilityDescriptor::standard(),
        );
        sender.wait_active().await.unwrap();
        assert!(matches!(
            sender.cancel("nope").await,
            Err(SessionError::Transfer(TransferError::UnknownTransfer(_)))
        ));
    }
}
