//! Framed message channel over an established byte stream.
//!
//! A [`SessionConnection`] owns one read pump and one write pump. Outbound
//! messages are encoded on the caller's task and queued for the write pump;
//! inbound frames are decoded by the read pump and handed to whoever took
//! the inbound receiver.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use fileflow_protocol::constants::MAX_FRAME_SIZE;
use fileflow_protocol::{Message, encode};
use fileflow_transfer::{MessageSink, TransferError};

use crate::error::ConnectionError;

/// Lifecycle of the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// What the read pump hands to the session.
#[derive(Debug)]
pub(crate) enum Inbound {
    Message(Message),
    /// A frame that did not decode; the peer has already been told.
    Invalid(String),
    /// The stream ended. Always the last item.
    Closed { error: Option<String> },
}

/// Shared connection state plus the last transport error.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
    error: Mutex<Option<String>>,
}

impl StateCell {
    pub(crate) fn new(initial: ConnectionState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            error: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Moves to `next`; returns whether anything changed.
    pub(crate) fn set(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Moves to a closing state unless the channel already ended.
    pub(crate) fn settle(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| match *current {
            ConnectionState::Disconnected | ConnectionState::Error => false,
            _ => {
                *current = next;
                true
            }
        })
    }

    pub(crate) fn record_error(&self, error: String) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(error);
    }

    pub(crate) fn take_error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Ordered, reliable message channel to the peer.
pub struct SessionConnection {
    state: Arc<StateCell>,
    write_tx: mpsc::UnboundedSender<Bytes>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    cancel: CancellationToken,
}

impl SessionConnection {
    /// Creates a channel in the `Connecting` state with no stream yet.
    pub fn new() -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(StateCell::new(ConnectionState::Connecting)),
            write_tx,
            write_rx: Mutex::new(Some(write_rx)),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Frames `stream` and starts both pumps. Must be called from a tokio
    /// runtime, at most once.
    pub fn attach<S>(&self, stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::ChannelNotOpen);
        }
        let write_rx = lock(&self.write_rx).take();
        let inbound_tx = lock(&self.inbound_tx).take();
        let (Some(write_rx), Some(inbound_tx)) = (write_rx, inbound_tx) else {
            return Err(ConnectionError::AlreadyAttached);
        };

        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        let (sink, frames) = Framed::new(Box::pin(stream), codec).split();

        tokio::spawn(crate::pumps::write::write_pump(
            sink,
            write_rx,
            self.state.clone(),
            self.cancel.clone(),
        ));
        tokio::spawn(crate::pumps::read::read_pump(
            frames,
            inbound_tx,
            self.write_tx.clone(),
            self.state.clone(),
            self.cancel.clone(),
        ));

        if self.state.set(ConnectionState::Connected) {
            info!("message channel open");
        }
        Ok(())
    }

    /// Queues one message for the peer.
    pub fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        if self.state.get() != ConnectionState::Connected || self.cancel.is_cancelled() {
            return Err(ConnectionError::ChannelNotOpen);
        }
        let bytes = encode(message)?;
        trace!(kind = message.kind(), len = bytes.len(), "queue message");
        self.write_tx
            .send(Bytes::from(bytes))
            .map_err(|_| ConnectionError::ChannelNotOpen)
    }

    /// Takes the inbound receiver. Returns `None` after the first call.
    pub(crate) fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        lock(&self.inbound_rx).take()
    }

    /// Closes the channel. Queued frames are flushed best-effort; calling
    /// this again has no effect.
    pub fn close(&self) {
        self.cancel.cancel();
        if self.state.settle(ConnectionState::Disconnected) {
            debug!("message channel closed");
        }
    }

    /// Marks the channel failed and tears it down.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.state.get() != ConnectionState::Error {
            warn!("message channel failed: {reason}");
        }
        self.state.record_error(reason);
        self.state.set(ConnectionState::Error);
        self.cancel.cancel();
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Watches state changes. The current value is visible immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Default for SessionConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl MessageSink for SessionConnection {
    fn send_message(&self, message: Message) -> Result<(), TransferError> {
        self.send(&message).map_err(|_| TransferError::ChannelClosed)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
