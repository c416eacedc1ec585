//! Read pump: decodes inbound frames and hands them to the session.

use std::io;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use fileflow_protocol::{Message, decode, encode};

use crate::connection::{ConnectionState, Inbound, StateCell};

/// Reads frames until EOF, a read error or cancellation.
///
/// Undecodable frames are answered with an `error` message and reported as
/// [`Inbound::Invalid`]; they do not end the loop. On exit the connection
/// becomes `Disconnected` (unless it already failed) and a final
/// [`Inbound::Closed`] is delivered.
pub(crate) async fn read_pump<S>(
    mut frames: S,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    write_tx: mpsc::UnboundedSender<Bytes>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<BytesMut, io::Error>> + Unpin,
{
    let mut error = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = frames.next() => {
                match frame {
                    Some(Ok(frame)) => handle_frame(&frame, &inbound_tx, &write_tx),
                    Some(Err(e)) => {
                        warn!("channel read error: {e}");
                        error = Some(e.to_string());
                        break;
                    }
                    None => {
                        debug!("channel stream ended");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    let error = error.or_else(|| state.take_error());
    state.settle(ConnectionState::Disconnected);
    let _ = inbound_tx.send(Inbound::Closed { error });
}

fn handle_frame(
    frame: &[u8],
    inbound_tx: &mpsc::UnboundedSender<Inbound>,
    write_tx: &mpsc::UnboundedSender<Bytes>,
) {
    match decode(frame) {
        Ok(message) => {
            trace!(kind = message.kind(), len = frame.len(), "received message");
            let _ = inbound_tx.send(Inbound::Message(message));
        }
        Err(e) => {
            warn!(len = frame.len(), "undecodable frame: {e}");
            let reply = Message::error(None, format!("invalid message: {e}"));
            if let Ok(bytes) = encode(&reply) {
                let _ = write_tx.send(Bytes::from(bytes));
            }
            let _ = inbound_tx.send(Inbound::Invalid(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use fileflow_protocol::Cancel;

    fn frame(message: &Message) -> Result<BytesMut, io::Error> {
        Ok(BytesMut::from(&encode(message).unwrap()[..]))
    }

    fn cell() -> Arc<StateCell> {
        Arc::new(StateCell::new(ConnectionState::Connected))
    }

    #[tokio::test]
    async fn delivers_messages_then_closed() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (write_tx, _write_rx) = mpsc::unbounded_channel();
        let state = cell();
        let frames = stream::iter(vec![
            frame(&Message::cancel("a")),
            frame(&Message::cancel("b")),
        ]);

        read_pump(frames, inbound_tx, write_tx, state.clone(), CancellationToken::new()).await;

        assert!(matches!(
            inbound_rx.recv().await,
            Some(Inbound::Message(Message::Cancel(Cancel { transfer_id }))) if transfer_id == "a"
        ));
        assert!(matches!(
            inbound_rx.recv().await,
            Some(Inbound::Message(Message::Cancel(Cancel { transfer_id }))) if transfer_id == "b"
        ));
        assert!(matches!(
            inbound_rx.recv().await,
            Some(Inbound::Closed { error: None })
        ));
        assert_eq!(state.get(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn invalid_frame_is_answered_not_fatal() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel();
        let frames = stream::iter(vec![
            Ok(BytesMut::from(&b"{not json"[..])),
            frame(&Message::cancel("after")),
        ]);

        read_pump(frames, inbound_tx, write_tx, cell(), CancellationToken::new()).await;

        assert!(matches!(inbound_rx.recv().await, Some(Inbound::Invalid(_))));
        assert!(matches!(
            inbound_rx.recv().await,
            Some(Inbound::Message(Message::Cancel(_)))
        ));

        let reply = write_rx.recv().await.unwrap();
        assert!(matches!(
            decode(&reply).unwrap(),
            Message::Error(report) if report.transfer_id.is_none()
        ));
    }

    #[tokio::test]
    async fn read_error_reported_in_closed() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (write_tx, _write_rx) = mpsc::unbounded_channel();
        let frames = stream::iter(vec![Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        ))]);

        read_pump(frames, inbound_tx, write_tx, cell(), CancellationToken::new()).await;

        assert!(matches!(
            inbound_rx.recv().await,
            Some(Inbound::Closed { error: Some(_) })
        ));
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (write_tx, _write_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        read_pump(
            stream::pending::<Result<BytesMut, io::Error>>(),
            inbound_tx,
            write_tx,
            cell(),
            cancel,
        )
        .await;

        assert!(matches!(
            inbound_rx.recv().await,
            Some(Inbound::Closed { error: None })
        ));
    }
}
