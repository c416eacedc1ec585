//! Write pump: serialises queued frames onto the stream.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::connection::StateCell;

/// How long a closing connection keeps flushing frames already queued.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Writes frames until cancelled, the queue closes or a write fails.
///
/// Frames queued before cancellation are still flushed, bounded by
/// [`CLOSE_FLUSH_TIMEOUT`], so a final `cancel` or `error` reaches the peer.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut write_rx: mpsc::UnboundedReceiver<Bytes>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
) where
    S: Sink<Bytes, Error = io::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            frame = write_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            error!("channel write error: {e}");
                            state.record_error(e.to_string());
                            cancel.cancel();
                            return;
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    cancel.cancel();
    let flushed = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, async {
        while let Ok(frame) = write_rx.try_recv() {
            sink.feed(frame).await?;
        }
        sink.close().await
    })
    .await;
    if !matches!(flushed, Ok(Ok(()))) {
        debug!("channel closed without a clean flush");
    }
}
