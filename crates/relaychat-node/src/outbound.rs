//! Per-connection outbound queue.
//!
//! Every socket the node writes to gets one writer task that drains a bounded
//! queue into the socket. Broadcasters only ever `try_send` into the queue, so
//! a stalled recipient can never hold up delivery to anyone else.

use futures_util::SinkExt;
use relaychat::protocol::JsonLinesCodec;
use serde::Serialize;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Sending side of a connection's outbound queue.
///
/// Cloning shares the queue. The connection is closed once every clone is
/// dropped (after queued items are flushed) or immediately on [`close`](Self::close).
#[derive(Debug)]
pub struct Outbound<T> {
    tx: mpsc::Sender<T>,
    closed: CancellationToken,
}

impl<T> Clone for Outbound<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> Outbound<T> {
    /// Enqueue without waiting. Fails if the queue is full or the writer is gone.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.tx.try_send(item)
    }

    /// Enqueue, waiting for space. Used for replies on the caller's own connection.
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.tx.send(item).await
    }

    /// Drop the connection now, discarding anything still queued.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the connection has been closed, by [`close`](Self::close)
    /// or because a socket write failed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// True if both handles feed the same connection.
    pub fn same_channel(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Spawn the writer task for one connection and return its queue.
pub fn spawn_writer<T>(half: OwnedWriteHalf, capacity: usize) -> Outbound<T>
where
    T: Serialize + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<T>(capacity);
    let closed = CancellationToken::new();
    let token = closed.clone();
    let mut sink = FramedWrite::new(half, JsonLinesCodec::<T>::new());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = rx.recv() => {
                    let Some(item) = item else { break };
                    if let Err(e) = sink.send(item).await {
                        tracing::debug!(err = %e, "connection write failed");
                        break;
                    }
                }
            }
        }
        // Wake the reading side so the connection is torn down as a whole.
        token.cancel();
    });

    Outbound { tx, closed }
}
