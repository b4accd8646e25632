use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use libp2p::PeerId;
use rustc_hash::FxHashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace};

use crate::error::TraversalError;

type ConnectionResult = Result<(), TraversalError>;

/// Hole punching requests that were sent but have not completed, by target peer. Each entry
///  is completed at most once, and completing it removes it.
#[derive(Default)]
pub struct PendingConnections {
    pending: Mutex<FxHashMap<PeerId, oneshot::Sender<ConnectionResult>>>,
}

impl PendingConnections {
    pub fn new() -> PendingConnections {
        Default::default()
    }

    pub async fn insert(&self, target: PeerId) -> Result<PendingConnection, TraversalError> {
        let mut pending = self.pending.lock().await;
        if let Some(existing) = pending.get(&target) {
            // the requester went away without waiting for the result
            if !existing.is_closed() {
                return Err(TraversalError::AlreadyPending(target));
            }
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(target, tx);
        trace!(%target, "registered pending connection");
        Ok(PendingConnection { target, rx })
    }

    /// Returns `false` if there was no pending request for `target`, which is the normal case
    ///  on the passive side of a hole punch.
    pub async fn complete(&self, target: &PeerId, result: ConnectionResult) -> bool {
        let Some(tx) = self.pending.lock().await.remove(target) else {
            return false;
        };
        if tx.send(result).is_err() {
            debug!(%target, "connection result is no longer awaited");
        }
        true
    }

    pub async fn remove(&self, target: &PeerId) -> bool {
        self.pending.lock().await
            .remove(target)
            .is_some()
    }

    pub async fn contains(&self, target: &PeerId) -> bool {
        self.pending.lock().await
            .contains_key(target)
    }

    /// Drops all entries, resolving their futures with [TraversalError::Abandoned]
    pub async fn clear(&self) {
        self.pending.lock().await
            .clear();
    }
}

/// Resolves to the outcome of a hole punching request, see
///  [crate::traversal::nat_traversal::NatTraversal::connect_through_hole_punching].
#[derive(Debug)]
pub struct PendingConnection {
    target: PeerId,
    rx: oneshot::Receiver<ConnectionResult>,
}

impl PendingConnection {
    pub fn target(&self) -> PeerId {
        self.target
    }
}

impl Future for PendingConnection {
    type Output = ConnectionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TraversalError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
