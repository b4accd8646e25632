use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use libp2p::PeerId;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

/// Counts live connections per peer. Each connection holds a [ConnectionGuard] that releases
///  its count when dropped.
///
/// The lock is a std lock since it is released from `Drop`, and it is never held across an
///  await point.
#[derive(Default)]
pub struct ConnectionTracker {
    counts: Mutex<FxHashMap<PeerId, usize>>,
}

impl ConnectionTracker {
    pub fn new() -> Arc<ConnectionTracker> {
        Default::default()
    }

    pub fn track(self: &Arc<Self>, peer: PeerId) -> ConnectionGuard {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(peer).or_default();
        *count += 1;
        debug!(%peer, "connection opened, {} live", count);

        ConnectionGuard {
            tracker: self.clone(),
            peer,
        }
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.num_connections(peer) > 0
    }

    pub fn num_connections(&self, peer: &PeerId) -> usize {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .cloned()
            .unwrap_or(0)
    }

    fn release(&self, peer: &PeerId) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(peer) {
            *count -= 1;
            debug!(%peer, "connection closed, {} live", count);
            if *count == 0 {
                counts.remove(peer);
            }
        }
    }
}

pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
    peer: PeerId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.peer);
    }
}

/// A TCP stream that counts as a live connection to its peer for as long as it exists
pub struct TrackedStream {
    inner: TcpStream,
    _guard: ConnectionGuard,
}

impl TrackedStream {
    pub fn new(inner: TcpStream, guard: ConnectionGuard) -> TrackedStream {
        TrackedStream {
            inner,
            _guard: guard,
        }
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::peer::test_peer_id_from_number;

    #[test]
    fn test_guards_count_connections() {
        let tracker = ConnectionTracker::new();
        let peer = test_peer_id_from_number(1);

        assert!(!tracker.is_connected(&peer));
        let first = tracker.track(peer);
        let second = tracker.track(peer);
        assert_eq!(tracker.num_connections(&peer), 2);
        assert!(!tracker.is_connected(&test_peer_id_from_number(2)));

        drop(first);
        assert!(tracker.is_connected(&peer));
        drop(second);
        assert!(!tracker.is_connected(&peer));
    }
}
