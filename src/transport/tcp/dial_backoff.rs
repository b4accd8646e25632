use std::time::Duration;

use libp2p::PeerId;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(60);

struct BackoffState {
    until: Instant,
    next_delay: Duration,
}

/// Negative dial cache: after a failed dial, further dials to the same peer fail fast for a
///  while. The interval doubles with every consecutive failure, up to a maximum.
pub struct DialBackoff {
    initial: Duration,
    max: Duration,
    peers: Mutex<FxHashMap<PeerId, BackoffState>>,
}

impl DialBackoff {
    pub fn new(initial: Duration, max: Duration) -> DialBackoff {
        DialBackoff {
            initial,
            max,
            peers: Default::default(),
        }
    }

    pub async fn is_backed_off(&self, peer: &PeerId) -> bool {
        self.peers.lock().await
            .get(peer)
            .map(|state| state.until > Instant::now())
            .unwrap_or(false)
    }

    /// Returns the interval during which dials to the peer will now fail fast
    pub async fn record_failure(&self, peer: PeerId) -> Duration {
        let mut peers = self.peers.lock().await;
        let state = peers.entry(peer)
            .or_insert(BackoffState { until: Instant::now(), next_delay: self.initial });

        let delay = state.next_delay;
        state.until = Instant::now() + delay;
        state.next_delay = delay.saturating_mul(2).min(self.max);
        trace!(%peer, ?delay, "dial backoff");
        delay
    }

    pub async fn clear(&self, peer: &PeerId) {
        self.peers.lock().await
            .remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::peer::test_peer_id_from_number;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_doubling_up_to_max() {
        let backoff = DialBackoff::new(BACKOFF_INITIAL, BACKOFF_MAX);
        let peer = test_peer_id_from_number(1);

        let mut delays = Vec::new();
        for _ in 0..9 {
            delays.push(backoff.record_failure(peer).await.as_secs());
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_expires() {
        let backoff = DialBackoff::new(BACKOFF_INITIAL, BACKOFF_MAX);
        let peer = test_peer_id_from_number(1);

        assert!(!backoff.is_backed_off(&peer).await);
        backoff.record_failure(peer).await;
        assert!(backoff.is_backed_off(&peer).await);
        assert!(!backoff.is_backed_off(&test_peer_id_from_number(2)).await);

        advance(Duration::from_millis(1001)).await;
        assert!(!backoff.is_backed_off(&peer).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets() {
        let backoff = DialBackoff::new(BACKOFF_INITIAL, BACKOFF_MAX);
        let peer = test_peer_id_from_number(1);

        for _ in 0..5 {
            backoff.record_failure(peer).await;
        }
        backoff.clear(&peer).await;
        assert!(!backoff.is_backed_off(&peer).await);
        assert_eq!(backoff.record_failure(peer).await, BACKOFF_INITIAL);
    }
}
