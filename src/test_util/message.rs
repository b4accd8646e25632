use std::sync::Arc;

use async_trait::async_trait;
use libp2p::PeerId;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::TraversalError;
use crate::messaging::message_sender::MessageSender;
use crate::messaging::protocol_message::ProtocolMessage;

/// A [MessageSender] that records every message together with the (tokio) time it was sent,
///  for asserting on in tests.
#[derive(Debug, Default, Clone)]
pub struct TrackingMockMessageSender {
    tracker: Arc<RwLock<Vec<(PeerId, ProtocolMessage, Instant)>>>,
}

impl TrackingMockMessageSender {
    pub fn new() -> Self {
        Default::default()
    }

    /// Checks the oldest recorded message and removes it, returning the time it was sent
    pub async fn assert_message_sent(&self, to: PeerId, message: ProtocolMessage) -> Instant {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("no message was sent, expected {:?} to {}", message, to);
        }

        let (actual_to, actual_msg, sent_at) = lock.remove(0);
        assert_eq!(actual_msg, message);
        assert_eq!(actual_to, to);
        sent_at
    }

    /// Removes and returns the oldest recorded message
    pub async fn next_message(&self) -> (PeerId, ProtocolMessage) {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("no message was sent");
        }
        let (to, msg, _) = lock.remove(0);
        (to, msg)
    }

    pub async fn assert_no_remaining_messages(&self) {
        let lock = self.tracker.read().await;
        assert!(lock.is_empty(), "unexpected messages: {:?}", *lock);
    }

    pub async fn num_sent(&self) -> usize {
        self.tracker.read().await
            .len()
    }
}

#[async_trait]
impl MessageSender for TrackingMockMessageSender {
    async fn try_send(&self, to: PeerId, msg: ProtocolMessage) -> Result<(), TraversalError> {
        self.tracker.write().await.push((to, msg, Instant::now()));
        Ok(())
    }
}
