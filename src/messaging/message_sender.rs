use std::fmt::Debug;

use async_trait::async_trait;
use libp2p::PeerId;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::TraversalError;
use crate::messaging::protocol_message::ProtocolMessage;

/// A message waiting in the router's outbound queue
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutboundMessage {
    pub to: PeerId,
    pub msg: ProtocolMessage,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageSender: Debug + Send + Sync + 'static {
    async fn send(&self, to: PeerId, msg: ProtocolMessage) {
        if let Err(e) = self.try_send(to, msg).await {
            warn!("error sending message to {}: {}", to, e);
        }
    }

    async fn try_send(&self, to: PeerId, msg: ProtocolMessage) -> Result<(), TraversalError>;
}

/// The producer side of the router's bounded outbound queue. Sending waits while the queue is
///  full.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> (OutboundQueue, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (OutboundQueue { tx }, rx)
    }
}

#[async_trait]
impl MessageSender for OutboundQueue {
    async fn try_send(&self, to: PeerId, msg: ProtocolMessage) -> Result<(), TraversalError> {
        trace!(%to, ?msg, "enqueueing outbound message");
        self.tx.send(OutboundMessage { to, msg }).await
            .map_err(|_| TraversalError::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::peer::test_peer_id_from_number;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_outbound_queue_fifo() {
        let (queue, mut rx) = OutboundQueue::new(10);
        for n in 1..=3 {
            queue.try_send(test_peer_id_from_number(n), ProtocolMessage::ConnectionRequest { target: test_peer_id_from_number(9) }).await.unwrap();
        }
        for n in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().to, test_peer_id_from_number(n));
        }
    }

    #[tokio::test]
    async fn test_outbound_queue_waits_when_full() {
        let (queue, mut rx) = OutboundQueue::new(1);
        let msg = ProtocolMessage::ConnectionRequest { target: test_peer_id_from_number(9) };
        queue.try_send(test_peer_id_from_number(1), msg.clone()).await.unwrap();

        assert!(timeout(Duration::from_millis(20), queue.try_send(test_peer_id_from_number(2), msg.clone())).await.is_err());

        rx.recv().await.unwrap();
        queue.try_send(test_peer_id_from_number(3), msg).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().to, test_peer_id_from_number(3));
    }

    #[tokio::test]
    async fn test_outbound_queue_closed() {
        let (queue, rx) = OutboundQueue::new(10);
        drop(rx);
        match queue.try_send(test_peer_id_from_number(1), ProtocolMessage::ConnectionRequest { target: test_peer_id_from_number(2) }).await {
            Err(TraversalError::QueueClosed) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }
}
