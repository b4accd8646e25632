use std::sync::Arc;

use async_trait::async_trait;
use libp2p::PeerId;
#[cfg(test)] use mockall::automock;
use tokio::select;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::error::TraversalError;
use crate::messaging::channel_registry::ChannelRegistry;
use crate::messaging::control_channel::InboundMessage;
use crate::messaging::message_sender::OutboundMessage;
use crate::messaging::peer_address_info::PeerAddressInfo;
use crate::messaging::protocol_message::ProtocolMessage;

/// The node-side reaction to each kind of protocol message. Every call runs in its own task, so
///  implementations are free to wait (for discovery, for dials, for stagger intervals).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProtocolHandler: Send + Sync + 'static {
    async fn on_connection_request(&self, initiator: PeerId, target: PeerId);
    async fn on_hole_punch_request(&self, sender: PeerId, remote: PeerAddressInfo);
    async fn on_connection_failed(&self, sender: PeerId, target: PeerId, reason: String);
    /// An outbound message could not be handed to the receiver's control channel
    async fn on_undeliverable(&self, to: PeerId, msg: ProtocolMessage, error: TraversalError);
}

/// The single coordination loop between control channels and protocol logic. It takes one item
///  per iteration from whichever of its two queues has work: inbound messages are dispatched to
///  a handler task, outbound messages are handed to the target peer's channel writer.
pub struct MessageRouter {
    inbound: mpsc::Receiver<InboundMessage>,
    outbound: mpsc::Receiver<OutboundMessage>,
    registry: Arc<ChannelRegistry>,
    handler: Arc<dyn ProtocolHandler>,
    cancel: broadcast::Receiver<()>,
}

impl MessageRouter {
    pub fn new(
        inbound: mpsc::Receiver<InboundMessage>,
        outbound: mpsc::Receiver<OutboundMessage>,
        registry: Arc<ChannelRegistry>,
        handler: Arc<dyn ProtocolHandler>,
        cancel: broadcast::Receiver<()>,
    ) -> MessageRouter {
        MessageRouter {
            inbound,
            outbound,
            registry,
            handler,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let mut tasks = JoinSet::new();

        info!("starting message router");
        loop {
            select! {
                msg = self.inbound.recv() => {
                    match msg {
                        Some(msg) => self.dispatch(&mut tasks, msg),
                        None => break,
                    }
                }
                msg = self.outbound.recv() => {
                    match msg {
                        Some(msg) => self.transmit(&mut tasks, msg).await,
                        None => break,
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!("message handler panicked: {}", e);
                        }
                    }
                }
                _ = self.cancel.recv() => break,
            }
        }

        info!("message router shut down, abandoning {} running handler(s)", tasks.len());
        tasks.abort_all();
    }

    fn dispatch(&self, tasks: &mut JoinSet<()>, inbound: InboundMessage) {
        let InboundMessage { from, msg } = inbound;
        debug!(%from, ?msg, "dispatching inbound message");

        let handler = self.handler.clone();
        match msg {
            ProtocolMessage::ConnectionRequest { target } => {
                tasks.spawn(async move { handler.on_connection_request(from, target).await });
            }
            ProtocolMessage::HolePunchRequest { peer_info } => {
                tasks.spawn(async move { handler.on_hole_punch_request(from, peer_info).await });
            }
            ProtocolMessage::ConnectionFailed { target, reason } => {
                tasks.spawn(async move { handler.on_connection_failed(from, target, reason).await });
            }
        }
    }

    async fn transmit(&self, tasks: &mut JoinSet<()>, outbound: OutboundMessage) {
        let OutboundMessage { to, msg } = outbound;
        trace!(%to, ?msg, "transmitting outbound message");
        if let Err(e) = self.registry.send(&to, msg.clone()).await {
            warn!("dropping outbound message to {}: {}", to, e);
            let handler = self.handler.clone();
            tasks.spawn(async move { handler.on_undeliverable(to, msg, e).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::framing::{read_frame, write_frame};
    use crate::messaging::MAX_FRAME_SIZE;
    use crate::test_util::peer::test_peer_id_from_number;
    use bytes::BytesMut;
    use mockall::predicate::eq;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    struct Fixture {
        inbound_tx: mpsc::Sender<InboundMessage>,
        outbound_tx: mpsc::Sender<OutboundMessage>,
        registry: Arc<ChannelRegistry>,
        cancel_tx: broadcast::Sender<()>,
    }

    fn start_router(handler: MockProtocolHandler) -> (Fixture, tokio::task::JoinHandle<()>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(10);
        let (outbound_tx, outbound_rx) = mpsc::channel(10);
        let registry = ChannelRegistry::new(inbound_tx.clone(), MAX_FRAME_SIZE, 10);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);

        let router = MessageRouter::new(inbound_rx, outbound_rx, registry.clone(), Arc::new(handler), cancel_rx);
        let join_handle = tokio::spawn(router.run());

        (Fixture { inbound_tx, outbound_tx, registry, cancel_tx }, join_handle)
    }

    #[tokio::test]
    async fn test_dispatch_connection_request() {
        let initiator = test_peer_id_from_number(1);
        let target = test_peer_id_from_number(2);

        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = std::sync::Mutex::new(Some(done_tx));

        let mut handler = MockProtocolHandler::new();
        handler.expect_on_connection_request()
            .with(eq(initiator), eq(target))
            .times(1)
            .returning(move |_, _| {
                if let Some(tx) = done_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            });

        let (fixture, _join_handle) = start_router(handler);
        fixture.inbound_tx.send(InboundMessage { from: initiator, msg: ProtocolMessage::ConnectionRequest { target } }).await.unwrap();

        timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_hole_punch_and_failure() {
        let service_node = test_peer_id_from_number(1);
        let remote = PeerAddressInfo::new(test_peer_id_from_number(2), vec!["/ip4/35.196.131.102/tcp/3001".parse().unwrap()]);
        let target = test_peer_id_from_number(3);

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let punch_done = done_tx.clone();

        let mut handler = MockProtocolHandler::new();
        handler.expect_on_hole_punch_request()
            .with(eq(service_node), eq(remote.clone()))
            .times(1)
            .returning(move |_, _| { let _ = punch_done.send("punch"); });
        handler.expect_on_connection_failed()
            .with(eq(service_node), eq(target), eq("no addresses".to_string()))
            .times(1)
            .returning(move |_, _, _| { let _ = done_tx.send("failed"); });

        let (fixture, _join_handle) = start_router(handler);
        fixture.inbound_tx.send(InboundMessage { from: service_node, msg: ProtocolMessage::HolePunchRequest { peer_info: remote } }).await.unwrap();
        fixture.inbound_tx.send(InboundMessage { from: service_node, msg: ProtocolMessage::ConnectionFailed { target, reason: "no addresses".to_string() } }).await.unwrap();

        let mut received = vec![
            timeout(Duration::from_secs(5), done_rx.recv()).await.unwrap().unwrap(),
            timeout(Duration::from_secs(5), done_rx.recv()).await.unwrap().unwrap(),
        ];
        received.sort();
        assert_eq!(received, vec!["failed", "punch"]);
    }

    #[tokio::test]
    async fn test_outbound_is_written_to_channel() {
        let (fixture, _join_handle) = start_router(MockProtocolHandler::new());

        let peer = test_peer_id_from_number(1);
        let (local, mut remote) = duplex(1024);
        fixture.registry.register(peer, Box::new(local)).await;

        let msg = ProtocolMessage::ConnectionRequest { target: test_peer_id_from_number(2) };
        fixture.outbound_tx.send(OutboundMessage { to: peer, msg: msg.clone() }).await.unwrap();

        let frame = timeout(Duration::from_secs(5), read_frame(&mut remote, MAX_FRAME_SIZE)).await.unwrap().unwrap().unwrap();
        let mut parse_buf = frame.as_ref();
        assert_eq!(ProtocolMessage::try_deser(&mut parse_buf).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_outbound_to_unknown_peer_is_reported() {
        let to = test_peer_id_from_number(5);
        let msg = ProtocolMessage::ConnectionRequest { target: test_peer_id_from_number(6) };

        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = std::sync::Mutex::new(Some(done_tx));

        let mut handler = MockProtocolHandler::new();
        handler.expect_on_undeliverable()
            .withf(move |p, m, e| *p == to && matches!(m, ProtocolMessage::ConnectionRequest { .. }) && matches!(e, TraversalError::UnknownPeer(x) if *x == to))
            .times(1)
            .returning(move |_, _, _| {
                if let Some(tx) = done_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            });

        let (fixture, join_handle) = start_router(handler);
        fixture.outbound_tx.send(OutboundMessage { to, msg }).await.unwrap();
        timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();

        // the loop keeps going and still reacts to cancellation
        fixture.cancel_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), join_handle).await.unwrap().unwrap();
    }

    struct PanickingHandler {
        failures: mpsc::UnboundedSender<PeerId>,
    }

    #[async_trait]
    impl ProtocolHandler for PanickingHandler {
        async fn on_connection_request(&self, _initiator: PeerId, _target: PeerId) {
            panic!("handler failure");
        }
        async fn on_hole_punch_request(&self, _sender: PeerId, _remote: PeerAddressInfo) {}
        async fn on_connection_failed(&self, _sender: PeerId, target: PeerId, _reason: String) {
            let _ = self.failures.send(target);
        }
        async fn on_undeliverable(&self, _to: PeerId, _msg: ProtocolMessage, _error: TraversalError) {}
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_router() {
        let peer = test_peer_id_from_number(1);
        let target = test_peer_id_from_number(2);
        let (failures, mut failures_rx) = mpsc::unbounded_channel();

        let (inbound_tx, inbound_rx) = mpsc::channel(10);
        let (_outbound_tx, outbound_rx) = mpsc::channel(10);
        let registry = ChannelRegistry::new(inbound_tx.clone(), MAX_FRAME_SIZE, 10);
        let (_cancel_tx, cancel_rx) = broadcast::channel(1);
        tokio::spawn(MessageRouter::new(inbound_rx, outbound_rx, registry, Arc::new(PanickingHandler { failures }), cancel_rx).run());

        inbound_tx.send(InboundMessage { from: peer, msg: ProtocolMessage::ConnectionRequest { target } }).await.unwrap();
        inbound_tx.send(InboundMessage { from: peer, msg: ProtocolMessage::ConnectionFailed { target, reason: "x".to_string() } }).await.unwrap();

        assert_eq!(timeout(Duration::from_secs(5), failures_rx.recv()).await.unwrap(), Some(target));
    }

    #[tokio::test]
    async fn test_inbound_from_channel_reaches_handler() {
        let peer = test_peer_id_from_number(1);
        let target = test_peer_id_from_number(2);
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = std::sync::Mutex::new(Some(done_tx));

        let mut handler = MockProtocolHandler::new();
        handler.expect_on_connection_request()
            .with(eq(peer), eq(target))
            .times(1)
            .returning(move |_, _| {
                if let Some(tx) = done_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            });

        let (fixture, _join_handle) = start_router(handler);
        let (local, mut remote) = duplex(1024);
        fixture.registry.register(peer, Box::new(local)).await;

        let mut buf = BytesMut::new();
        ProtocolMessage::ConnectionRequest { target }.ser(&mut buf);
        write_frame(&mut remote, &buf, MAX_FRAME_SIZE).await.unwrap();

        timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
    }
}
