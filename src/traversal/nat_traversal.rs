use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::discovery::resolver::PeerAddressResolver;
use crate::discovery::Discovery;
use crate::error::TraversalError;
use crate::messaging::channel_registry::ChannelRegistry;
use crate::messaging::message_sender::{MessageSender, OutboundQueue};
use crate::messaging::peer_address_info::PeerAddressInfo;
use crate::messaging::protocol_message::ProtocolMessage;
use crate::messaging::router::{MessageRouter, ProtocolHandler};
use crate::messaging::PROTOCOL_ID;
use crate::transport::{ControlStream, Host, StreamHandler};
use crate::traversal::pending_connections::{PendingConnection, PendingConnections};
use crate::traversal::punch_executor::PunchExecutor;
use crate::traversal::rendezvous::RendezvousCoordinator;
use crate::traversal::traversal_config::TraversalConfig;

/// A node taking part in the traversal protocol. Every node can act in both roles: as a client
///  asking its service nodes to broker connections, and as a service node brokering connections
///  for peers that opened a control channel to it.
pub struct NatTraversal {
    host: Arc<dyn Host>,
    registry: Arc<ChannelRegistry>,
    service_nodes: RwLock<Vec<PeerId>>,
    pending: Arc<PendingConnections>,
    outbound: OutboundQueue,
    cancel_sender: broadcast::Sender<()>,
}

impl NatTraversal {
    /// Registers the protocol's stream handler with the host and starts the message router
    pub async fn new(host: Arc<dyn Host>, discovery: Arc<dyn Discovery>, config: TraversalConfig) -> anyhow::Result<Arc<NatTraversal>> {
        config.validate()?;
        let config = Arc::new(config);

        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(config.queue_capacity);
        let (outbound, outbound_rx) = OutboundQueue::new(config.queue_capacity);
        let (cancel_sender, cancel_receiver) = broadcast::channel(1);

        let registry = ChannelRegistry::new(inbound_tx, config.max_frame_size, config.channel_queue_capacity);
        let pending = Arc::new(PendingConnections::new());

        let handler = Arc::new(TraversalProtocolHandler {
            coordinator: RendezvousCoordinator::new(
                PeerAddressResolver::new(discovery, config.discovery_timeout, config.allow_private_addresses),
                Arc::new(outbound.clone()),
                config.punch_stagger,
            ),
            executor: PunchExecutor::new(host.clone(), pending.clone(), config.clone()),
            pending: pending.clone(),
        });

        host.set_stream_handler(PROTOCOL_ID, Arc::new(InboundControlStreams { registry: registry.clone() })).await;

        let router = MessageRouter::new(inbound_rx, outbound_rx, registry.clone(), handler, cancel_receiver);
        tokio::spawn(router.run());

        info!(local_peer_id = %host.local_peer_id(), "traversal node started");

        Ok(Arc::new(NatTraversal {
            host,
            registry,
            service_nodes: Default::default(),
            pending,
            outbound,
            cancel_sender,
        }))
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.host.local_peer_id()
    }

    pub async fn service_nodes(&self) -> Vec<PeerId> {
        self.service_nodes.read().await
            .clone()
    }

    /// Open control channels to service nodes. Each address is a multiaddr ending in
    ///  `/p2p/<peer id>`. Addresses that can not be parsed or connected to are logged and
    ///  skipped. Returns the number of service nodes that were connected.
    pub async fn connect_to_service_nodes(&self, addrs: &[String]) -> usize {
        let mut num_connected = 0;
        for addr in addrs {
            match self.connect_to_service_node(addr).await {
                Ok(peer) => {
                    info!(%peer, "connected to service node");
                    num_connected += 1;
                }
                Err(e) => error!("could not connect to service node {}: {}", addr, e),
            }
        }
        num_connected
    }

    async fn connect_to_service_node(&self, addr: &str) -> anyhow::Result<PeerId> {
        let mut addr: Multiaddr = addr.parse()?;
        let peer = match addr.pop() {
            Some(Protocol::P2p(peer)) => peer,
            _ => return Err(anyhow!("address does not end in /p2p/<peer id>")),
        };

        self.host.add_addresses(peer, &[addr]).await;
        let stream = self.host.open_stream(peer, PROTOCOL_ID).await?;
        self.registry.register(peer, stream).await;

        let mut service_nodes = self.service_nodes.write().await;
        if !service_nodes.contains(&peer) {
            service_nodes.push(peer);
        }
        Ok(peer)
    }

    /// Ask the first service node with a live control channel to broker a direct connection to
    ///  `target`. The returned future resolves when the hole punch succeeded or failed.
    ///
    /// NB: if the service node accepts the request but never answers, the future does not
    ///  resolve until [NatTraversal::shutdown]. Callers should wrap it in a timeout.
    #[instrument(skip(self))]
    pub async fn connect_through_hole_punching(&self, target: PeerId) -> Result<PendingConnection, TraversalError> {
        let service_node = self.connected_service_node().await
            .ok_or(TraversalError::NoServiceNode)?;

        let pending = self.pending.insert(target).await?;

        if let Err(e) = self.outbound.try_send(service_node, ProtocolMessage::ConnectionRequest { target }).await {
            self.pending.remove(&target).await;
            return Err(e);
        }
        debug!(%service_node, "sent connection request");
        Ok(pending)
    }

    async fn connected_service_node(&self) -> Option<PeerId> {
        for service_node in self.service_nodes.read().await.iter() {
            if self.registry.is_registered(service_node).await {
                return Some(*service_node);
            }
        }
        None
    }

    /// Stops the message router. Pending requests resolve to [TraversalError::Abandoned].
    pub async fn shutdown(&self) {
        match self.cancel_sender.send(()) {
            Ok(_) => info!("shutting down"),
            Err(_) => debug!("shutdown called while the router is not running"),
        }
        self.pending.clear().await;
    }
}

/// Control streams opened by other peers, i.e. by clients of this node in its service node role
struct InboundControlStreams {
    registry: Arc<ChannelRegistry>,
}

#[async_trait]
impl StreamHandler for InboundControlStreams {
    async fn on_inbound_stream(&self, peer: PeerId, stream: ControlStream) {
        debug!(%peer, "inbound control stream");
        self.registry.register(peer, stream).await;
    }
}

struct TraversalProtocolHandler {
    coordinator: RendezvousCoordinator<OutboundQueue>,
    executor: PunchExecutor,
    pending: Arc<PendingConnections>,
}

#[async_trait]
impl ProtocolHandler for TraversalProtocolHandler {
    async fn on_connection_request(&self, initiator: PeerId, target: PeerId) {
        self.coordinator.handle_connection_request(initiator, target).await;
    }

    async fn on_hole_punch_request(&self, sender: PeerId, remote: PeerAddressInfo) {
        debug!(%sender, ?remote, "received hole punch request");
        self.executor.handle_hole_punch_request(remote).await;
    }

    async fn on_connection_failed(&self, sender: PeerId, target: PeerId, reason: String) {
        warn!(service_node = %sender, %target, "connection request failed: {}", reason);
        let error = TraversalError::RendezvousFailed { service_node: sender, reason };
        if !self.pending.complete(&target, Err(error)).await {
            debug!(%target, "no pending request for failed connection");
        }
    }

    async fn on_undeliverable(&self, to: PeerId, msg: ProtocolMessage, error: TraversalError) {
        if let ProtocolMessage::ConnectionRequest { target } = msg {
            let error = TraversalError::RendezvousFailed { service_node: to, reason: error.to_string() };
            self.pending.complete(&target, Err(error)).await;
        }
    }
}
