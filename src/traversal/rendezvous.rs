use std::sync::Arc;
use std::time::Duration;

use libp2p::PeerId;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::discovery::resolver::PeerAddressResolver;
use crate::messaging::message_sender::MessageSender;
use crate::messaging::protocol_message::ProtocolMessage;

/// The service node's side of the protocol: brokers a hole punch between the sender of a
///  connection request and its target. Each request is handled independently of all others.
pub struct RendezvousCoordinator<S: MessageSender> {
    resolver: PeerAddressResolver,
    sender: Arc<S>,
    stagger: Duration,
}

impl<S: MessageSender> RendezvousCoordinator<S> {
    pub fn new(resolver: PeerAddressResolver, sender: Arc<S>, stagger: Duration) -> RendezvousCoordinator<S> {
        RendezvousCoordinator {
            resolver,
            sender,
            stagger,
        }
    }

    #[instrument(skip(self))]
    pub async fn handle_connection_request(&self, initiator: PeerId, target: PeerId) {
        info!("brokering connection");

        let initiator_info = match self.resolver.resolve(initiator).await {
            Ok(info) => info,
            Err(e) => {
                warn!("could not resolve initiator: {}", e);
                self.sender.send(initiator, ProtocolMessage::ConnectionFailed { target, reason: e.to_string() }).await;
                return;
            }
        };

        // the target dials first: by the time the initiator's dial goes out, there is a
        //  mapping in the target's NAT for it
        debug!(?initiator_info, "sending hole punch request to target");
        self.sender.send(target, ProtocolMessage::HolePunchRequest { peer_info: initiator_info }).await;

        sleep(self.stagger).await;

        let target_info = match self.resolver.resolve(target).await {
            Ok(info) => info,
            Err(e) => {
                warn!("could not resolve target: {}", e);
                self.sender.send(initiator, ProtocolMessage::ConnectionFailed { target, reason: e.to_string() }).await;
                return;
            }
        };

        debug!(?target_info, "sending hole punch request to initiator");
        self.sender.send(initiator, ProtocolMessage::HolePunchRequest { peer_info: target_info }).await;
    }
}
