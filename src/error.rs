use libp2p::PeerId;
use thiserror::Error;

use crate::transport::DialError;

/// Failures surfaced by the rendezvous protocol, either synchronously from the public API or
///  through a [crate::traversal::pending_connections::PendingConnection].
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error("not connected to any service node")]
    NoServiceNode,

    #[error("a hole punching request for {0} is already in progress")]
    AlreadyPending(PeerId),

    #[error("could not find addresses for peer {peer}: {reason}")]
    PeerLookupFailed { peer: PeerId, reason: String },

    #[error("could not (de)serialize peer address info: {0}")]
    SerializationFailed(String),

    #[error("all {attempts} dial attempts to {peer} failed, last error: {source}")]
    DialFailed {
        peer: PeerId,
        attempts: usize,
        #[source]
        source: DialError,
    },

    #[error("no control channel for peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer {0} is not reading from its control channel")]
    ChannelFull(PeerId),

    #[error("control channel to {peer} broke: {reason}")]
    StreamDecode { peer: PeerId, reason: String },

    #[error("service node {service_node} could not broker the connection: {reason}")]
    RendezvousFailed { service_node: PeerId, reason: String },

    #[error("the message router is not running")]
    QueueClosed,

    #[error("the hole punching request was dropped before it completed")]
    Abandoned,
}
