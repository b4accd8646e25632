pub mod tcp;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
#[cfg(test)] use mockall::automock;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::messaging::peer_address_info::PeerAddressInfo;

/// A bidirectional byte stream to a single remote peer, negotiated for one protocol.
pub trait ControlStreamIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
impl <T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ControlStreamIo for T {}

pub type ControlStream = Box<dyn ControlStreamIo>;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DialError {
    #[error("no route to host: {0}")]
    HostUnreachable(String),
    #[error("dial timed out")]
    Timeout,
    #[error("peer has no dialable addresses")]
    NoAddresses,
    #[error("peer is in dial backoff after a recent failure")]
    Backoff,
    #[error("expected to reach peer {expected}, but reached {actual}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },
    #[error("{0}")]
    Io(String),
}

impl DialError {
    pub fn from_io(e: &io::Error) -> DialError {
        match e.kind() {
            io::ErrorKind::HostUnreachable => DialError::HostUnreachable(e.to_string()),
            _ => DialError::Io(e.to_string()),
        }
    }

    /// 'no route to host' typically means that a NAT mapping or route is not in place *yet*, so
    ///  it is worth waiting a bit before trying again
    pub fn is_host_unreachable(&self) -> bool {
        matches!(self, DialError::HostUnreachable(_))
    }
}

/// Callback for streams opened by remote peers for a registered protocol.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    async fn on_inbound_stream(&self, peer: PeerId, stream: ControlStream);
}

/// The peer-to-peer host that the rendezvous protocol runs on: it owns connections, an address
///  book, and per-peer dial backoff state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Host: Send + Sync + 'static {
    fn local_peer_id(&self) -> PeerId;

    async fn add_addresses(&self, peer: PeerId, addrs: &[Multiaddr]);

    /// Open a new stream to a peer for a given protocol, using addresses from the address book
    async fn open_stream(&self, peer: PeerId, protocol: &str) -> anyhow::Result<ControlStream>;

    /// Establish a connection to a peer, trying its addresses. This returns immediately if there
    ///  is a live connection to the peer already.
    async fn dial(&self, remote: &PeerAddressInfo, timeout: Duration) -> Result<(), DialError>;

    /// Forget recent dial failures for a peer so that the next dial is actually attempted
    async fn clear_backoff(&self, peer: &PeerId);

    async fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>);
}
