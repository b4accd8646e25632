use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
#[cfg(test)] use mockall::automock;

pub mod address_filter;
pub mod resolver;

/// Looks up the network addresses a peer is known under. A service node uses this to learn how
///  the two parties of a hole punch can be reached.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    async fn find_peer(&self, peer: PeerId) -> anyhow::Result<Vec<Multiaddr>>;
}
