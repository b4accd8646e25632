use anyhow::anyhow;
use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::discovery::Discovery;

/// Known addresses per peer, in the order they were learned. Addresses learned from a peer's own
///  connection come before those it advertised, so the most reliable address is tried first.
#[derive(Default)]
pub struct AddressBook {
    addrs: RwLock<FxHashMap<PeerId, Vec<Multiaddr>>>,
}

impl AddressBook {
    pub fn new() -> AddressBook {
        Default::default()
    }

    pub async fn add_addresses(&self, peer: PeerId, addrs: &[Multiaddr]) {
        let mut lock = self.addrs.write().await;
        let known = lock.entry(peer).or_default();
        for addr in addrs {
            if !known.contains(addr) {
                trace!(%peer, %addr, "new address");
                known.push(addr.clone());
            }
        }
    }

    pub async fn get(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addrs.read().await
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn peers(&self) -> Vec<PeerId> {
        self.addrs.read().await
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Discovery for AddressBook {
    async fn find_peer(&self, peer: PeerId) -> anyhow::Result<Vec<Multiaddr>> {
        self.addrs.read().await
            .get(&peer)
            .cloned()
            .ok_or_else(|| anyhow!("peer {} is not in the address book", peer))
    }
}
