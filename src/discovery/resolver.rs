use std::sync::Arc;
use std::time::Duration;

use libp2p::PeerId;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::discovery::address_filter::filter_public_addresses;
use crate::discovery::Discovery;
use crate::error::TraversalError;
use crate::messaging::peer_address_info::PeerAddressInfo;

/// Turns a peer id into the address info that is handed out in a hole punch request.
pub struct PeerAddressResolver {
    discovery: Arc<dyn Discovery>,
    timeout: Duration,
    allow_private: bool,
}

impl PeerAddressResolver {
    pub fn new(discovery: Arc<dyn Discovery>, timeout: Duration, allow_private: bool) -> PeerAddressResolver {
        PeerAddressResolver {
            discovery,
            timeout,
            allow_private,
        }
    }

    /// An empty address list is a valid result: the peer is known, but it has no address the
    ///  other party could dial.
    pub async fn resolve(&self, peer: PeerId) -> Result<PeerAddressInfo, TraversalError> {
        let addrs = match timeout(self.timeout, self.discovery.find_peer(peer)).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                warn!(%peer, "peer lookup failed: {}", e);
                return Err(TraversalError::PeerLookupFailed { peer, reason: e.to_string() });
            }
            Err(_) => {
                warn!(%peer, "peer lookup timed out after {:?}", self.timeout);
                return Err(TraversalError::PeerLookupFailed { peer, reason: format!("timed out after {:?}", self.timeout) });
            }
        };

        let filtered = filter_public_addresses(&addrs, self.allow_private);
        debug!(%peer, "resolved {} address(es), {} usable", addrs.len(), filtered.len());
        Ok(PeerAddressInfo::new(peer, filtered))
    }
}
