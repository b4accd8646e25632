use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::error::TraversalError;
use crate::messaging::peer_address_info::PeerAddressInfo;
use crate::transport::{DialError, Host};
use crate::traversal::pending_connections::PendingConnections;
use crate::traversal::traversal_config::TraversalConfig;

/// Carries out a hole punch on request of a service node: dials the remote peer a bounded
///  number of times, and reports the outcome to a local requester if there is one.
pub struct PunchExecutor {
    host: Arc<dyn Host>,
    pending: Arc<PendingConnections>,
    config: Arc<TraversalConfig>,
}

impl PunchExecutor {
    pub fn new(host: Arc<dyn Host>, pending: Arc<PendingConnections>, config: Arc<TraversalConfig>) -> PunchExecutor {
        PunchExecutor {
            host,
            pending,
            config,
        }
    }

    #[instrument(skip(self), fields(remote = %remote.id))]
    pub async fn handle_hole_punch_request(&self, remote: PeerAddressInfo) {
        let result = self.dial_with_retries(&remote).await;

        match &result {
            Ok(()) => info!("hole punch succeeded"),
            Err(e) => warn!("hole punch failed: {}", e),
        }

        // on the passive side of a punch, nobody is waiting for the result
        if !self.pending.complete(&remote.id, result).await {
            debug!("no pending request for this peer");
        }
    }

    async fn dial_with_retries(&self, remote: &PeerAddressInfo) -> Result<(), TraversalError> {
        let max_attempts = self.config.dial_attempts;
        let mut last_error = DialError::NoAddresses;

        for attempt in 1..=max_attempts {
            // a dial failure from an earlier attempt (or an earlier punch) must not
            //  short-circuit this one
            self.host.clear_backoff(&remote.id).await;

            match self.host.dial(remote, self.config.dial_timeout).await {
                Ok(()) => {
                    debug!(attempt, "connected");
                    return Ok(());
                }
                Err(e) => {
                    debug!(attempt, max_attempts, "dial attempt failed: {}", e);
                    let is_unreachable = e.is_host_unreachable();
                    last_error = e;

                    if is_unreachable && attempt < max_attempts {
                        sleep(self.config.unreachable_pause).await;
                    }
                }
            }
        }

        Err(TraversalError::DialFailed {
            peer: remote.id,
            attempts: max_attempts,
            source: last_error,
        })
    }
}
