use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use libp2p::PeerId;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::error::TraversalError;
use crate::messaging::control_channel::{ControlChannel, InboundMessage};
use crate::messaging::protocol_message::ProtocolMessage;
use crate::transport::ControlStream;

/// Owns the control channels to all currently connected peers (service nodes and clients alike),
///  at most one per peer.
pub struct ChannelRegistry {
    channels: RwLock<FxHashMap<PeerId, ControlChannel>>,
    inbound: mpsc::Sender<InboundMessage>,
    next_channel_id: AtomicU64,
    max_frame_size: usize,
    channel_queue_capacity: usize,
}

impl ChannelRegistry {
    pub fn new(inbound: mpsc::Sender<InboundMessage>, max_frame_size: usize, channel_queue_capacity: usize) -> Arc<ChannelRegistry> {
        Arc::new(ChannelRegistry {
            channels: Default::default(),
            inbound,
            next_channel_id: AtomicU64::new(1),
            max_frame_size,
            channel_queue_capacity,
        })
    }

    /// Start using a stream as the control channel for a peer. A channel that was previously
    ///  registered for the same peer is replaced and shut down.
    pub async fn register(self: &Arc<Self>, peer: PeerId, stream: ControlStream) {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = ControlChannel::spawn(id, peer, stream, self.inbound.clone(), Arc::downgrade(self), self.max_frame_size, self.channel_queue_capacity);

        let prev = self.channels.write().await
            .insert(peer, channel);
        match prev {
            Some(prev) => info!("replaced control channel #{} for {} with #{}", prev.id(), peer, id),
            None => debug!("registered control channel #{} for {}", id, peer),
        }
    }

    /// Enqueue a message on a peer's channel. A channel whose writer queue is full is evicted.
    pub async fn send(&self, peer: &PeerId, msg: ProtocolMessage) -> Result<(), TraversalError> {
        let result = match self.channels.read().await.get(peer) {
            Some(channel) => channel.enqueue(msg).map_err(|e| (channel.id(), e)),
            None => return Err(TraversalError::UnknownPeer(*peer)),
        };

        match result {
            Ok(()) => Ok(()),
            Err((channel_id, e @ TraversalError::ChannelFull(_))) => {
                self.evict(peer, channel_id).await;
                Err(e)
            }
            Err((_, e)) => Err(e),
        }
    }

    /// Remove a peer's channel if it is still the one identified by `channel_id`. Channel tasks
    ///  call this when their stream breaks, and the id check keeps a stale channel's task from
    ///  removing a replacement that was registered in the meantime.
    pub async fn evict(&self, peer: &PeerId, channel_id: u64) -> bool {
        let mut channels = self.channels.write().await;
        match channels.entry(*peer) {
            Entry::Occupied(e) if e.get().id() == channel_id => {
                e.remove();
                info!("evicted control channel #{} for {}", channel_id, peer);
                true
            }
            _ => false,
        }
    }

    pub async fn is_registered(&self, peer: &PeerId) -> bool {
        self.channels.read().await
            .contains_key(peer)
    }

    pub async fn peers(&self) -> Vec<PeerId> {
        self.channels.read().await
            .keys()
            .cloned()
            .collect()
    }
}
