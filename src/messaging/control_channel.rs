use std::fmt::{Debug, Formatter};
use std::sync::Weak;

use bytes::BytesMut;
use libp2p::PeerId;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tracing::{debug, info_span, trace, warn, Instrument};

use crate::error::TraversalError;
use crate::messaging::channel_registry::ChannelRegistry;
use crate::messaging::framing::{read_frame, write_frame};
use crate::messaging::protocol_message::ProtocolMessage;
use crate::transport::ControlStream;

/// A message as it arrived on some peer's control channel
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InboundMessage {
    pub from: PeerId,
    pub msg: ProtocolMessage,
}

/// The registry's handle to a framed control stream with one peer.
///
/// Each channel has a reader task that decodes frames and forwards them to the router's inbound
///  queue, and a writer task that serializes outgoing messages in the order they were enqueued.
///  Enqueueing never blocks, so a slow peer can not hold up the router. A peer that lets its
///  bounded writer queue fill up is considered stuck: the writer is aborted and the message is
///  rejected with [TraversalError::ChannelFull]. Dropping the channel stops the reader.
pub struct ControlChannel {
    id: u64,
    peer: PeerId,
    outgoing: mpsc::Sender<ProtocolMessage>,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl Debug for ControlChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ControlChannel{{peer:{}, id:{}}}", self.peer, self.id)
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl ControlChannel {
    pub(crate) fn spawn(
        id: u64,
        peer: PeerId,
        stream: ControlStream,
        inbound: mpsc::Sender<InboundMessage>,
        registry: Weak<ChannelRegistry>,
        max_frame_size: usize,
        queue_capacity: usize,
    ) -> ControlChannel {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outgoing, outgoing_rx) = mpsc::channel(queue_capacity);

        let span = info_span!("control_channel", %peer, id);

        let reader = {
            let registry = registry.clone();
            tokio::spawn(async move {
                match receive_loop(peer, read_half, inbound, max_frame_size).await {
                    Ok(()) => debug!("control channel closed by peer"),
                    Err(e) => warn!("{}", TraversalError::StreamDecode { peer, reason: e.to_string() }),
                }
                evict(&registry, &peer, id).await;
            }.instrument(span.clone()))
        };

        let writer = tokio::spawn(async move {
            match send_loop(write_half, outgoing_rx, max_frame_size).await {
                Ok(()) => trace!("writer shut down"),
                Err(e) => {
                    warn!("error writing to control channel, dropping it: {}", e);
                    evict(&registry, &peer, id).await;
                }
            }
        }.instrument(span));

        ControlChannel {
            id,
            peer,
            outgoing,
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Hands a message to the writer task without waiting. This fails if the writer has
    ///  terminated, i.e. if the channel is broken and about to be evicted, or if the writer queue
    ///  is full. In the latter case the writer is stopped and the caller should evict the channel.
    pub fn enqueue(&self, msg: ProtocolMessage) -> Result<(), TraversalError> {
        match self.outgoing.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                warn!(peer = %self.peer, ?msg, "writer queue is full, giving up on control channel");
                self.writer.abort();
                Err(TraversalError::ChannelFull(self.peer))
            }
            Err(TrySendError::Closed(_)) => Err(TraversalError::UnknownPeer(self.peer)),
        }
    }
}

async fn evict(registry: &Weak<ChannelRegistry>, peer: &PeerId, id: u64) {
    if let Some(registry) = registry.upgrade() {
        registry.evict(peer, id).await;
    }
}

async fn receive_loop(
    peer: PeerId,
    mut read_half: ReadHalf<ControlStream>,
    inbound: mpsc::Sender<InboundMessage>,
    max_frame_size: usize,
) -> anyhow::Result<()> {
    loop {
        let Some(frame) = read_frame(&mut read_half, max_frame_size).await? else {
            return Ok(());
        };

        let mut parse_buf = frame.as_ref();
        let msg = ProtocolMessage::try_deser(&mut parse_buf)?;
        trace!(?msg, "received message");

        // this waits while the inbound queue is full, pushing back on the remote peer
        if inbound.send(InboundMessage { from: peer, msg }).await.is_err() {
            debug!("router is shut down, no longer reading from control channel");
            return Ok(());
        }
    }
}

async fn send_loop(
    mut write_half: WriteHalf<ControlStream>,
    mut outgoing: mpsc::Receiver<ProtocolMessage>,
    max_frame_size: usize,
) -> anyhow::Result<()> {
    let mut buf = BytesMut::new();
    while let Some(msg) = outgoing.recv().await {
        trace!(?msg, "sending message");
        buf.clear();
        msg.ser(&mut buf);
        write_frame(&mut write_half, &buf, max_frame_size).await?;
    }

    let _ = write_half.shutdown().await;
    Ok(())
}
