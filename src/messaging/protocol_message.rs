use anyhow::anyhow;
use bytes::{Buf, BufMut, BytesMut};
use libp2p::PeerId;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::TraversalError;
use crate::messaging::peer_address_info::PeerAddressInfo;
use crate::util::buf::{put_bytes, put_string, try_get_bytes, try_get_string};

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
    ConnectionRequest = 0,
    HolePunchRequest = 1,
    ConnectionFailed = 2,
}

/// The messages exchanged over control channels. The sender is never part of a message: it is
///  the peer at the other end of the channel the message arrived on.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProtocolMessage {
    /// client -> service node: please broker a direct connection between me and `target`
    ConnectionRequest { target: PeerId },
    /// service node -> both parties: dial the peer described in `peer_info` now
    HolePunchRequest { peer_info: PeerAddressInfo },
    /// service node -> initiator: the request for `target` could not be brokered
    ConnectionFailed { target: PeerId, reason: String },
}

impl ProtocolMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ProtocolMessage::ConnectionRequest { .. } => MessageType::ConnectionRequest,
            ProtocolMessage::HolePunchRequest { .. } => MessageType::HolePunchRequest,
            ProtocolMessage::ConnectionFailed { .. } => MessageType::ConnectionFailed,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.message_type().into());

        match self {
            ProtocolMessage::ConnectionRequest { target } => {
                put_peer_id_hex(buf, target);
            }
            ProtocolMessage::HolePunchRequest { peer_info } => {
                let mut info_buf = BytesMut::new();
                peer_info.ser(&mut info_buf);
                put_bytes(buf, &info_buf);
            }
            ProtocolMessage::ConnectionFailed { target, reason } => {
                put_peer_id_hex(buf, target);
                put_string(buf, reason);
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<ProtocolMessage> {
        let message_type = MessageType::try_from(buf.try_get_u8()?)?;

        let result = match message_type {
            MessageType::ConnectionRequest => ProtocolMessage::ConnectionRequest {
                target: try_get_peer_id_hex(buf)?,
            },
            MessageType::HolePunchRequest => {
                let mut info_buf = try_get_bytes(buf)?;
                ProtocolMessage::HolePunchRequest {
                    peer_info: PeerAddressInfo::try_deser(&mut info_buf)
                        .map_err(|e| TraversalError::SerializationFailed(e.to_string()))?,
                }
            }
            MessageType::ConnectionFailed => ProtocolMessage::ConnectionFailed {
                target: try_get_peer_id_hex(buf)?,
                reason: try_get_string(buf)?,
            },
        };
        Ok(result)
    }
}

fn put_peer_id_hex(buf: &mut BytesMut, peer: &PeerId) {
    put_string(buf, &hex::encode(peer.to_bytes()));
}

fn try_get_peer_id_hex(buf: &mut impl Buf) -> anyhow::Result<PeerId> {
    let s = try_get_string(buf)?;
    let raw = hex::decode(&s)
        .map_err(|e| anyhow!("peer id {:?} is not valid hex: {}", s, e))?;
    Ok(PeerId::from_bytes(&raw)?)
}
