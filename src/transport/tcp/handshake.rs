use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use libp2p::{Multiaddr, PeerId};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::messaging::framing::{read_frame, write_frame};
use crate::messaging::peer_address_info::PeerAddressInfo;
use crate::util::buf::{put_string, try_get_string};

/// The first frame on every connection, sent by both sides. It identifies the sender and the
///  addresses it listens on. On the dialing side it also names the protocol the connection is
///  opened for, an empty protocol meaning a plain connection without a stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Hello {
    pub protocol: String,
    pub peer: PeerAddressInfo,
}

impl Hello {
    pub fn new(protocol: &str, peer_id: PeerId, listen_addrs: Vec<Multiaddr>) -> Hello {
        Hello {
            protocol: protocol.to_string(),
            peer: PeerAddressInfo::new(peer_id, listen_addrs),
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_string(buf, &self.protocol);
        self.peer.ser(buf);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Hello> {
        let protocol = try_get_string(buf)?;
        let peer = PeerAddressInfo::try_deser(buf)?;
        Ok(Hello { protocol, peer })
    }
}

/// Send our own hello and read the remote's. Both sides write before they read, which makes the
///  exchange work for simultaneous open, where each side believes it is the dialer.
pub async fn exchange_hello<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, own: &Hello, max_frame_size: usize) -> anyhow::Result<Hello> {
    let mut buf = BytesMut::new();
    own.ser(&mut buf);
    write_frame(stream, &buf, max_frame_size).await?;

    let Some(frame) = read_frame(stream, max_frame_size).await? else {
        bail!("connection closed during handshake");
    };
    let mut parse_buf = frame.as_ref();
    let remote = Hello::try_deser(&mut parse_buf)?;
    if parse_buf.has_remaining() {
        bail!("{} trailing bytes in hello", parse_buf.remaining());
    }
    Ok(remote)
}
