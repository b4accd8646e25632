use std::fmt::{Debug, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use libp2p::{Multiaddr, PeerId};

use crate::util::buf::{put_bytes, try_get_bytes};

/// A peer together with the network addresses it can be dialed on. This is what a service node
///  hands to each party of a hole punch.
#[derive(Clone, Eq, PartialEq)]
pub struct PeerAddressInfo {
    pub id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl Debug for PeerAddressInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}: [", self.id)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", addr)?;
        }
        write!(f, "]}}")
    }
}

impl PeerAddressInfo {
    /// an upper bound to keep a malicious or broken peer from making us allocate huge vectors
    const MAX_NUM_ADDRS: usize = 256;

    pub fn new(id: PeerId, addrs: Vec<Multiaddr>) -> PeerAddressInfo {
        PeerAddressInfo { id, addrs }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_bytes(buf, &self.id.to_bytes());
        buf.put_usize_varint(self.addrs.len());
        for addr in &self.addrs {
            put_bytes(buf, &addr.to_vec());
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<PeerAddressInfo> {
        let id = PeerId::from_bytes(&try_get_bytes(buf)?)?;

        let num_addrs = buf.try_get_usize_varint()?;
        if num_addrs > Self::MAX_NUM_ADDRS {
            bail!("peer address info with {} addresses exceeds the limit of {}", num_addrs, Self::MAX_NUM_ADDRS);
        }

        let mut addrs = Vec::with_capacity(num_addrs);
        for _ in 0..num_addrs {
            let raw = try_get_bytes(buf)?;
            addrs.push(Multiaddr::try_from(raw.to_vec())?);
        }

        Ok(PeerAddressInfo { id, addrs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::peer::test_peer_id_from_number;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::no_addrs(vec![])]
    #[case::single(vec!["/ip4/35.196.131.102/tcp/3001"])]
    #[case::mixed(vec!["/ip4/1.2.3.4/tcp/3001", "/ip6/2001:db8::1/tcp/4001", "/dns4/example.com/tcp/443"])]
    fn test_ser_deser(#[case] addrs: Vec<&str>) {
        let info = PeerAddressInfo::new(
            test_peer_id_from_number(7),
            addrs.iter().map(|a| a.parse().unwrap()).collect(),
        );

        let mut buf = BytesMut::new();
        info.ser(&mut buf);

        let mut parse_buf = buf.as_ref();
        let deser = PeerAddressInfo::try_deser(&mut parse_buf).unwrap();
        assert!(parse_buf.is_empty());
        assert_eq!(deser, info);
    }

    #[test]
    fn test_deser_truncated() {
        let info = PeerAddressInfo::new(test_peer_id_from_number(1), vec!["/ip4/1.2.3.4/tcp/3001".parse().unwrap()]);
        let mut buf = BytesMut::new();
        info.ser(&mut buf);

        let truncated = &buf[..buf.len() - 3];
        let mut parse_buf = truncated;
        assert!(PeerAddressInfo::try_deser(&mut parse_buf).is_err());
    }

    #[test]
    fn test_deser_invalid_peer_id() {
        let mut parse_buf: &[u8] = b"\x03abc\0";
        assert!(PeerAddressInfo::try_deser(&mut parse_buf).is_err());
    }

    #[test]
    fn test_deser_too_many_addrs() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &test_peer_id_from_number(1).to_bytes());
        buf.put_usize_varint(100_000);

        let mut parse_buf = buf.as_ref();
        assert!(PeerAddressInfo::try_deser(&mut parse_buf).is_err());
    }

    #[test]
    fn test_debug() {
        let id = test_peer_id_from_number(3);
        let info = PeerAddressInfo::new(id, vec!["/ip4/1.2.3.4/tcp/5".parse().unwrap(), "/ip4/5.6.7.8/tcp/9".parse().unwrap()]);
        assert_eq!(format!("{:?}", info), format!("{{{}: [/ip4/1.2.3.4/tcp/5, /ip4/5.6.7.8/tcp/9]}}", id));
    }
}
