use std::net::{Ipv4Addr, Ipv6Addr};

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;

/// Reduce a peer's known addresses to those a peer on the public internet can dial. Relayed
///  addresses are always dropped since a relay can not take part in a hole punch.
///
/// `allow_private` keeps loopback, private and link-local addresses, which is what LAN
///  deployments and local tests need.
pub fn filter_public_addresses(addrs: &[Multiaddr], allow_private: bool) -> Vec<Multiaddr> {
    addrs.iter()
        .filter(|addr| !is_relayed(addr))
        .filter(|addr| allow_private || is_publicly_routable(addr))
        .cloned()
        .collect()
}

fn is_relayed(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

/// Only the leading IP component is checked; DNS names are assumed to be public.
fn is_publicly_routable(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => is_public_v4(ip),
        Some(Protocol::Ip6(ip)) => is_public_v6(ip),
        Some(_) => true,
        None => false,
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let is_shared = ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64;

    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || is_shared)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(v4);
    }

    let first_segment = ip.segments()[0];
    let is_unique_local = (first_segment & 0xfe00) == 0xfc00;
    let is_unicast_link_local = (first_segment & 0xffc0) == 0xfe80;

    !(ip.is_loopback()
        || ip.is_unspecified()
        || is_unique_local
        || is_unicast_link_local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::public_v4("/ip4/35.196.131.102/tcp/3001", true)]
    #[case::loopback_v4("/ip4/127.0.0.1/tcp/3001", false)]
    #[case::private_10("/ip4/10.1.2.3/tcp/3001", false)]
    #[case::private_172("/ip4/172.16.5.4/tcp/3001", false)]
    #[case::public_172("/ip4/172.32.5.4/tcp/3001", true)]
    #[case::private_192("/ip4/192.168.1.20/tcp/3001", false)]
    #[case::public_192("/ip4/192.0.2.1/tcp/3001", true)]
    #[case::public_with_10_inside("/ip4/81.10.12.1/tcp/3001", true)]
    #[case::link_local_v4("/ip4/169.254.1.1/tcp/3001", false)]
    #[case::unspecified_v4("/ip4/0.0.0.0/tcp/3001", false)]
    #[case::shared("/ip4/100.64.0.1/tcp/3001", false)]
    #[case::not_shared("/ip4/100.128.0.1/tcp/3001", true)]
    #[case::public_v6("/ip6/2001:db8::1/tcp/3001", true)]
    #[case::loopback_v6("/ip6/::1/tcp/3001", false)]
    #[case::unique_local_v6("/ip6/fd12:3456::1/tcp/3001", false)]
    #[case::link_local_v6("/ip6/fe80::1/tcp/3001", false)]
    #[case::mapped_private_v6("/ip6/::ffff:192.168.0.1/tcp/3001", false)]
    #[case::dns("/dns4/example.com/tcp/443", true)]
    #[case::relayed("/ip4/35.196.131.102/tcp/3001/p2p-circuit", false)]
    fn test_filter_public(#[case] addr: &str, #[case] expected_kept: bool) {
        let addr: Multiaddr = addr.parse().unwrap();
        let filtered = filter_public_addresses(&[addr.clone()], false);
        assert_eq!(filtered == vec![addr], expected_kept);
    }

    #[rstest]
    #[case::loopback("/ip4/127.0.0.1/tcp/3001", true)]
    #[case::private("/ip4/192.168.1.20/tcp/3001", true)]
    #[case::relayed("/ip4/127.0.0.1/tcp/3001/p2p-circuit", false)]
    fn test_filter_allow_private(#[case] addr: &str, #[case] expected_kept: bool) {
        let addr: Multiaddr = addr.parse().unwrap();
        let filtered = filter_public_addresses(&[addr.clone()], true);
        assert_eq!(filtered == vec![addr], expected_kept);
    }

    #[test]
    fn test_filter_keeps_order() {
        let addrs: Vec<Multiaddr> = vec![
            "/ip4/8.8.8.8/tcp/1".parse().unwrap(),
            "/ip4/10.0.0.1/tcp/1".parse().unwrap(),
            "/ip4/1.1.1.1/tcp/1".parse().unwrap(),
        ];
        assert_eq!(filter_public_addresses(&addrs, false), vec![addrs[0].clone(), addrs[2].clone()]);
    }

    #[test]
    fn test_filter_empty() {
        assert!(filter_public_addresses(&[], false).is_empty());
    }
}
