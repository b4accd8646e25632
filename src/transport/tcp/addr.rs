use std::net::{IpAddr, SocketAddr};

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;

pub fn socket_to_multiaddr(addr: SocketAddr) -> Multiaddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    };
    Multiaddr::empty()
        .with(ip)
        .with(Protocol::Tcp(addr.port()))
}

/// The TCP socket address a multiaddr of the form `/ip{4,6}/<ip>/tcp/<port>[/p2p/<peer id>]`
///  refers to, or `None` for anything a plain TCP dial can not reach (DNS names, relays, UDP).
pub fn multiaddr_to_socket(addr: &Multiaddr) -> Option<SocketAddr> {
    let mut iter = addr.iter();
    let ip = match iter.next()? {
        Protocol::Ip4(ip) => IpAddr::V4(ip),
        Protocol::Ip6(ip) => IpAddr::V6(ip),
        _ => return None,
    };
    let port = match iter.next()? {
        Protocol::Tcp(port) => port,
        _ => return None,
    };
    match iter.next() {
        None | Some(Protocol::P2p(_)) => {}
        Some(_) => return None,
    }
    if iter.next().is_some() {
        return None;
    }
    Some(SocketAddr::new(ip, port))
}

/// A peer listening on a wildcard address advertises e.g. `/ip4/0.0.0.0/tcp/4001`, which is
///  useless for others. Such addresses are rewritten to the IP the peer was actually seen at.
pub fn with_observed_ip(advertised: &Multiaddr, observed_ip: IpAddr) -> Multiaddr {
    advertised.iter()
        .map(|p| match p {
            Protocol::Ip4(ip) if ip.is_unspecified() => ip_protocol(observed_ip),
            Protocol::Ip6(ip) if ip.is_unspecified() => ip_protocol(observed_ip),
            other => other,
        })
        .collect()
}

fn ip_protocol(ip: IpAddr) -> Protocol<'static> {
    match ip {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    }
}
