use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use libp2p::identity::{ed25519, Keypair};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use nat_traversal::messaging::peer_address_info::PeerAddressInfo;
use nat_traversal::transport::tcp::{TcpHost, TcpHostConfig};
use nat_traversal::transport::Host;
use nat_traversal::traversal::nat_traversal::NatTraversal;
use nat_traversal::traversal::traversal_config::TraversalConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, Level};

/// A client: connects to service nodes, and optionally asks them to broker a direct connection
///  to a remote peer
#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = 4002)]
    port: u16,

    /// service node address, e.g. /ip4/35.196.131.102/tcp/4001/p2p/12D3KooW...
    #[clap(short, long)]
    bootnode: Vec<String>,

    /// the peer to connect to: either a peer id, or an address ending in /p2p/<peer id>. If an
    ///  address is given, a direct dial is tried before falling back to hole punching.
    #[clap(short, long)]
    remote: Option<String>,

    #[clap(long, default_value_t = false)]
    allow_private: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.bootnode.is_empty() {
        return Err(anyhow!("missing service node addresses"));
    }

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let remote = args.remote
        .as_deref()
        .map(parse_remote)
        .transpose()?;

    let secret = ed25519::SecretKey::try_from_bytes(rand::random::<[u8; 32]>())?;
    let peer_id = Keypair::from(ed25519::Keypair::from(secret)).public().to_peer_id();

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let host = TcpHost::bind(peer_id, TcpHostConfig::new(listen_addr)).await?;

    let mut config = TraversalConfig::new();
    config.allow_private_addresses = args.allow_private;
    let node = NatTraversal::new(host.clone(), host.address_book(), config).await?;
    info!("client {} listening on {}", peer_id, host.listen_addr());

    if node.connect_to_service_nodes(&args.bootnode).await == 0 {
        return Err(anyhow!("could not connect to any service node"));
    }

    // give the remote peer time to register with the service node as well
    sleep(Duration::from_secs(6)).await;

    if let Some((remote, addrs)) = &remote {
        if !addrs.is_empty() {
            match host.dial(&PeerAddressInfo::new(*remote, addrs.clone()), Duration::from_secs(5)).await {
                Ok(()) => info!("connected to {} directly", remote),
                Err(e) => info!("direct connection to {} failed, trying hole punching: {}", remote, e),
            }
        }
    }

    if let Some((remote, _)) = remote.filter(|(remote, _)| !host.is_connected(remote)) {
        let pending = node.connect_through_hole_punching(remote).await?;
        match timeout(Duration::from_secs(60), pending).await {
            Ok(Ok(())) => info!("connected to {} through hole punching", remote),
            Ok(Err(e)) => error!("hole punching failed: {}", e),
            Err(_) => error!("no answer from the service node"),
        }
    }

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}

fn parse_remote(s: &str) -> anyhow::Result<(PeerId, Vec<Multiaddr>)> {
    if let Ok(peer) = s.parse::<PeerId>() {
        return Ok((peer, Vec::new()));
    }

    let mut addr: Multiaddr = s.parse()?;
    match addr.pop() {
        Some(Protocol::P2p(peer)) => Ok((peer, vec![addr])),
        _ => Err(anyhow!("remote must be a peer id or an address ending in /p2p/<peer id>")),
    }
}
