use clap::Parser;
use clap_derive::Parser;
use libp2p::identity::{ed25519, Keypair};
use nat_traversal::transport::tcp::{TcpHost, TcpHostConfig};
use nat_traversal::traversal::nat_traversal::NatTraversal;
use nat_traversal::traversal::traversal_config::TraversalConfig;
use std::net::SocketAddr;
use tracing::{info, Level};

/// A service node: accepts control channels from clients and brokers hole punches between them
#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = 4001)]
    port: u16,

    /// hand out loopback and private addresses, e.g. for trying things out on a LAN
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

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let secret = ed25519::SecretKey::try_from_bytes(rand::random::<[u8; 32]>())?;
    let peer_id = Keypair::from(ed25519::Keypair::from(secret)).public().to_peer_id();

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let host = TcpHost::bind(peer_id, TcpHostConfig::new(listen_addr)).await?;

    let mut config = TraversalConfig::new();
    config.allow_private_addresses = args.allow_private;
    let node = NatTraversal::new(host.clone(), host.address_book(), config).await?;

    info!("service node running, clients connect to {}/p2p/{}", host.listen_multiaddr(), peer_id);

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}
