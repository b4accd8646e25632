//! A [Host] on plain TCP.
//!
//! Listener and outbound sockets share the listen port (SO_REUSEADDR / SO_REUSEPORT), so the NAT
//!  mapping created by an outbound connection is the one the peer advertises. This is what makes
//!  simultaneous connects ("hole punching") work through port-preserving NATs.

pub mod addr;
pub mod address_book;
pub mod connection_tracker;
pub mod dial_backoff;
pub mod handshake;

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use rustc_hash::FxHashMap;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::select;
use tokio::sync::{broadcast, RwLock};
use tokio::task::AbortHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::messaging::peer_address_info::PeerAddressInfo;
use crate::messaging::MAX_FRAME_SIZE;
use crate::transport::tcp::addr::{multiaddr_to_socket, socket_to_multiaddr, with_observed_ip};
use crate::transport::tcp::address_book::AddressBook;
use crate::transport::tcp::connection_tracker::{ConnectionGuard, ConnectionTracker, TrackedStream};
use crate::transport::tcp::dial_backoff::{DialBackoff, BACKOFF_INITIAL, BACKOFF_MAX};
use crate::transport::tcp::handshake::{exchange_hello, Hello};
use crate::transport::{ControlStream, DialError, Host, StreamHandler};

#[derive(Debug, Clone)]
pub struct TcpHostConfig {
    pub listen_addr: SocketAddr,
    /// bind outbound connections to the listen address
    pub reuse_port: bool,
    pub handshake_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub max_frame_size: usize,
}

impl TcpHostConfig {
    pub fn new(listen_addr: SocketAddr) -> TcpHostConfig {
        TcpHostConfig {
            listen_addr,
            reuse_port: cfg!(unix),
            handshake_timeout: Duration::from_secs(10),
            backoff_initial: BACKOFF_INITIAL,
            backoff_max: BACKOFF_MAX,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

pub struct TcpHost {
    local_peer_id: PeerId,
    listen_addr: SocketAddr,
    config: TcpHostConfig,
    address_book: Arc<AddressBook>,
    backoff: DialBackoff,
    connections: Arc<ConnectionTracker>,
    handlers: RwLock<FxHashMap<String, Arc<dyn StreamHandler>>>,
    accept_loop: AbortHandle,
    /// plain connections are held open until either side closes them, or until the host is
    ///  dropped: dropping this sender closes them
    close_connections: broadcast::Sender<()>,
}

impl Drop for TcpHost {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

impl TcpHost {
    pub async fn bind(local_peer_id: PeerId, config: TcpHostConfig) -> anyhow::Result<Arc<TcpHost>> {
        let socket = new_socket(&config.listen_addr, config.reuse_port)?;
        socket.bind(config.listen_addr)?;
        let listener = socket.listen(1024)?;
        let listen_addr = listener.local_addr()?;
        info!(%local_peer_id, %listen_addr, "listening");

        let (close_connections, _) = broadcast::channel(1);

        let host = Arc::new_cyclic(|weak: &Weak<TcpHost>| {
            let accept_loop = tokio::spawn(accept_loop(listener, weak.clone()));

            TcpHost {
                local_peer_id,
                listen_addr,
                address_book: Arc::new(AddressBook::new()),
                backoff: DialBackoff::new(config.backoff_initial, config.backoff_max),
                connections: ConnectionTracker::new(),
                handlers: Default::default(),
                accept_loop: accept_loop.abort_handle(),
                close_connections,
                config,
            }
        });
        Ok(host)
    }

    /// The actual listen address, with the port filled in if the config asked for an
    ///  ephemeral one
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn listen_multiaddr(&self) -> Multiaddr {
        socket_to_multiaddr(self.listen_addr)
    }

    pub fn address_book(&self) -> Arc<AddressBook> {
        self.address_book.clone()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connections.is_connected(peer)
    }

    fn own_hello(&self, protocol: &str) -> Hello {
        Hello::new(protocol, self.local_peer_id, vec![self.listen_multiaddr()])
    }

    #[instrument(skip(self, stream))]
    async fn handle_inbound(&self, mut stream: TcpStream, remote_addr: SocketAddr) -> anyhow::Result<()> {
        let _ = stream.set_nodelay(true);

        let hello = timeout(self.config.handshake_timeout, exchange_hello(&mut stream, &self.own_hello(""), self.config.max_frame_size)).await
            .map_err(|_| anyhow!("handshake timed out"))??;
        let peer = hello.peer.id;
        debug!(%peer, protocol = %hello.protocol, "accepted connection");

        // the address the peer was seen at goes first: with port reuse, that is where the
        //  peer's NAT has a mapping
        let mut learned = vec![socket_to_multiaddr(remote_addr)];
        learned.extend(hello.peer.addrs.iter().map(|a| with_observed_ip(a, remote_addr.ip())));
        self.address_book.add_addresses(peer, &learned).await;

        let guard = self.connections.track(peer);
        if hello.protocol.is_empty() {
            self.spawn_hold_open(stream, guard);
            return Ok(());
        }

        let handler = self.handlers.read().await
            .get(&hello.protocol)
            .cloned();
        match handler {
            Some(handler) => handler.on_inbound_stream(peer, Box::new(TrackedStream::new(stream, guard))).await,
            None => warn!(%peer, "no handler for protocol {:?}, closing stream", hello.protocol),
        }
        Ok(())
    }

    /// Keep a plain connection open until it is closed by the peer
    fn spawn_hold_open(&self, mut stream: TcpStream, guard: ConnectionGuard) {
        let mut close = self.close_connections.subscribe();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                select! {
                    n = stream.read(&mut buf) => {
                        match n {
                            Ok(0) | Err(_) => break,
                            Ok(n) => trace!("discarding {} bytes received on a plain connection", n),
                        }
                    }
                    _ = close.recv() => break,
                }
            }
            drop(guard);
        });
    }

    /// Connect to a single address and do the handshake, verifying the remote's identity
    async fn connect(&self, expected_peer: PeerId, addr: SocketAddr, protocol: &str) -> Result<TcpStream, DialError> {
        let socket = new_socket(&addr, self.config.reuse_port)
            .map_err(|e| DialError::from_io(&e))?;
        if self.config.reuse_port && addr.is_ipv4() == self.listen_addr.is_ipv4() {
            socket.bind(self.listen_addr)
                .map_err(|e| DialError::from_io(&e))?;
        }

        let mut stream = socket.connect(addr).await
            .map_err(|e| DialError::from_io(&e))?;
        let _ = stream.set_nodelay(true);

        let hello = timeout(self.config.handshake_timeout, exchange_hello(&mut stream, &self.own_hello(protocol), self.config.max_frame_size)).await
            .map_err(|_| DialError::Timeout)?
            .map_err(|e| DialError::Io(e.to_string()))?;

        if hello.peer.id != expected_peer {
            return Err(DialError::PeerIdMismatch { expected: expected_peer, actual: hello.peer.id });
        }
        self.address_book.add_addresses(expected_peer, &hello.peer.addrs).await;
        Ok(stream)
    }

    /// Try addresses in order, returning the first connection that succeeds
    async fn connect_any(&self, peer: PeerId, addrs: &[Multiaddr], protocol: &str) -> Result<TcpStream, DialError> {
        let mut last_error = DialError::NoAddresses;
        for socket_addr in addrs.iter().filter_map(multiaddr_to_socket) {
            match self.connect(peer, socket_addr, protocol).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%peer, %socket_addr, "connect failed: {}", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl Host for TcpHost {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn add_addresses(&self, peer: PeerId, addrs: &[Multiaddr]) {
        self.address_book.add_addresses(peer, addrs).await;
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> anyhow::Result<ControlStream> {
        if protocol.is_empty() {
            bail!("streams require a protocol");
        }
        let addrs = self.address_book.get(&peer).await;
        if addrs.is_empty() {
            bail!("no known addresses for {}", peer);
        }

        let stream = self.connect_any(peer, &addrs, protocol).await?;
        debug!(%peer, protocol, "opened stream");
        Ok(Box::new(TrackedStream::new(stream, self.connections.track(peer))))
    }

    async fn dial(&self, remote: &PeerAddressInfo, dial_timeout: Duration) -> Result<(), DialError> {
        let peer = remote.id;
        if self.connections.is_connected(&peer) {
            debug!(%peer, "already connected");
            return Ok(());
        }
        if self.backoff.is_backed_off(&peer).await {
            return Err(DialError::Backoff);
        }

        let result = match timeout(dial_timeout, self.connect_any(peer, &remote.addrs, "")).await {
            Ok(result) => result,
            Err(_) => Err(DialError::Timeout),
        };

        match result {
            Ok(stream) => {
                self.backoff.clear(&peer).await;
                self.address_book.add_addresses(peer, &remote.addrs).await;
                self.spawn_hold_open(stream, self.connections.track(peer));
                info!(%peer, "connected");
                Ok(())
            }
            // the peer's own dial may have come through in the meantime
            Err(_) if self.connections.is_connected(&peer) => Ok(()),
            Err(e) => {
                self.backoff.record_failure(peer).await;
                Err(e)
            }
        }
    }

    async fn clear_backoff(&self, peer: &PeerId) {
        self.backoff.clear(peer).await;
    }

    async fn set_stream_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        if self.handlers.write().await
            .insert(protocol.to_string(), handler)
            .is_some()
        {
            warn!("replacing stream handler for protocol {}", protocol);
        }
    }
}

fn new_socket(addr: &SocketAddr, reuse_port: bool) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    }
    else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;

    #[cfg(unix)]
    {
        if reuse_port {
            socket.set_reuseport(true)?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = reuse_port;
    }

    Ok(socket)
}

async fn accept_loop(listener: TcpListener, host: Weak<TcpHost>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                let Some(host) = host.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(e) = host.handle_inbound(stream, remote_addr).await {
                        debug!(%remote_addr, "inbound connection failed: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("error accepting connection: {}", e);
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
