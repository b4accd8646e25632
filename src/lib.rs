//! Rendezvous protocol for connecting two NAT'ed peers through a trusted service node.
//!
//! A client sends a `CONNECTION_REQUEST` for some target peer to a service node it has a control
//!  channel with. The service node looks up both parties' public addresses and sends each of them
//!  a `HOLE_PUNCH_REQUEST` with the *other* party's addresses, the target first and the initiator
//!  after a short stagger. Both sides then dial each other at roughly the same time, opening
//!  outbound NAT mappings that let the other side's connection attempt through.
//!
//! The coordination engine ([traversal]) is written against two collaborator traits: a
//!  [transport::Host] for dialing and streams, and a [discovery::Discovery] for address lookup.
//!  [transport::tcp::TcpHost] is a TCP implementation of the former whose address book doubles as
//!  an implementation of the latter.

pub mod discovery;
pub mod error;
pub mod messaging;
pub mod test_util;
pub mod transport;
pub mod traversal;
pub mod util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            // .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
