use libp2p::identity::{ed25519, Keypair};
use libp2p::PeerId;

/// Deterministic ed25519 identity for tests: the same number always yields the same key pair,
///  and different numbers yield different ones.
pub fn test_keypair_from_number(number: u8) -> Keypair {
    let secret = ed25519::SecretKey::try_from_bytes([number; 32])
        .expect("any 32 bytes are a valid ed25519 secret key");
    Keypair::from(ed25519::Keypair::from(secret))
}

/// convenience method for unit test code: create a [PeerId] based on a number, the same number
///  generating the same id and different numbers different ids
pub fn test_peer_id_from_number(number: u8) -> PeerId {
    test_keypair_from_number(number).public().to_peer_id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ids_are_deterministic() {
        assert_eq!(test_peer_id_from_number(1), test_peer_id_from_number(1));
        assert_ne!(test_peer_id_from_number(1), test_peer_id_from_number(2));
    }
}
