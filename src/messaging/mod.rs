pub mod channel_registry;
pub mod control_channel;
pub mod framing;
pub mod message_sender;
pub mod peer_address_info;
pub mod protocol_message;
pub mod router;

/// Protocol id under which control streams between peers and service nodes are negotiated
pub const PROTOCOL_ID: &str = "/ntraversal/1.0.0";

pub const MAX_FRAME_SIZE: usize = 1 << 20;
