pub mod nat_traversal;
pub mod pending_connections;
pub mod punch_executor;
pub mod rendezvous;
pub mod traversal_config;
