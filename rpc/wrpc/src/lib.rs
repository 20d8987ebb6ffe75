//! WebSocket connection manager for the upstream node.

pub mod connection;
pub mod protocol;

pub use connection::{ConnectionConfig, LinkState, NodeConnection};
