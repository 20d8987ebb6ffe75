//! Realtime event fan-out

pub mod events;
pub mod server;
pub mod subscriptions;

pub use events::{Channel, EventKind, EventService, ServerMessage};
pub use subscriptions::{run_dispatcher, Ack, ClientRegistry};
