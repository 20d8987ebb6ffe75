//! CKB chain mirror
//!
//! Follows a CKB node over its WebSocket RPC, keeps a relational copy of
//! blocks and transactions in SQLite, and republishes lifecycle events to
//! realtime clients.

pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod indexer;
pub mod models;
pub mod websocket;

pub use config::Config;
pub use error::{MirrorError, Result};

// Type alias for database pool
pub type DbPool = sqlx::SqlitePool;
