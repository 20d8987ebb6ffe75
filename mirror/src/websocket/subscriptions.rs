//! Subscription management for WebSocket clients

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MirrorError, Result};
use crate::websocket::events::{Channel, ServerMessage};

pub type ClientId = Uuid;

pub const INVALID_MESSAGE: &str = "Invalid message format";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    action: String,
    channel: String,
}

/// Validated `{action, channel}` frame from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRequest {
    pub action: Action,
    pub channel: Channel,
}

impl ClientRequest {
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawRequest = serde_json::from_str(text)
            .map_err(|_| MirrorError::Validation(INVALID_MESSAGE.to_string()))?;
        let action = match raw.action.as_str() {
            "subscribe" => Action::Subscribe,
            "unsubscribe" => Action::Unsubscribe,
            _ => return Err(MirrorError::Validation(INVALID_MESSAGE.to_string())),
        };
        let channel = Channel::parse(&raw.channel)
            .ok_or_else(|| MirrorError::Validation(INVALID_MESSAGE.to_string()))?;
        Ok(Self { action, channel })
    }
}

/// Reply frame sent back to the requesting client only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Ack {
    Subscribed { channel: Channel },
    Unsubscribed { channel: Channel },
    Error { message: String },
}

struct ClientEntry {
    channels: HashSet<Channel>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Connected clients and the channels each one wants.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, ClientEntry>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client with no channels. Frames for it go to `outbound`.
    pub async fn connect(&self, outbound: mpsc::UnboundedSender<String>) -> ClientId {
        let id = Uuid::new_v4();
        self.clients.write().await.insert(
            id,
            ClientEntry {
                channels: HashSet::new(),
                outbound,
            },
        );
        info!(client = %id, "realtime client connected");
        id
    }

    pub async fn disconnect(&self, id: ClientId) {
        if self.clients.write().await.remove(&id).is_some() {
            info!(client = %id, "realtime client disconnected");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn channels(&self, id: ClientId) -> Option<HashSet<Channel>> {
        self.clients.read().await.get(&id).map(|entry| entry.channels.clone())
    }

    /// Parses and applies one client frame, returning the reply to send back.
    pub async fn handle_request(&self, id: ClientId, text: &str) -> Ack {
        match ClientRequest::parse(text) {
            Ok(request) => self.apply(id, request).await,
            Err(e) => {
                debug!(client = %id, error = %e, "rejected client frame");
                Ack::Error {
                    message: INVALID_MESSAGE.to_string(),
                }
            }
        }
    }

    pub async fn apply(&self, id: ClientId, request: ClientRequest) -> Ack {
        let mut clients = self.clients.write().await;
        let Some(entry) = clients.get_mut(&id) else {
            return Ack::Error {
                message: "Unknown client".to_string(),
            };
        };
        match request.action {
            Action::Subscribe => {
                entry.channels.insert(request.channel);
                debug!(client = %id, channel = %request.channel, "subscribed");
                Ack::Subscribed {
                    channel: request.channel,
                }
            }
            Action::Unsubscribe => {
                entry.channels.remove(&request.channel);
                debug!(client = %id, channel = %request.channel, "unsubscribed");
                Ack::Unsubscribed {
                    channel: request.channel,
                }
            }
        }
    }

    /// Queues `message` for every client subscribed to its channel.
    /// Returns how many clients it was queued for.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast");
                return 0;
            }
        };

        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|entry| entry.channels.contains(&message.channel))
            .filter(|entry| entry.outbound.send(frame.clone()).is_ok())
            .count()
    }
}

/// Delivers events in production order until the event sender is dropped.
pub async fn run_dispatcher(
    registry: ClientRegistry,
    mut events: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = events.recv().await {
        let delivered = registry.broadcast(&message).await;
        debug!(channel = %message.channel, kind = ?message.kind, delivered, "dispatched event");
    }
    info!("event dispatcher stopped");
}
