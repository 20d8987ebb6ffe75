//! Node API trait definitions

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::model::RpcError;

/// Topics the node pushes notifications on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewTipBlock,
    NewTransaction,
    ProposedTransaction,
    RejectedTransaction,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::NewTipBlock,
        Topic::NewTransaction,
        Topic::ProposedTransaction,
        Topic::RejectedTransaction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::NewTipBlock => "new_tip_block",
            Topic::NewTransaction => "new_transaction",
            Topic::ProposedTransaction => "proposed_transaction",
            Topic::RejectedTransaction => "rejected_transaction",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription id handed out by the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whatever owns the subscription table on the transport side.
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), RpcError>;
}

/// A live node subscription.
///
/// Notifications are delivered in arrival order through a dedicated channel.
/// `next` returns `None` once the transport drops the subscription, which
/// happens when the socket closes.
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    notifications: mpsc::UnboundedReceiver<Value>,
    control: Arc<dyn SubscriptionControl>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        topic: impl Into<String>,
        notifications: mpsc::UnboundedReceiver<Value>,
        control: Arc<dyn SubscriptionControl>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            notifications,
            control,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn next(&mut self) -> Option<Value> {
        self.notifications.recv().await
    }

    pub async fn unsubscribe(self) -> Result<(), RpcError> {
        self.control.unsubscribe(&self.id).await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// The call/subscribe contract the mirror consumes from a node.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, RpcError>;

    async fn get_tip_block_number(&self) -> Result<u64, RpcError> {
        let value = self.call("get_tip_block_number", vec![]).await?;
        let number: crate::Uint64 = serde_json::from_value(value)
            .map_err(|e| RpcError::Deserialization(e.to_string()))?;
        Ok(number.value())
    }
}
