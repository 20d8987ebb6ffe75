//! Domain events and their wire envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{BlockRow, TransactionRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Chain,
    Transactions,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Chain => "chain",
            Channel::Transactions => "transactions",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "chain" => Some(Channel::Chain),
            "transactions" => Some(Channel::Transactions),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "block.finalized")]
    BlockFinalized,
    #[serde(rename = "transaction.pending")]
    TransactionPending,
    #[serde(rename = "transaction.proposed")]
    TransactionProposed,
    #[serde(rename = "transaction.confirmed")]
    TransactionConfirmed,
    #[serde(rename = "transaction.rejected")]
    TransactionRejected,
}

impl EventKind {
    pub fn channel(self) -> Channel {
        match self {
            EventKind::BlockFinalized => Channel::Chain,
            EventKind::TransactionPending
            | EventKind::TransactionProposed
            | EventKind::TransactionConfirmed
            | EventKind::TransactionRejected => Channel::Transactions,
        }
    }
}

/// Envelope pushed verbatim to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub channel: Channel,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TxRef<'a> {
    tx_hash: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockFinalized<'a> {
    block_number: String,
    block_hash: &'a str,
    timestamp: DateTime<Utc>,
    miner: &'a str,
    reward: String,
    transaction_count: i64,
    proposals_count: i64,
    uncles_count: i64,
    transactions: Vec<TxRef<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionPending<'a> {
    tx_hash: &'a str,
    timestamp: DateTime<Utc>,
    fee: String,
    size: String,
    cycles: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockContext<'a> {
    block_number: String,
    block_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_index_in_block: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionInBlock<'a> {
    tx_hash: &'a str,
    timestamp: DateTime<Utc>,
    context: BlockContext<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRejected<'a> {
    tx_hash: &'a str,
    timestamp: DateTime<Utc>,
    reason: &'a str,
}

/// Turns domain events into envelopes and hands them to the dispatcher.
#[derive(Clone)]
pub struct EventService {
    sink: mpsc::UnboundedSender<ServerMessage>,
}

impl EventService {
    pub fn new(sink: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { sink }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sink, events) = mpsc::unbounded_channel();
        (Self::new(sink), events)
    }

    pub fn block_finalized(&self, block: &BlockRow, tx_hashes: &[String]) {
        self.publish(
            EventKind::BlockFinalized,
            BlockFinalized {
                block_number: block.number.to_string(),
                block_hash: &block.hash,
                timestamp: Utc::now(),
                miner: &block.miner,
                reward: block.reward.to_string(),
                transaction_count: block.transaction_count,
                proposals_count: block.proposals_count,
                uncles_count: block.uncles_count,
                transactions: tx_hashes.iter().map(|hash| TxRef { tx_hash: hash }).collect(),
            },
        );
    }

    pub fn transaction_pending(&self, tx: &TransactionRow) {
        self.publish(
            EventKind::TransactionPending,
            TransactionPending {
                tx_hash: &tx.hash,
                timestamp: Utc::now(),
                fee: tx.fee.to_string(),
                size: tx.size.to_string(),
                cycles: tx.cycles.to_string(),
            },
        );
    }

    pub fn transaction_proposed(&self, id: &str, block: &BlockRow) {
        self.publish(
            EventKind::TransactionProposed,
            TransactionInBlock {
                tx_hash: id,
                timestamp: Utc::now(),
                context: BlockContext {
                    block_number: block.number.to_string(),
                    block_hash: &block.hash,
                    tx_index_in_block: None,
                },
            },
        );
    }

    pub fn transaction_confirmed(&self, hash: &str, block: &BlockRow, index: usize) {
        self.publish(
            EventKind::TransactionConfirmed,
            TransactionInBlock {
                tx_hash: hash,
                timestamp: Utc::now(),
                context: BlockContext {
                    block_number: block.number.to_string(),
                    block_hash: &block.hash,
                    tx_index_in_block: Some(index),
                },
            },
        );
    }

    pub fn transaction_rejected(&self, hash: &str, reason: &str) {
        self.publish(
            EventKind::TransactionRejected,
            TransactionRejected {
                tx_hash: hash,
                timestamp: Utc::now(),
                reason,
            },
        );
    }

    fn publish(&self, kind: EventKind, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(?kind, error = %e, "failed to encode event payload");
                return;
            }
        };
        let message = ServerMessage {
            channel: kind.channel(),
            kind,
            payload,
        };
        if self.sink.send(message).is_err() {
            debug!(?kind, "event dispatcher stopped, dropping event");
        }
    }
}
