//! Row types for the mirrored chain data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MirrorError, Result};

/// Lifecycle of a mirrored transaction. Rejected transactions are deleted,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Pending,
    Proposed,
    Committed,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Proposed => "PROPOSED",
            TxStatus::Committed => "COMMITTED",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockRow {
    pub id: i64,
    pub hash: String,
    pub number: i64,
    pub timestamp: i64,
    pub miner: String,
    pub reward: i64,
    pub transaction_count: i64,
    pub proposals_count: i64,
    pub uncles_count: i64,
    pub size: i64,
    pub proposals: String,
    pub uncles: String,
    pub version: i64,
    pub parent_hash: String,
    pub compact_target: i64,
    pub nonce: String,
    pub epoch: i64,
    pub dao: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub hash: String,
    pub status: TxStatus,
    pub fee: i64,
    pub size: i64,
    pub cycles: i64,
    pub version: i64,
    pub witnesses: String,
    pub block_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScriptRow {
    pub id: i64,
    pub code_hash: String,
    pub hash_type: String,
    pub args: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutputRow {
    pub id: i64,
    pub tx_hash: String,
    pub output_index: i64,
    pub capacity: i64,
    pub lock_script_id: i64,
    pub type_script_id: Option<i64>,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InputRow {
    pub id: i64,
    pub tx_hash: String,
    pub input_index: i64,
    pub previous_tx_hash: String,
    pub previous_index: i64,
    pub since: String,
}

/// Number of relation rows attached to one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationCounts {
    pub cell_deps: i64,
    pub header_deps: i64,
    pub inputs: i64,
    pub outputs: i64,
}

impl RelationCounts {
    pub fn total(&self) -> i64 {
        self.cell_deps + self.header_deps + self.inputs + self.outputs
    }
}

/// SQLite integers are signed; quantities above `i64::MAX` are refused.
pub fn db_int(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| MirrorError::InvalidInput(format!("{field} {value} does not fit a 64-bit column")))
}
