//! Node JSON-RPC data model

use mirror_hashes::{CkbHash, Hash, HasherBase};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quantity::{JsonBytes, Uint128, Uint32, Uint64};

/// RPC error type
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RpcError {
    /// The socket is not open, or closed while the call was in flight.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl RpcError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptHashType {
    Data,
    Type,
    Data1,
    Data2,
}

impl ScriptHashType {
    /// Byte used in the molecule encoding of a script.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Type => 1,
            Self::Data1 => 2,
            Self::Data2 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Type => "type",
            Self::Data1 => "data1",
            Self::Data2 => "data2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script {
    pub code_hash: Hash,
    pub hash_type: ScriptHashType,
    pub args: JsonBytes,
}

impl Script {
    /// Molecule `table Script { code_hash: Byte32, hash_type: byte, args: Bytes }`.
    pub fn to_molecule(&self) -> Vec<u8> {
        const HEADER: usize = 4 + 3 * 4;
        let args = self.args.as_bytes();
        let code_hash_offset = HEADER;
        let hash_type_offset = code_hash_offset + 32;
        let args_offset = hash_type_offset + 1;
        let total = args_offset + 4 + args.len();

        let mut out = Vec::with_capacity(total);
        for word in [total, code_hash_offset, hash_type_offset, args_offset] {
            out.extend_from_slice(&(word as u32).to_le_bytes());
        }
        out.extend_from_slice(self.code_hash.as_bytes());
        out.push(self.hash_type.as_byte());
        out.extend_from_slice(&(args.len() as u32).to_le_bytes());
        out.extend_from_slice(args);
        out
    }

    pub fn calc_script_hash(&self) -> Hash {
        let mut hasher = CkbHash::new();
        hasher.update(self.to_molecule());
        hasher.finalize()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: Uint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Code,
    DepGroup,
}

impl DepType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::DepGroup => "dep_group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInput {
    pub since: Uint64,
    pub previous_output: OutPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    pub capacity: Uint64,
    pub lock: Script,
    #[serde(rename = "type", default)]
    pub type_: Option<Script>,
}

/// A transaction together with its hash, as pushed by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub version: Uint32,
    #[serde(default)]
    pub cell_deps: Vec<CellDep>,
    #[serde(default)]
    pub header_deps: Vec<Hash>,
    #[serde(default)]
    pub inputs: Vec<CellInput>,
    #[serde(default)]
    pub outputs: Vec<CellOutput>,
    #[serde(default)]
    pub outputs_data: Vec<JsonBytes>,
    #[serde(default)]
    pub witnesses: Vec<JsonBytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub hash: Hash,
    pub number: Uint64,
    pub timestamp: Uint64,
    pub version: Uint32,
    pub compact_target: Uint32,
    pub epoch: Uint64,
    pub parent_hash: Hash,
    pub nonce: Uint128,
    pub dao: JsonBytes,
    #[serde(default)]
    pub transactions_root: Hash,
    #[serde(default)]
    pub proposals_hash: Hash,
    #[serde(default)]
    pub extra_hash: Hash,
}

/// First 10 bytes of a transaction hash announced ahead of commitment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalShortId(pub JsonBytes);

impl ProposalShortId {
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncleBlock {
    pub header: Header,
    #[serde(default)]
    pub proposals: Vec<ProposalShortId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub proposals: Vec<ProposalShortId>,
    #[serde(default)]
    pub uncles: Vec<UncleBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<JsonBytes>,
}

impl Block {
    /// The block-reward transaction, always first in a committed block.
    pub fn cellbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

/// A mempool entry as pushed on the pool topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTransactionEntry {
    pub transaction: Transaction,
    pub cycles: Uint64,
    pub size: Uint64,
    pub fee: Uint64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Uint64>,
}
