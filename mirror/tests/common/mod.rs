//! Shared setup for the mirror integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use ckb_mirror::database::Database;
use ckb_mirror::indexer::SyncService;
use ckb_mirror::websocket::{EventService, ServerMessage};
use rpc_core::{NodeApi, RpcError, Subscription};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const SECP_CODE_HASH: &str =
    "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8";

pub fn hash(byte: u8) -> String {
    format!("0x{}", format!("{byte:02x}").repeat(32))
}

pub fn short_id(byte: u8) -> String {
    hash(byte)[..22].to_string()
}

pub fn lock(arg: u8) -> Value {
    json!({
        "code_hash": SECP_CODE_HASH,
        "hash_type": "type",
        "args": format!("0x{}", format!("{arg:02x}").repeat(20)),
    })
}

pub fn transaction(id: u8, inputs: usize, outputs: usize) -> Value {
    let inputs: Vec<Value> = (0..inputs)
        .map(|i| {
            json!({
                "since": "0x0",
                "previous_output": {"tx_hash": hash(id.wrapping_add(50)), "index": format!("{i:#x}")},
            })
        })
        .collect();
    let outputs_data: Vec<Value> = (0..outputs).map(|i| json!(format!("0x{i:02x}"))).collect();
    let outputs: Vec<Value> = (0..outputs)
        .map(|i| {
            json!({
                "capacity": format!("{:#x}", 10_000_000_000u64 + i as u64),
                "lock": lock(id),
                "type": null,
            })
        })
        .collect();

    json!({
        "hash": hash(id),
        "version": "0x0",
        "cell_deps": [{
            "out_point": {"tx_hash": hash(0xd0), "index": "0x0"},
            "dep_type": "code",
        }],
        "header_deps": [],
        "inputs": inputs,
        "outputs": outputs,
        "outputs_data": outputs_data,
        "witnesses": [],
    })
}

/// Cellbase as the node reports it: one input with a null previous output.
pub fn cellbase(id: u8) -> Value {
    let mut tx = transaction(id, 0, 1);
    tx["inputs"] = json!([{
        "since": "0x1",
        "previous_output": {
            "tx_hash": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "index": "0xffffffff",
        },
    }]);
    tx
}

pub fn pool_entry(tx: Value, fee: u64, size: u64, cycles: u64) -> Value {
    json!({
        "transaction": tx,
        "fee": format!("{fee:#x}"),
        "size": format!("{size:#x}"),
        "cycles": format!("{cycles:#x}"),
        "timestamp": "0x18c8d0a7a30",
    })
}

pub fn block(number: u64, id: u8, transactions: Vec<Value>, proposals: Vec<String>) -> Value {
    json!({
        "header": {
            "hash": hash(id),
            "number": format!("{number:#x}"),
            "timestamp": "0x18c8d0a7a30",
            "version": "0x0",
            "compact_target": "0x1d08a1a2",
            "epoch": "0x70806cb000001",
            "parent_hash": hash(id.wrapping_sub(1)),
            "nonce": "0x0",
            "dao": format!("0x{}", "cd".repeat(32)),
        },
        "transactions": transactions,
        "proposals": proposals,
        "uncles": [],
    })
}

/// Node double for driving the service through its handlers only.
pub struct IdleNode;

#[async_trait]
impl NodeApi for IdleNode {
    async fn call(&self, method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        Err(RpcError::Rpc {
            code: -32601,
            message: format!("{method} unavailable"),
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, RpcError> {
        Err(RpcError::Rpc {
            code: -32601,
            message: format!("{topic} unavailable"),
        })
    }
}

pub struct Harness {
    pub _dir: TempDir,
    pub db: Arc<Database>,
    pub service: Arc<SyncService>,
    pub events: mpsc::UnboundedReceiver<ServerMessage>,
}

pub async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&dir.path().join("mirror.db"), 4).await.unwrap());
    db.migrate().await.unwrap();

    let (events, rx) = EventService::channel();
    let service = SyncService::new(Arc::new(IdleNode), db.pool().clone(), events);

    Harness {
        _dir: dir,
        db,
        service,
        events: rx,
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}
