//! Node payload builders shared by the unit tests.

use rpc_core::{Block, PoolTransactionEntry, Script, Transaction};
use serde_json::{json, Value};

pub const SECP_CODE_HASH: &str =
    "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8";

pub fn hash(byte: u8) -> String {
    format!("0x{}", format!("{byte:02x}").repeat(32))
}

pub fn lock_json(arg: u8) -> Value {
    json!({
        "code_hash": SECP_CODE_HASH,
        "hash_type": "type",
        "args": format!("0x{}", format!("{arg:02x}").repeat(20)),
    })
}

pub fn lock_script(arg: u8) -> Script {
    serde_json::from_value(lock_json(arg)).unwrap()
}

/// A transaction with `inputs` spends, `outputs` outputs and one dep of each kind.
pub fn tx_json(id: u8, inputs: usize, outputs: usize) -> Value {
    let inputs: Vec<Value> = (0..inputs)
        .map(|i| {
            json!({
                "since": "0x0",
                "previous_output": {"tx_hash": hash(id.wrapping_add(100)), "index": format!("{i:#x}")},
            })
        })
        .collect();
    let outputs_json: Vec<Value> = (0..outputs)
        .map(|i| {
            json!({
                "capacity": format!("{:#x}", 6_100_000_000u64 + i as u64),
                "lock": lock_json(id),
                "type": null,
            })
        })
        .collect();
    let outputs_data: Vec<Value> = (0..outputs).map(|_| json!("0x")).collect();

    json!({
        "hash": hash(id),
        "version": "0x0",
        "cell_deps": [{
            "out_point": {"tx_hash": hash(0xde), "index": "0x0"},
            "dep_type": "dep_group",
        }],
        "header_deps": [hash(0xee)],
        "inputs": inputs,
        "outputs": outputs_json,
        "outputs_data": outputs_data,
        "witnesses": ["0x5500"],
    })
}

pub fn tx(id: u8, inputs: usize, outputs: usize) -> Transaction {
    serde_json::from_value(tx_json(id, inputs, outputs)).unwrap()
}

pub fn pool_entry_json(tx: Value, fee: u64, size: u64, cycles: u64) -> Value {
    json!({
        "transaction": tx,
        "fee": format!("{fee:#x}"),
        "size": format!("{size:#x}"),
        "cycles": format!("{cycles:#x}"),
        "timestamp": "0x18c8d0a7a30",
    })
}

pub fn pool_entry(tx: Value, fee: u64, size: u64, cycles: u64) -> PoolTransactionEntry {
    serde_json::from_value(pool_entry_json(tx, fee, size, cycles)).unwrap()
}

pub fn block_json(number: u64, id: u8, transactions: Vec<Value>, proposals: Vec<String>) -> Value {
    json!({
        "header": {
            "hash": hash(id),
            "number": format!("{number:#x}"),
            "timestamp": "0x18c8d0a7a30",
            "version": "0x0",
            "compact_target": "0x1d08a1a2",
            "epoch": "0x70806cb000001",
            "parent_hash": hash(id.wrapping_sub(1)),
            "nonce": "0x4e2bd1f1f12ad1e87b8f1ae0d6f9c4ab",
            "dao": format!("0x{}", "ab".repeat(32)),
        },
        "transactions": transactions,
        "proposals": proposals,
        "uncles": [],
    })
}

pub fn block(number: u64, id: u8, transactions: Vec<Value>, proposals: Vec<String>) -> Block {
    serde_json::from_value(block_json(number, id, transactions, proposals)).unwrap()
}
