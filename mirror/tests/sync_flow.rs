//! End-to-end indexing flows driven through the sync service handlers.

mod common;

use ckb_mirror::database::{BlockQueries, ScriptQueries, TransactionQueries};
use ckb_mirror::models::TxStatus;
use ckb_mirror::websocket::{Channel, EventKind};
use common::{block, cellbase, drain, harness, hash, pool_entry, short_id, transaction};
use serde_json::Value;
use tokio_test::assert_ok;

#[tokio::test]
async fn tip_block_with_cellbase_and_two_spends() {
    let mut h = harness().await;

    // a pending transaction that the block proposes
    assert_ok!(
        h.service
            .handle_new_transaction(pool_entry(transaction(0x20, 1, 1), 1_000, 300, 4_000))
            .await
    );
    assert_eq!(drain(&mut h.events).len(), 1);

    let tip = block(
        12,
        0xb1,
        vec![cellbase(0x10), transaction(0x11, 1, 2), transaction(0x12, 2, 1)],
        vec![short_id(0x20)],
    );
    let commit = assert_ok!(h.service.handle_new_tip_block(Value::String(tip.to_string())).await);
    assert_eq!(commit.proposals_marked, 1);

    let events = drain(&mut h.events);
    let kinds: Vec<EventKind> = events.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        [
            EventKind::TransactionProposed,
            EventKind::TransactionConfirmed,
            EventKind::TransactionConfirmed,
            EventKind::TransactionConfirmed,
            EventKind::BlockFinalized,
        ]
    );
    for (position, event) in events[1..4].iter().enumerate() {
        assert_eq!(event.payload["context"]["txIndexInBlock"], position);
        assert_eq!(event.payload["txHash"], hash(0x10 + position as u8));
    }
    assert_eq!(events[4].channel, Channel::Chain);
    assert_eq!(events[4].payload["transactions"].as_array().unwrap().len(), 3);

    let pool = h.db.pool();
    assert_eq!(BlockQueries::count(pool).await.unwrap(), 1);
    assert_eq!(
        TransactionQueries::count_by_status(pool, TxStatus::Committed).await.unwrap(),
        3
    );
    assert_eq!(
        TransactionQueries::count_by_status(pool, TxStatus::Proposed).await.unwrap(),
        1
    );

    let base = TransactionQueries::relation_counts(pool, &hash(0x10)).await.unwrap();
    assert_eq!((base.inputs, base.outputs), (0, 1));
    let spend = TransactionQueries::relation_counts(pool, &hash(0x12)).await.unwrap();
    assert_eq!((spend.inputs, spend.outputs, spend.cell_deps), (2, 1, 1));

    // one lock per transaction, shared by its outputs
    assert_eq!(ScriptQueries::count(pool).await.unwrap(), 4);

    let stored = BlockQueries::get_by_hash(pool, &hash(0xb1)).await.unwrap().unwrap();
    assert_eq!(stored.number, 12);
    assert_eq!(stored.transaction_count, 3);
    assert_eq!(stored.reward, 10_000_000_000);
}

#[tokio::test]
async fn repeated_tip_keeps_one_block_row() {
    let mut h = harness().await;
    let tip = block(5, 0xa5, vec![cellbase(0x30), transaction(0x31, 1, 1)], vec![]);

    let first = h.service.handle_new_tip_block(tip.clone()).await.unwrap();
    let second = h.service.handle_new_tip_block(tip).await.unwrap();
    assert_eq!(first.block.id, second.block.id);
    assert_eq!(first.block.created_at, second.block.created_at);

    let pool = h.db.pool();
    assert_eq!(BlockQueries::count(pool).await.unwrap(), 1);
    assert_eq!(TransactionQueries::count(pool).await.unwrap(), 2);
    let counts = TransactionQueries::relation_counts(pool, &hash(0x31)).await.unwrap();
    assert_eq!(counts.total(), 3);

    let finalized = drain(&mut h.events)
        .into_iter()
        .filter(|m| m.kind == EventKind::BlockFinalized)
        .count();
    assert_eq!(finalized, 2);
}

#[tokio::test]
async fn commit_carries_mempool_figures() {
    let mut h = harness().await;
    h.service
        .handle_new_transaction(pool_entry(transaction(0x41, 1, 1), 2_500, 512, 77_000))
        .await
        .unwrap();

    let pending = TransactionQueries::get_by_hash(h.db.pool(), &hash(0x41))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, TxStatus::Pending);
    assert_eq!(pending.block_id, None);

    let tip = block(7, 0xa7, vec![cellbase(0x40), transaction(0x41, 1, 1)], vec![]);
    let commit = h.service.handle_new_tip_block(tip).await.unwrap();

    let committed = TransactionQueries::get_by_hash(h.db.pool(), &hash(0x41))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(committed.status, TxStatus::Committed);
    assert_eq!(committed.block_id, Some(commit.block.id));
    assert_eq!((committed.fee, committed.size, committed.cycles), (2_500, 512, 77_000));

    let unseen = TransactionQueries::get_by_hash(h.db.pool(), &hash(0x40))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((unseen.fee, unseen.size, unseen.cycles), (0, 0, 0));
    drain(&mut h.events);
}

#[tokio::test]
async fn reindexed_pending_body_replaces_relations() {
    let h = harness().await;
    h.service
        .handle_new_transaction(pool_entry(transaction(0x51, 3, 3), 10, 10, 10))
        .await
        .unwrap();
    h.service
        .handle_new_transaction(pool_entry(transaction(0x51, 1, 2), 20, 20, 20))
        .await
        .unwrap();

    let pool = h.db.pool();
    let counts = TransactionQueries::relation_counts(pool, &hash(0x51)).await.unwrap();
    assert_eq!((counts.inputs, counts.outputs), (1, 2));

    let outputs = TransactionQueries::outputs(pool, &hash(0x51)).await.unwrap();
    let data: Vec<&str> = outputs.iter().map(|o| o.data.as_str()).collect();
    assert_eq!(data, ["0x00", "0x01"]);

    let row = TransactionQueries::get_by_hash(pool, &hash(0x51)).await.unwrap().unwrap();
    assert_eq!(row.fee, 20);
}

#[tokio::test]
async fn rejected_transaction_disappears() {
    let mut h = harness().await;
    let tx = transaction(0x61, 2, 2);
    h.service
        .handle_new_transaction(pool_entry(tx.clone(), 1, 1, 1))
        .await
        .unwrap();

    let rejected = serde_json::json!([pool_entry(tx, 1, 1, 1), "Resolve failed"]);
    h.service
        .handle_rejected_transaction(Value::String(rejected.to_string()))
        .await
        .unwrap();

    let pool = h.db.pool();
    assert!(TransactionQueries::get_by_hash(pool, &hash(0x61)).await.unwrap().is_none());
    assert_eq!(
        TransactionQueries::relation_counts(pool, &hash(0x61)).await.unwrap().total(),
        0
    );

    let kinds: Vec<EventKind> = drain(&mut h.events).iter().map(|m| m.kind).collect();
    assert_eq!(kinds, [EventKind::TransactionPending, EventKind::TransactionRejected]);
}

#[tokio::test]
async fn proposal_for_unknown_hash_changes_nothing() {
    let mut h = harness().await;
    h.service
        .handle_new_transaction(pool_entry(transaction(0x81, 1, 1), 3, 3, 3))
        .await
        .unwrap();
    drain(&mut h.events);

    let stranger = pool_entry(transaction(0x82, 1, 1), 1, 1, 1);
    assert_ok!(h.service.handle_proposed_transaction(stranger).await);

    let pool = h.db.pool();
    assert!(TransactionQueries::get_by_hash(pool, &hash(0x82)).await.unwrap().is_none());
    assert_eq!(TransactionQueries::count(pool).await.unwrap(), 1);
    let known = TransactionQueries::get_by_hash(pool, &hash(0x81)).await.unwrap().unwrap();
    assert_eq!(known.status, TxStatus::Pending);
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn rejection_of_unknown_hash_still_notifies() {
    let mut h = harness().await;
    h.service
        .handle_new_transaction(pool_entry(transaction(0x91, 1, 2), 3, 3, 3))
        .await
        .unwrap();
    drain(&mut h.events);

    let stranger = pool_entry(transaction(0x92, 1, 1), 1, 1, 1);
    assert_ok!(h.service.handle_rejected_transaction(stranger).await);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::TransactionRejected);
    assert_eq!(events[0].payload["txHash"], hash(0x92));

    let pool = h.db.pool();
    assert_eq!(TransactionQueries::count(pool).await.unwrap(), 1);
    let counts = TransactionQueries::relation_counts(pool, &hash(0x91)).await.unwrap();
    assert_eq!((counts.inputs, counts.outputs), (1, 2));
}
