//! Sync service: node subscriptions in, store writes and events out.

use rpc_core::{Block, Hash, NodeApi, PoolTransactionEntry, Topic};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::indexer::block_indexer::{BlockCommit, BlockCommitter};
use crate::indexer::transaction_indexer::TransactionIndexer;
use crate::websocket::events::EventService;

pub const REJECTION_REASON: &str = "rejected by mempool";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

impl TopicState {
    pub fn as_str(self) -> &'static str {
        match self {
            TopicState::Unsubscribed => "unsubscribed",
            TopicState::Subscribing => "subscribing",
            TopicState::Subscribed => "subscribed",
        }
    }
}

impl fmt::Display for TopicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool payload reduced to the transaction hash.
#[derive(Debug, Deserialize)]
struct EntryRef {
    transaction: HashOnly,
}

#[derive(Debug, Deserialize)]
struct HashOnly {
    hash: Hash,
}

pub struct SyncService {
    node: Arc<dyn NodeApi>,
    transactions: TransactionIndexer,
    committer: BlockCommitter,
    events: EventService,
    topics: RwLock<HashMap<Topic, TopicState>>,
    stop: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    handlers: Mutex<JoinSet<()>>,
}

impl SyncService {
    pub fn new(node: Arc<dyn NodeApi>, pool: SqlitePool, events: EventService) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            node,
            transactions: TransactionIndexer::new(pool.clone()),
            committer: BlockCommitter::new(pool),
            events,
            topics: RwLock::new(
                Topic::ALL
                    .iter()
                    .map(|topic| (*topic, TopicState::Unsubscribed))
                    .collect(),
            ),
            stop,
            workers: Mutex::new(Vec::new()),
            handlers: Mutex::new(JoinSet::new()),
        })
    }

    /// Spawns one subscription worker per topic.
    pub async fn start(self: &Arc<Self>) {
        info!("Starting sync service");
        match self.node.get_tip_block_number().await {
            Ok(tip) => info!(tip, "node tip block"),
            Err(e) => warn!(error = %e, "could not read node tip"),
        }

        let mut workers = self.workers.lock().await;
        for topic in Topic::ALL {
            let service = Arc::clone(self);
            workers.push(tokio::spawn(async move { service.run_topic(topic).await }));
        }
    }

    pub async fn topic_state(&self, topic: Topic) -> TopicState {
        self.topics
            .read()
            .await
            .get(&topic)
            .copied()
            .unwrap_or(TopicState::Unsubscribed)
    }

    pub async fn topic_states(&self) -> Vec<(Topic, TopicState)> {
        let topics = self.topics.read().await;
        Topic::ALL
            .iter()
            .map(|topic| (*topic, topics.get(topic).copied().unwrap_or(TopicState::Unsubscribed)))
            .collect()
    }

    /// Unsubscribes every live topic, then waits for the workers and for
    /// every notification already being handled.
    pub async fn shutdown(&self) {
        info!("Stopping sync service");
        self.stop.send_replace(true);
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "sync worker ended abnormally");
            }
        }

        let mut handlers = std::mem::take(&mut *self.handlers.lock().await);
        let in_flight = handlers.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for notification handlers");
        }
        while let Some(outcome) = handlers.join_next().await {
            if let Err(e) = outcome {
                warn!(error = %e, "notification handler ended abnormally");
            }
        }
    }

    async fn spawn_handler(self: &Arc<Self>, topic: Topic, payload: Value) {
        let mut handlers = self.handlers.lock().await;
        while let Some(outcome) = handlers.try_join_next() {
            if let Err(e) = outcome {
                warn!(error = %e, "notification handler ended abnormally");
            }
        }
        let service = Arc::clone(self);
        handlers.spawn(async move { service.handle_notification(topic, payload).await });
    }

    async fn set_state(&self, topic: Topic, state: TopicState) {
        self.topics.write().await.insert(topic, state);
        debug!(%topic, %state, "topic state changed");
    }

    async fn run_topic(self: Arc<Self>, topic: Topic) {
        let mut stop = self.stop.subscribe();
        loop {
            if *stop.borrow_and_update() {
                return;
            }

            self.set_state(topic, TopicState::Subscribing).await;
            let subscribed = tokio::select! {
                _ = stop.changed() => None,
                result = self.node.subscribe(topic.as_str()) => Some(result),
            };
            let mut subscription = match subscribed {
                None => {
                    self.set_state(topic, TopicState::Unsubscribed).await;
                    return;
                }
                Some(Err(e)) => {
                    error!(%topic, error = %e, "failed to subscribe");
                    self.set_state(topic, TopicState::Unsubscribed).await;
                    return;
                }
                Some(Ok(subscription)) => subscription,
            };
            self.set_state(topic, TopicState::Subscribed).await;
            info!(%topic, id = %subscription.id(), "listening for notifications");

            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        if let Err(e) = subscription.unsubscribe().await {
                            warn!(%topic, error = %e, "unsubscribe failed");
                        }
                        self.set_state(topic, TopicState::Unsubscribed).await;
                        return;
                    }
                    next = subscription.next() => match next {
                        Some(payload) => self.spawn_handler(topic, payload).await,
                        None => {
                            warn!(%topic, "subscription stream ended, resubscribing");
                            self.set_state(topic, TopicState::Unsubscribed).await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Routes one notification. Failures are logged and go no further.
    pub async fn handle_notification(&self, topic: Topic, payload: Value) {
        let outcome = match topic {
            Topic::NewTipBlock => self.handle_new_tip_block(payload).await.map(|_| ()),
            Topic::NewTransaction => self.handle_new_transaction(payload).await,
            Topic::ProposedTransaction => self.handle_proposed_transaction(payload).await,
            Topic::RejectedTransaction => self.handle_rejected_transaction(payload).await,
        };
        if let Err(e) = outcome {
            error!(%topic, kind = e.kind().as_str(), error = %e, "dropped notification");
        }
    }

    pub async fn handle_new_tip_block(&self, payload: Value) -> Result<BlockCommit> {
        let block: Block = decode(payload)?;
        debug!(
            number = block.header.number.value(),
            hash = %block.header.hash,
            "new tip block"
        );

        let commit = self.committer.commit_block(&block).await?;

        for id in &commit.proposals {
            self.events.transaction_proposed(id, &commit.block);
        }
        for tx in &commit.transactions {
            self.events.transaction_confirmed(&tx.hash, &commit.block, tx.index);
        }
        let hashes: Vec<String> = commit.transactions.iter().map(|tx| tx.hash.clone()).collect();
        self.events.block_finalized(&commit.block, &hashes);

        Ok(commit)
    }

    pub async fn handle_new_transaction(&self, payload: Value) -> Result<()> {
        let entry: PoolTransactionEntry = decode(payload)?;
        let row = self.transactions.process_pending(&entry, None).await?;
        debug!(tx_hash = %row.hash, "pending transaction");
        self.events.transaction_pending(&row);
        Ok(())
    }

    pub async fn handle_proposed_transaction(&self, payload: Value) -> Result<()> {
        let entry: EntryRef = decode(payload)?;
        let hash = entry.transaction.hash.to_hex();
        let changed = self.transactions.mark_proposed(&[hash.clone()], None).await?;
        debug!(tx_hash = %hash, changed, "proposed transaction");
        Ok(())
    }

    pub async fn handle_rejected_transaction(&self, payload: Value) -> Result<()> {
        let payload = match unwrap_string(payload)? {
            Value::Array(mut pair) if !pair.is_empty() => pair.swap_remove(0),
            other => other,
        };
        let entry: EntryRef = decode(payload)?;
        let hash = entry.transaction.hash.to_hex();

        self.events.transaction_rejected(&hash, REJECTION_REASON);
        let existed = self.transactions.delete_transaction(&hash, None).await?;
        debug!(tx_hash = %hash, existed, "rejected transaction");
        Ok(())
    }
}

/// The node sends notification results as JSON text; tests send objects.
fn unwrap_string(payload: Value) -> Result<Value> {
    match payload {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        other => Ok(other),
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T> {
    Ok(serde_json::from_value(unwrap_string(payload)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{BlockQueries, Database, TransactionQueries};
    use crate::indexer::fixtures;
    use crate::models::TxStatus;
    use crate::websocket::events::{EventKind, ServerMessage};
    use async_trait::async_trait;
    use rpc_core::{RpcError, Subscription, SubscriptionControl, SubscriptionId};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Node double: hands out channel-backed subscriptions and records calls.
    #[derive(Default)]
    struct FakeNode {
        feeds: std::sync::Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
        unsubscribed: Arc<std::sync::Mutex<Vec<SubscriptionId>>>,
        subscribe_calls: std::sync::Mutex<Vec<String>>,
        refuse: Option<String>,
    }

    struct Recorder(Arc<std::sync::Mutex<Vec<SubscriptionId>>>);

    #[async_trait]
    impl SubscriptionControl for Recorder {
        async fn unsubscribe(&self, id: &SubscriptionId) -> std::result::Result<(), RpcError> {
            self.0.lock().unwrap().push(id.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl NodeApi for FakeNode {
        async fn call(&self, method: &str, _params: Vec<Value>) -> std::result::Result<Value, RpcError> {
            match method {
                "get_tip_block_number" => Ok(json!("0x64")),
                other => Err(RpcError::Rpc {
                    code: -32601,
                    message: format!("no method {other}"),
                }),
            }
        }

        async fn subscribe(&self, topic: &str) -> std::result::Result<Subscription, RpcError> {
            self.subscribe_calls.lock().unwrap().push(topic.to_string());
            if self.refuse.as_deref() == Some(topic) {
                return Err(RpcError::Rpc {
                    code: -1,
                    message: "refused".into(),
                });
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().insert(topic.to_string(), tx);
            Ok(Subscription::new(
                SubscriptionId(format!("sub-{topic}")),
                topic,
                rx,
                Arc::new(Recorder(self.unsubscribed.clone())),
            ))
        }
    }

    impl FakeNode {
        fn push(&self, topic: Topic, payload: Value) {
            self.feeds.lock().unwrap()[topic.as_str()].send(payload).unwrap();
        }

        fn drop_feed(&self, topic: Topic) {
            self.feeds.lock().unwrap().remove(topic.as_str());
        }

        fn subscribe_count(&self, topic: Topic) -> usize {
            self.subscribe_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|t| *t == topic.as_str())
                .count()
        }
    }

    struct Harness {
        _dir: TempDir,
        db: Database,
        service: Arc<SyncService>,
        events: mpsc::UnboundedReceiver<ServerMessage>,
    }

    async fn harness(node: Arc<FakeNode>) -> Harness {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("sync.db"), 4).await.unwrap();
        db.migrate().await.unwrap();
        let (events, rx) = EventService::channel();
        let service = SyncService::new(node, db.pool().clone(), events);
        Harness {
            _dir: dir,
            db,
            service,
            events: rx,
        }
    }

    async fn wait_for_topic(service: &SyncService, topic: Topic, wanted: TopicState) {
        timeout(Duration::from_secs(5), async {
            while service.topic_state(topic).await != wanted {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{topic} never reached {wanted}"));
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(message) = rx.try_recv() {
            kinds.push(message.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn tip_block_emits_events_after_commit() {
        let mut h = harness(Arc::new(FakeNode::default())).await;
        let entry = fixtures::pool_entry_json(fixtures::tx_json(0x12, 1, 1), 77, 88, 99);
        h.service.handle_new_transaction(entry).await.unwrap();
        assert_eq!(drain(&mut h.events), [EventKind::TransactionPending]);

        let block = fixtures::block_json(
            3,
            0x30,
            vec![fixtures::tx_json(0x11, 1, 1), fixtures::tx_json(0x12, 1, 1)],
            vec![fixtures::hash(0x12)[..22].to_string()],
        );
        // the node sends results as JSON text
        let commit = h
            .service
            .handle_new_tip_block(Value::String(block.to_string()))
            .await
            .unwrap();
        assert_eq!(commit.transactions.len(), 2);

        let messages: Vec<ServerMessage> = std::iter::from_fn(|| h.events.try_recv().ok()).collect();
        let kinds: Vec<EventKind> = messages.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::TransactionProposed,
                EventKind::TransactionConfirmed,
                EventKind::TransactionConfirmed,
                EventKind::BlockFinalized,
            ]
        );
        assert_eq!(messages[2].payload["context"]["txIndexInBlock"], 1);
        assert_eq!(messages[3].payload["transactions"].as_array().unwrap().len(), 2);

        let row = TransactionQueries::get_by_hash(h.db.pool(), &fixtures::hash(0x12))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TxStatus::Committed);
        assert_eq!((row.fee, row.size, row.cycles), (77, 88, 99));
    }

    #[tokio::test]
    async fn failed_block_emits_nothing() {
        let mut h = harness(Arc::new(FakeNode::default())).await;
        let block = fixtures::block_json(4, 0x40, vec![fixtures::tx_json(0x41, 0, 0)], vec![]);

        h.service.handle_notification(Topic::NewTipBlock, block).await;
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(BlockQueries::count(h.db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let mut h = harness(Arc::new(FakeNode::default())).await;
        h.service
            .handle_notification(Topic::NewTransaction, json!("{not json"))
            .await;
        h.service
            .handle_notification(Topic::NewTransaction, json!({"transaction": 1}))
            .await;
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(TransactionQueries::count(h.db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_accepts_entry_or_pair() {
        let mut h = harness(Arc::new(FakeNode::default())).await;
        for id in [0x51u8, 0x52] {
            let entry = fixtures::pool_entry_json(fixtures::tx_json(id, 1, 1), 1, 1, 1);
            h.service.handle_new_transaction(entry).await.unwrap();
        }
        drain(&mut h.events);

        let first = fixtures::pool_entry_json(fixtures::tx_json(0x51, 1, 1), 1, 1, 1);
        h.service.handle_rejected_transaction(first).await.unwrap();
        let second = json!([
            fixtures::pool_entry_json(fixtures::tx_json(0x52, 1, 1), 1, 1, 1),
            {"type": "Full", "description": "pool is full"},
        ]);
        h.service
            .handle_rejected_transaction(Value::String(second.to_string()))
            .await
            .unwrap();

        let messages: Vec<ServerMessage> = std::iter::from_fn(|| h.events.try_recv().ok()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.kind == EventKind::TransactionRejected));
        assert_eq!(messages[1].payload["reason"], REJECTION_REASON);
        assert_eq!(TransactionQueries::count(h.db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn proposed_marks_pending_without_event() {
        let mut h = harness(Arc::new(FakeNode::default())).await;
        let entry = fixtures::pool_entry_json(fixtures::tx_json(0x61, 0, 1), 1, 1, 1);
        h.service.handle_new_transaction(entry.clone()).await.unwrap();
        drain(&mut h.events);

        h.service.handle_proposed_transaction(entry).await.unwrap();
        assert!(drain(&mut h.events).is_empty());
        let row = TransactionQueries::get_by_hash(h.db.pool(), &fixtures::hash(0x61))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TxStatus::Proposed);
    }

    #[tokio::test]
    async fn workers_route_notifications_and_resubscribe() {
        let node = Arc::new(FakeNode::default());
        let mut h = harness(node.clone()).await;
        h.service.start().await;
        for topic in Topic::ALL {
            wait_for_topic(&h.service, topic, TopicState::Subscribed).await;
        }

        node.push(
            Topic::NewTransaction,
            fixtures::pool_entry_json(fixtures::tx_json(0x71, 1, 1), 5, 5, 5),
        );
        let message = timeout(Duration::from_secs(5), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.kind, EventKind::TransactionPending);

        node.drop_feed(Topic::NewTipBlock);
        timeout(Duration::from_secs(5), async {
            while node.subscribe_count(Topic::NewTipBlock) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        wait_for_topic(&h.service, Topic::NewTipBlock, TopicState::Subscribed).await;

        h.service.shutdown().await;
        for (_, state) in h.service.topic_states().await {
            assert_eq!(state, TopicState::Unsubscribed);
        }
        assert_eq!(node.unsubscribed.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn shutdown_waits_for_block_in_flight() {
        let node = Arc::new(FakeNode::default());
        let mut h = harness(node.clone()).await;
        h.service.start().await;
        wait_for_topic(&h.service, Topic::NewTipBlock, TopicState::Subscribed).await;

        // hold the write lock so the block unit stalls inside its transaction
        let mut writer = h.db.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *writer).await.unwrap();

        node.push(
            Topic::NewTipBlock,
            fixtures::block_json(8, 0x80, vec![fixtures::tx_json(0x81, 1, 1)], vec![]),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        let service = h.service.clone();
        let stopping = tokio::spawn(async move { service.shutdown().await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!stopping.is_finished());
        assert!(drain(&mut h.events).is_empty());

        sqlx::query("COMMIT").execute(&mut *writer).await.unwrap();
        drop(writer);
        timeout(Duration::from_secs(10), stopping).await.unwrap().unwrap();

        assert_eq!(BlockQueries::count(h.db.pool()).await.unwrap(), 1);
        assert_eq!(
            drain(&mut h.events),
            [EventKind::TransactionConfirmed, EventKind::BlockFinalized]
        );
    }

    #[tokio::test]
    async fn subscribe_failure_is_not_retried() {
        let node = Arc::new(FakeNode {
            refuse: Some("rejected_transaction".into()),
            ..FakeNode::default()
        });
        let h = harness(node.clone()).await;
        h.service.start().await;

        wait_for_topic(&h.service, Topic::NewTipBlock, TopicState::Subscribed).await;
        wait_for_topic(&h.service, Topic::RejectedTransaction, TopicState::Unsubscribed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.subscribe_count(Topic::RejectedTransaction), 1);
        h.service.shutdown().await;
    }
}
