//! Block commit: header upsert plus the per-transaction state changes of a new tip.

use chrono::Utc;
use rpc_core::Block;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{MirrorError, Result};
use crate::indexer::transaction_indexer::TransactionIndexer;
use crate::models::{db_int, BlockRow};

/// A transaction committed as part of a block, with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    pub hash: String,
    pub index: usize,
}

/// What a successful block unit wrote, in the order it wrote it.
#[derive(Debug, Clone)]
pub struct BlockCommit {
    pub block: BlockRow,
    pub proposals: Vec<String>,
    pub proposals_marked: u64,
    pub transactions: Vec<CommittedTransaction>,
}

#[derive(Clone)]
pub struct BlockCommitter {
    pool: SqlitePool,
    transactions: TransactionIndexer,
}

impl BlockCommitter {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            transactions: TransactionIndexer::new(pool.clone()),
            pool,
        }
    }

    /// Inserts the block once per hash; later calls return the stored row untouched.
    pub async fn upsert_block(
        &self,
        block: &Block,
        conn: Option<&mut SqliteConnection>,
    ) -> Result<BlockRow> {
        match conn {
            Some(conn) => Self::upsert_in(conn, block).await,
            None => {
                let mut tx = self.pool.begin().await?;
                let row = Self::upsert_in(&mut *tx, block).await?;
                tx.commit().await?;
                Ok(row)
            }
        }
    }

    /// Applies a new tip block as one atomic unit.
    ///
    /// Proposals are marked before transactions are committed, and
    /// transactions are committed in block order with index 0 as cellbase.
    /// Nothing is persisted unless every step succeeds.
    pub async fn commit_block(&self, block: &Block) -> Result<BlockCommit> {
        let mut tx = self.pool.begin().await?;

        let row = Self::upsert_in(&mut *tx, block).await?;

        let proposals: Vec<String> = block.proposals.iter().map(|id| id.to_hex()).collect();
        let proposals_marked = self
            .transactions
            .mark_proposed(&proposals, Some(&mut *tx))
            .await?;

        let mut committed = Vec::with_capacity(block.transactions.len());
        for (index, transaction) in block.transactions.iter().enumerate() {
            self.transactions
                .process_committed(transaction, row.id, index == 0, Some(&mut *tx))
                .await?;
            committed.push(CommittedTransaction {
                hash: transaction.hash.to_hex(),
                index,
            });
        }

        tx.commit().await?;

        info!(
            number = row.number,
            hash = %row.hash,
            transactions = committed.len(),
            proposals = proposals.len(),
            proposals_marked,
            "committed block"
        );

        Ok(BlockCommit {
            block: row,
            proposals,
            proposals_marked,
            transactions: committed,
        })
    }

    async fn upsert_in(conn: &mut SqliteConnection, block: &Block) -> Result<BlockRow> {
        let header = &block.header;
        let hash = header.hash.to_hex();

        let reward_output = block
            .cellbase()
            .and_then(|cellbase| cellbase.outputs.first())
            .ok_or_else(|| MirrorError::InvalidInput(format!("block {hash} has no cellbase output")))?;
        let miner = reward_output.lock.calc_script_hash().to_hex();

        let proposals = serde_json::to_string(&block.proposals)?;
        let uncles = serde_json::to_string(&block.uncles)?;

        sqlx::query(
            r#"
            INSERT INTO blocks (
                hash, number, timestamp, miner, reward,
                transaction_count, proposals_count, uncles_count, size,
                proposals, uncles, version, parent_hash,
                compact_target, nonce, epoch, dao, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (hash) DO NOTHING
            "#,
        )
        .bind(&hash)
        .bind(db_int(header.number.value(), "block number")?)
        .bind(db_int(header.timestamp.value(), "timestamp")?)
        .bind(&miner)
        .bind(db_int(reward_output.capacity.value(), "reward")?)
        .bind(db_int(block.transactions.len() as u64, "transaction count")?)
        .bind(db_int(block.proposals.len() as u64, "proposals count")?)
        .bind(db_int(block.uncles.len() as u64, "uncles count")?)
        .bind(&proposals)
        .bind(&uncles)
        .bind(i64::from(header.version.value()))
        .bind(header.parent_hash.to_hex())
        .bind(i64::from(header.compact_target.value()))
        .bind(header.nonce.to_string())
        .bind(db_int(header.epoch.value(), "epoch")?)
        .bind(header.dao.to_hex())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query_as::<_, BlockRow>("SELECT * FROM blocks WHERE hash = ?")
            .bind(&hash)
            .fetch_one(&mut *conn)
            .await?;
        debug!(hash = %row.hash, id = row.id, "upserted block");
        Ok(row)
    }
}
