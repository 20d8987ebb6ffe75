//! Transaction lifecycle indexing
//!
//! Every entry point takes an optional open store transaction. With `None`
//! the call runs in a private one that commits on success, so the same code
//! composes inside the block committer's unit.

use chrono::Utc;
use rpc_core::{PoolTransactionEntry, Transaction};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::Result;
use crate::indexer::script_registry::ScriptRegistry;
use crate::models::{db_int, TransactionRow, TxStatus};

/// Hex length of a proposal short id: `0x` plus 10 bytes.
pub const PROPOSAL_SHORT_ID_HEX_LEN: usize = 2 + 20;

#[derive(Clone)]
pub struct TransactionIndexer {
    pool: SqlitePool,
}

impl TransactionIndexer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records a mempool entry as `PENDING`, replacing any earlier body.
    pub async fn process_pending(
        &self,
        entry: &PoolTransactionEntry,
        conn: Option<&mut SqliteConnection>,
    ) -> Result<TransactionRow> {
        match conn {
            Some(conn) => Self::pending_in(conn, entry).await,
            None => {
                let mut tx = self.pool.begin().await?;
                let row = Self::pending_in(&mut *tx, entry).await?;
                tx.commit().await?;
                Ok(row)
            }
        }
    }

    /// Records `transaction` as `COMMITTED` in `block_id`.
    ///
    /// Fee, size and cycles survive from an earlier pending sighting; a
    /// transaction first seen here gets zeros.
    pub async fn process_committed(
        &self,
        transaction: &Transaction,
        block_id: i64,
        is_cellbase: bool,
        conn: Option<&mut SqliteConnection>,
    ) -> Result<TransactionRow> {
        match conn {
            Some(conn) => Self::committed_in(conn, transaction, block_id, is_cellbase).await,
            None => {
                let mut tx = self.pool.begin().await?;
                let row = Self::committed_in(&mut *tx, transaction, block_id, is_cellbase).await?;
                tx.commit().await?;
                Ok(row)
            }
        }
    }

    /// Removes a transaction and its relations. Returns whether a row existed.
    pub async fn delete_transaction(
        &self,
        hash: &str,
        conn: Option<&mut SqliteConnection>,
    ) -> Result<bool> {
        match conn {
            Some(conn) => Self::delete_in(conn, hash).await,
            None => {
                let mut tx = self.pool.begin().await?;
                let deleted = Self::delete_in(&mut *tx, hash).await?;
                tx.commit().await?;
                Ok(deleted)
            }
        }
    }

    /// Moves `PENDING` rows matching any id to `PROPOSED` in one statement.
    ///
    /// Ids are full transaction hashes or proposal short ids. Returns the
    /// number of rows changed.
    pub async fn mark_proposed(
        &self,
        ids: &[String],
        conn: Option<&mut SqliteConnection>,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        match conn {
            Some(conn) => Self::mark_proposed_in(conn, ids).await,
            None => {
                let mut tx = self.pool.begin().await?;
                let changed = Self::mark_proposed_in(&mut *tx, ids).await?;
                tx.commit().await?;
                Ok(changed)
            }
        }
    }

    async fn pending_in(
        conn: &mut SqliteConnection,
        entry: &PoolTransactionEntry,
    ) -> Result<TransactionRow> {
        let transaction = &entry.transaction;
        let hash = transaction.hash.to_hex();
        let fee = db_int(entry.fee.value(), "fee")?;
        let size = db_int(entry.size.value(), "size")?;
        let cycles = db_int(entry.cycles.value(), "cycles")?;
        let witnesses = serde_json::to_string(&transaction.witnesses)?;
        let now = Utc::now();

        Self::delete_relations(conn, &hash).await?;

        sqlx::query(
            r#"
            INSERT INTO transactions
                (hash, status, fee, size, cycles, version, witnesses, block_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            ON CONFLICT (hash) DO UPDATE SET
                status = excluded.status,
                fee = excluded.fee,
                size = excluded.size,
                cycles = excluded.cycles,
                version = excluded.version,
                witnesses = excluded.witnesses,
                block_id = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&hash)
        .bind(TxStatus::Pending)
        .bind(fee)
        .bind(size)
        .bind(cycles)
        .bind(i64::from(transaction.version.value()))
        .bind(&witnesses)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::create_relations(conn, transaction, false).await?;
        debug!(tx_hash = %hash, fee, size, cycles, "indexed pending transaction");

        Self::fetch(conn, &hash).await
    }

    async fn committed_in(
        conn: &mut SqliteConnection,
        transaction: &Transaction,
        block_id: i64,
        is_cellbase: bool,
    ) -> Result<TransactionRow> {
        let hash = transaction.hash.to_hex();
        let witnesses = serde_json::to_string(&transaction.witnesses)?;
        let now = Utc::now();

        Self::delete_relations(conn, &hash).await?;

        // fee/size/cycles are left out of the update so a pending sighting wins.
        sqlx::query(
            r#"
            INSERT INTO transactions
                (hash, status, fee, size, cycles, version, witnesses, block_id, created_at, updated_at)
            VALUES (?, ?, 0, 0, 0, ?, ?, ?, ?, ?)
            ON CONFLICT (hash) DO UPDATE SET
                status = excluded.status,
                version = excluded.version,
                witnesses = excluded.witnesses,
                block_id = excluded.block_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&hash)
        .bind(TxStatus::Committed)
        .bind(i64::from(transaction.version.value()))
        .bind(&witnesses)
        .bind(block_id)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::create_relations(conn, transaction, is_cellbase).await?;
        debug!(tx_hash = %hash, block_id, is_cellbase, "indexed committed transaction");

        Self::fetch(conn, &hash).await
    }

    async fn delete_in(conn: &mut SqliteConnection, hash: &str) -> Result<bool> {
        Self::delete_relations(conn, hash).await?;
        let result = sqlx::query("DELETE FROM transactions WHERE hash = ?")
            .bind(hash)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_proposed_in(conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE transactions SET status = ");
        query.push_bind(TxStatus::Proposed);
        query.push(", updated_at = ");
        query.push_bind(Utc::now());
        query.push(" WHERE status = ");
        query.push_bind(TxStatus::Pending);
        query.push(" AND (");
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                query.push(" OR ");
            }
            let id = id.to_ascii_lowercase();
            if id.len() == PROPOSAL_SHORT_ID_HEX_LEN {
                query.push("substr(hash, 1, 22) = ");
            } else {
                query.push("hash = ");
            }
            query.push_bind(id);
        }
        query.push(")");

        let result = query.build().execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn delete_relations(conn: &mut SqliteConnection, hash: &str) -> Result<()> {
        for table in ["cell_deps", "header_deps", "inputs", "outputs"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE tx_hash = ?"))
                .bind(hash)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn create_relations(
        conn: &mut SqliteConnection,
        transaction: &Transaction,
        is_cellbase: bool,
    ) -> Result<()> {
        let hash = transaction.hash.to_hex();

        for dep in &transaction.cell_deps {
            sqlx::query(
                "INSERT INTO cell_deps (tx_hash, out_point_tx_hash, out_point_index, dep_type) VALUES (?, ?, ?, ?)",
            )
            .bind(&hash)
            .bind(dep.out_point.tx_hash.to_hex())
            .bind(i64::from(dep.out_point.index.value()))
            .bind(dep.dep_type.as_str())
            .execute(&mut *conn)
            .await?;
        }

        for header in &transaction.header_deps {
            sqlx::query("INSERT INTO header_deps (tx_hash, block_hash) VALUES (?, ?)")
                .bind(&hash)
                .bind(header.to_hex())
                .execute(&mut *conn)
                .await?;
        }

        for (index, output) in transaction.outputs.iter().enumerate() {
            let lock_script_id = ScriptRegistry::resolve(&mut *conn, &output.lock).await?;
            let type_script_id = match &output.type_ {
                Some(script) => Some(ScriptRegistry::resolve(&mut *conn, script).await?),
                None => None,
            };
            let data = transaction
                .outputs_data
                .get(index)
                .map(|data| data.to_hex())
                .unwrap_or_else(|| "0x".to_string());

            sqlx::query(
                r#"
                INSERT INTO outputs (tx_hash, output_index, capacity, lock_script_id, type_script_id, data)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&hash)
            .bind(db_int(index as u64, "output index")?)
            .bind(db_int(output.capacity.value(), "capacity")?)
            .bind(lock_script_id)
            .bind(type_script_id)
            .bind(data)
            .execute(&mut *conn)
            .await?;
        }

        if is_cellbase {
            return Ok(());
        }

        for (index, input) in transaction.inputs.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO inputs (tx_hash, input_index, previous_tx_hash, previous_index, since)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&hash)
            .bind(db_int(index as u64, "input index")?)
            .bind(input.previous_output.tx_hash.to_hex())
            .bind(i64::from(input.previous_output.index.value()))
            .bind(input.since.to_string())
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    async fn fetch(conn: &mut SqliteConnection, hash: &str) -> Result<TransactionRow> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row)
    }
}
