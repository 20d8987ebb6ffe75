//! Database query functions

use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::*;

pub struct BlockQueries;

impl BlockQueries {
    pub async fn get_by_hash(pool: &SqlitePool, hash: &str) -> Result<Option<BlockRow>> {
        let block = sqlx::query_as::<_, BlockRow>("SELECT * FROM blocks WHERE hash = ?")
            .bind(hash)
            .fetch_optional(pool)
            .await?;
        Ok(block)
    }

    pub async fn latest(pool: &SqlitePool) -> Result<Option<BlockRow>> {
        let block = sqlx::query_as::<_, BlockRow>(
            "SELECT * FROM blocks ORDER BY number DESC, id DESC LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;
        Ok(block)
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blocks")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

pub struct TransactionQueries;

impl TransactionQueries {
    pub async fn get_by_hash(pool: &SqlitePool, hash: &str) -> Result<Option<TransactionRow>> {
        let tx = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(pool)
            .await?;
        Ok(tx)
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn count_by_status(pool: &SqlitePool, status: TxStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn outputs(pool: &SqlitePool, hash: &str) -> Result<Vec<OutputRow>> {
        let outputs = sqlx::query_as::<_, OutputRow>(
            "SELECT * FROM outputs WHERE tx_hash = ? ORDER BY output_index",
        )
        .bind(hash)
        .fetch_all(pool)
        .await?;
        Ok(outputs)
    }

    pub async fn inputs(pool: &SqlitePool, hash: &str) -> Result<Vec<InputRow>> {
        let inputs = sqlx::query_as::<_, InputRow>(
            "SELECT * FROM inputs WHERE tx_hash = ? ORDER BY input_index",
        )
        .bind(hash)
        .fetch_all(pool)
        .await?;
        Ok(inputs)
    }

    pub async fn relation_counts(pool: &SqlitePool, hash: &str) -> Result<RelationCounts> {
        let (cell_deps, header_deps, inputs, outputs) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM cell_deps WHERE tx_hash = ?),
                (SELECT COUNT(*) FROM header_deps WHERE tx_hash = ?),
                (SELECT COUNT(*) FROM inputs WHERE tx_hash = ?),
                (SELECT COUNT(*) FROM outputs WHERE tx_hash = ?)
            "#,
        )
        .bind(hash)
        .bind(hash)
        .bind(hash)
        .bind(hash)
        .fetch_one(pool)
        .await?;

        Ok(RelationCounts {
            cell_deps,
            header_deps,
            inputs,
            outputs,
        })
    }
}

pub struct ScriptQueries;

impl ScriptQueries {
    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<ScriptRow>> {
        let script = sqlx::query_as::<_, ScriptRow>("SELECT * FROM scripts WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(script)
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scripts")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
