//! Shared lock/type script rows, deduplicated by (code_hash, hash_type, args).

use rpc_core::Script;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::Result;

#[derive(Clone)]
pub struct ScriptRegistry {
    pool: SqlitePool,
}

impl ScriptRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_or_create(
        &self,
        script: &Script,
        conn: Option<&mut SqliteConnection>,
    ) -> Result<i64> {
        match conn {
            Some(conn) => Self::resolve(conn, script).await,
            None => {
                let mut tx = self.pool.begin().await?;
                let id = Self::resolve(&mut *tx, script).await?;
                tx.commit().await?;
                Ok(id)
            }
        }
    }

    /// Returns the id of the row for `script`, inserting it on first sight.
    pub async fn resolve(conn: &mut SqliteConnection, script: &Script) -> Result<i64> {
        let code_hash = script.code_hash.to_hex();
        let hash_type = script.hash_type.as_str();
        let args = script.args.to_hex();

        sqlx::query(
            r#"
            INSERT INTO scripts (code_hash, hash_type, args)
            VALUES (?, ?, ?)
            ON CONFLICT (code_hash, hash_type, args) DO NOTHING
            "#,
        )
        .bind(&code_hash)
        .bind(hash_type)
        .bind(&args)
        .execute(&mut *conn)
        .await?;

        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM scripts WHERE code_hash = ? AND hash_type = ? AND args = ?",
        )
        .bind(&code_hash)
        .bind(hash_type)
        .bind(&args)
        .fetch_one(&mut *conn)
        .await?;

        Ok(id)
    }
}
