//! Expiring key-value cache repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::CacheEntryDbModel;

#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn set(&self, key: &str, value: &str, expires_at_ms: i64) -> Result<()>;
    /// Raw entry for `key`, expired or not; expiry is the caller's decision.
    async fn get(&self, key: &str) -> Result<Option<CacheEntryDbModel>>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Delete every entry that expired at or before `now_ms`.
    async fn purge_expired(&self, now_ms: i64) -> Result<u64>;
}

/// SQLx implementation of CacheRepository.
pub struct SqlxCacheRepository {
    pool: SqlitePool,
}

impl SqlxCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheRepository for SqlxCacheRepository {
    async fn set(&self, key: &str, value: &str, expires_at_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at_ms)
        .bind(crate::database::time::now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntryDbModel>> {
        let entry =
            sqlx::query_as::<_, CacheEntryDbModel>("SELECT * FROM cache_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(entry)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
