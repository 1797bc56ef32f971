//! Generic expiring cache entry model.

use sqlx::FromRow;

/// Row of the `cache_entries` table.
#[derive(Debug, Clone, FromRow)]
pub struct CacheEntryDbModel {
    pub key: String,
    /// JSON value
    pub value: String,
    pub expires_at: i64,
    pub created_at: i64,
}
