//! Cross-store scan cache
//!
//! Key/value cache keyed by barcode or image-content hash, holding
//! previously resolved product records with tier provenance, confidence,
//! TTL expiry, and access statistics. Expired entries are logically absent
//! even before they are physically purged.

use crate::models::ProductRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shelfscan_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;

/// Cache key namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Barcode,
    ImageHash,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Barcode => "barcode",
            KeyType::ImageHash => "image_hash",
        }
    }
}

/// A cached resolution with provenance and access statistics
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub key_type: KeyType,
    pub record: ProductRecord,
    /// Tier (1-4) that produced this resolution
    pub tier: u8,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Lookup outcome. A physically-present but time-expired entry reports
/// `hit = false, expired = true`; the entry itself is retained for
/// diagnostic callers and for rollback snapshots.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub hit: bool,
    pub expired: bool,
    pub entry: Option<CacheEntry>,
}

impl CacheLookup {
    pub fn miss() -> Self {
        Self {
            hit: false,
            expired: false,
            entry: None,
        }
    }
}

/// Cache diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: u64,
    pub expired: u64,
}

/// Cache store contract.
///
/// All operations are fallible at this layer; the orchestrator is the one
/// place that swallows cache errors (lookup degrades to a miss, writes are
/// logged and dropped) so a cache outage never fails a scan.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(&self, key: &str, key_type: KeyType) -> Result<CacheLookup>;

    /// Upsert. Resets `last_accessed_at` and recomputes `expires_at` from
    /// the given TTL; leaves `access_count` untouched on overwrite,
    /// initializes it to 0 on first insert.
    async fn store(
        &self,
        key: &str,
        key_type: KeyType,
        record: &ProductRecord,
        tier: u8,
        confidence: f32,
        ttl: Duration,
    ) -> Result<()>;

    /// Atomically increment `access_count` and refresh `last_accessed_at`
    async fn touch(&self, key: &str, key_type: KeyType) -> Result<()>;

    /// Restore an exact entry, statistics included. Used by the
    /// transactional coordinator to roll the cache back to a snapshot.
    async fn put_entry(&self, entry: &CacheEntry) -> Result<()>;

    async fn invalidate(&self, key: &str, key_type: KeyType) -> Result<()>;

    /// Physically delete expired entries; returns the number removed
    async fn purge_expired(&self) -> Result<u64>;

    async fn stats(&self) -> Result<CacheStats>;
}

/// SQLite-backed cache store over the shared pool
#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn lookup(&self, key: &str, key_type: KeyType) -> Result<CacheLookup> {
        let row = sqlx::query(
            r#"
            SELECT cache_key, key_type, record, tier, confidence,
                   created_at, last_accessed_at, access_count, expires_at
            FROM scan_cache
            WHERE cache_key = ? AND key_type = ?
            "#,
        )
        .bind(key)
        .bind(key_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(CacheLookup::miss());
        };

        let entry = entry_from_row(&row)?;
        let expired = entry.is_expired(Utc::now());

        Ok(CacheLookup {
            hit: !expired,
            expired,
            entry: Some(entry),
        })
    }

    async fn store(
        &self,
        key: &str,
        key_type: KeyType,
        record: &ProductRecord,
        tier: u8,
        confidence: f32,
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(ttl)
                .map_err(|e| Error::InvalidInput(format!("TTL out of range: {}", e)))?;
        let record_json = serde_json::to_string(record)
            .map_err(|e| Error::Internal(format!("Cache serialize failed: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO scan_cache (
                cache_key, key_type, record, tier, confidence,
                created_at, last_accessed_at, access_count, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(cache_key, key_type) DO UPDATE SET
                record = excluded.record,
                tier = excluded.tier,
                confidence = excluded.confidence,
                created_at = excluded.created_at,
                last_accessed_at = excluded.last_accessed_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(key_type.as_str())
        .bind(record_json)
        .bind(tier as i64)
        .bind(confidence as f64)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, key: &str, key_type: KeyType) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_cache
            SET access_count = access_count + 1, last_accessed_at = ?
            WHERE cache_key = ? AND key_type = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .bind(key_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        let record_json = serde_json::to_string(&entry.record)
            .map_err(|e| Error::Internal(format!("Cache serialize failed: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO scan_cache (
                cache_key, key_type, record, tier, confidence,
                created_at, last_accessed_at, access_count, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cache_key, key_type) DO UPDATE SET
                record = excluded.record,
                tier = excluded.tier,
                confidence = excluded.confidence,
                created_at = excluded.created_at,
                last_accessed_at = excluded.last_accessed_at,
                access_count = excluded.access_count,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&entry.key)
        .bind(entry.key_type.as_str())
        .bind(record_json)
        .bind(entry.tier as i64)
        .bind(entry.confidence as f64)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.last_accessed_at.to_rfc3339())
        .bind(entry.access_count)
        .bind(entry.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn invalidate(&self, key: &str, key_type: KeyType) -> Result<()> {
        sqlx::query("DELETE FROM scan_cache WHERE cache_key = ? AND key_type = ?")
            .bind(key)
            .bind(key_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scan_cache WHERE expires_at <= ?")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS entries,
                   SUM(CASE WHEN expires_at <= ? THEN 1 ELSE 0 END) AS expired
            FROM scan_cache
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            entries: row.get::<i64, _>("entries") as u64,
            expired: row.get::<Option<i64>, _>("expired").unwrap_or(0) as u64,
        })
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry> {
    let key_type_str: String = row.get("key_type");
    let key_type = match key_type_str.as_str() {
        "barcode" => KeyType::Barcode,
        "image_hash" => KeyType::ImageHash,
        other => {
            return Err(Error::Internal(format!("Unknown cache key type: {}", other)));
        }
    };

    let record_json: String = row.get("record");
    let record: ProductRecord = serde_json::from_str(&record_json)
        .map_err(|e| Error::Internal(format!("Cache deserialize failed: {}", e)))?;

    Ok(CacheEntry {
        key: row.get("cache_key"),
        key_type,
        record,
        tier: row.get::<i64, _>("tier") as u8,
        confidence: row.get::<f64, _>("confidence") as f32,
        created_at: parse_timestamp(row, "created_at")?,
        last_accessed_at: parse_timestamp(row, "last_accessed_at")?,
        access_count: row.get("access_count"),
        expires_at: parse_timestamp(row, "expires_at")?,
    })
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid {} timestamp: {}", column, e)))
}
