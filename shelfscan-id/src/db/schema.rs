//! Table creation for the shelfscan database

use shelfscan_common::Result;
use sqlx::SqlitePool;

/// Initialize shelfscan tables
///
/// Creates products, scan_cache, scan_events, and settings tables if they
/// don't exist. Also used by tests against `sqlite::memory:` pools.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // Canonical product registry. barcode is UNIQUE but nullable; SQLite
    // permits multiple NULLs, so barcode-less products coexist.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            barcode TEXT UNIQUE,
            name TEXT NOT NULL,
            brand TEXT,
            size TEXT,
            category TEXT,
            image_ref TEXT,
            keywords TEXT NOT NULL DEFAULT '[]',
            visual_characteristics TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cross-store scan cache, keyed by (cache_key, key_type) where
    // key_type is 'barcode' or 'image_hash'. The record column holds a
    // JSON snapshot of the resolved product.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_cache (
            cache_key TEXT NOT NULL,
            key_type TEXT NOT NULL,
            record TEXT NOT NULL,
            tier INTEGER NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL,
            last_accessed_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (cache_key, key_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-tier usage log (fire-and-forget observability)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tier INTEGER NOT NULL,
            success INTEGER NOT NULL,
            elapsed_ms INTEGER NOT NULL,
            cached INTEGER NOT NULL,
            confidence REAL NOT NULL,
            error_code TEXT,
            session_id TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Key/value settings for orchestrator parameter persistence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (products, scan_cache, scan_events, settings)");

    Ok(())
}
