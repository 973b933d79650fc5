//! Database access for shelfscan-id
//!
//! Shared SQLite database holding the product registry, the scan cache,
//! usage events, and settings.

pub mod events;
pub mod products;
pub mod schema;
pub mod settings;

use shelfscan_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to shelfscan.db in the data folder, creating it on first run.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    schema::init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize an in-memory database pool (tests, embedded callers).
///
/// Capped at a single connection: every pooled connection to
/// `sqlite::memory:` would otherwise open its own private database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    schema::init_tables(&pool).await?;

    Ok(pool)
}
