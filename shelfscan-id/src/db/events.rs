//! Usage event persistence
//!
//! Every tier attempt (success or failure) is recorded for observability.
//! Writes are fire-and-forget at the call site; this module only provides
//! the fallible primitives.

use shelfscan_common::Result;
use sqlx::{Row, SqlitePool};

/// One tier attempt, as recorded in scan_events
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub tier: u8,
    pub success: bool,
    pub elapsed_ms: u64,
    pub cached: bool,
    pub confidence: f32,
    pub error_code: Option<String>,
    pub session_id: Option<String>,
}

/// Insert a usage event
pub async fn insert_event(db: &SqlitePool, event: &UsageEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scan_events (tier, success, elapsed_ms, cached, confidence, error_code, session_id)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.tier as i64)
    .bind(event.success as i64)
    .bind(event.elapsed_ms as i64)
    .bind(event.cached as i64)
    .bind(event.confidence as f64)
    .bind(&event.error_code)
    .bind(&event.session_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Load the most recent usage events, newest first
pub async fn recent_events(db: &SqlitePool, limit: i64) -> Result<Vec<UsageEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT tier, success, elapsed_ms, cached, confidence, error_code, session_id
        FROM scan_events
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| UsageEvent {
            tier: row.get::<i64, _>("tier") as u8,
            success: row.get::<i64, _>("success") != 0,
            elapsed_ms: row.get::<i64, _>("elapsed_ms") as u64,
            cached: row.get::<i64, _>("cached") != 0,
            confidence: row.get::<f64, _>("confidence") as f32,
            error_code: row.get("error_code"),
            session_id: row.get("session_id"),
        })
        .collect())
}
