//! Settings persistence for orchestrator parameters
//!
//! Key/value accessors over the settings table, plus load/save of the
//! orchestrator parameter set with per-key defaults.

use crate::services::orchestrator::OrchestratorParams;
use crate::services::txn::RetryPolicy;
use shelfscan_common::Result;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Get a typed setting value; None when unset or unparsable
pub async fn get_setting<T: FromStr>(db: &SqlitePool, key: &str) -> Result<Option<T>> {
    let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    Ok(row.and_then(|r| {
        let raw: String = r.get("value");
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, raw, "Unparsable setting value, using default");
                None
            }
        }
    }))
}

/// Set a setting value (upsert)
pub async fn set_setting<T: ToString>(db: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;
    Ok(())
}

/// Load orchestrator parameters, applying compiled defaults per key
pub async fn load_orchestrator_params(db: &SqlitePool) -> Result<OrchestratorParams> {
    let defaults = OrchestratorParams::default();

    Ok(OrchestratorParams {
        cache_ttl_secs: get_setting(db, "cache_ttl_secs")
            .await?
            .unwrap_or(defaults.cache_ttl_secs),
        match_threshold: get_setting(db, "match_threshold")
            .await?
            .unwrap_or(defaults.match_threshold),
        warn_threshold: get_setting(db, "warn_threshold")
            .await?
            .unwrap_or(defaults.warn_threshold),
        inter_tier_delay_ms: get_setting(db, "inter_tier_delay_ms")
            .await?
            .unwrap_or(defaults.inter_tier_delay_ms),
        retry: RetryPolicy {
            max_attempts: get_setting(db, "retry_max_attempts")
                .await?
                .unwrap_or(defaults.retry.max_attempts),
            backoff_base_ms: get_setting(db, "retry_backoff_base_ms")
                .await?
                .unwrap_or(defaults.retry.backoff_base_ms),
        },
    })
}

/// Persist orchestrator parameters to the settings table
pub async fn save_orchestrator_params(db: &SqlitePool, params: &OrchestratorParams) -> Result<()> {
    set_setting(db, "cache_ttl_secs", params.cache_ttl_secs).await?;
    set_setting(db, "match_threshold", params.match_threshold).await?;
    set_setting(db, "warn_threshold", params.warn_threshold).await?;
    set_setting(db, "inter_tier_delay_ms", params.inter_tier_delay_ms).await?;
    set_setting(db, "retry_max_attempts", params.retry.max_attempts).await?;
    set_setting(db, "retry_backoff_base_ms", params.retry.backoff_base_ms).await?;
    Ok(())
}
