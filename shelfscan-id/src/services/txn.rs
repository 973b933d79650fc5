//! Transactional update coordinator
//!
//! Wraps a write that must land in both the product registry and the scan
//! cache. The registry write is retried with exponential backoff on
//! transient failures; on registry success but cache failure, the cache is
//! rolled back to its pre-transaction snapshot and a data-consistency error
//! is surfaced.
//!
//! Known limitation: there is no registry-side rollback. A committed
//! registry write cannot be undone here; the coordinator can only
//! compensate the cache. The registry is the source of truth and the cache
//! may transiently lag, but the cache is never left ahead of a failed
//! registry write.

use crate::cache::{CacheStore, KeyType};
use crate::models::{NewProduct, ProductPatch, ProductRecord};
use crate::ProductRegistry;
use shelfscan_common::Error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Retry behavior for transient registry failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default 3)
    pub max_attempts: u32,
    /// Backoff is `backoff_base_ms * 2^attempt` milliseconds
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 100,
        }
    }
}

impl RetryPolicy {
    fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

/// Coordinator failure, distinguishing plain registry failures from
/// registry/cache divergence
#[derive(Debug, Error)]
pub enum TxnError {
    /// The registry write failed (after retries, for transient errors)
    #[error("Registry write failed after {attempts} attempt(s): {source}")]
    Registry {
        #[source]
        source: Error,
        attempts: u32,
        retryable: bool,
    },

    /// The registry write committed but the cache write failed; the cache
    /// was compensated back to its snapshot, and the two stores disagree
    /// until the next successful write
    #[error("Data consistency error: {0}")]
    Consistency(String),
}

impl TxnError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TxnError::Registry { retryable, .. } => *retryable,
            // Automatic repair is not possible; do not invite a retry
            TxnError::Consistency(_) => false,
        }
    }
}

/// The registry half of a paired write
#[derive(Debug, Clone)]
pub enum RegistryWrite {
    Create(NewProduct),
    Update(Uuid, ProductPatch),
    UpsertByBarcode(NewProduct),
}

/// Coordinates a logically-atomic update across registry and cache
pub struct TxnCoordinator {
    registry: Arc<dyn ProductRegistry>,
    cache: Arc<dyn CacheStore>,
    policy: RetryPolicy,
}

impl TxnCoordinator {
    pub fn new(
        registry: Arc<dyn ProductRegistry>,
        cache: Arc<dyn CacheStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            cache,
            policy,
        }
    }

    /// Perform the paired write: registry first (with retry), then cache.
    ///
    /// Returns the registry's view of the record. On cache failure the
    /// pre-transaction cache entry is restored (or the key invalidated if
    /// none existed) and `TxnError::Consistency` is returned.
    pub async fn commit(
        &self,
        write: RegistryWrite,
        cache_key: &str,
        key_type: KeyType,
        tier: u8,
        confidence: f32,
        ttl: Duration,
    ) -> Result<ProductRecord, TxnError> {
        // 1. Snapshot the current cache entry for rollback. Snapshot
        //    failure degrades to "no snapshot"; rollback then invalidates.
        let snapshot = match self.cache.lookup(cache_key, key_type).await {
            Ok(lookup) => lookup.entry,
            Err(e) => {
                tracing::warn!(cache_key, "Cache snapshot failed before commit: {}", e);
                None
            }
        };

        // 2. Registry write with retry on transient failures
        let mut attempts = 0;
        let record = loop {
            attempts += 1;
            match self.apply_registry_write(&write).await {
                Ok(record) => break record,
                Err(e) => {
                    let retryable = e.is_transient();
                    if retryable && attempts < self.policy.max_attempts {
                        let delay = self.policy.backoff_delay(attempts - 1);
                        tracing::warn!(
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Transient registry failure, retrying: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        // Non-transient, or retries exhausted: no cache
                        // write was attempted, stores are untouched
                        return Err(TxnError::Registry {
                            source: e,
                            attempts,
                            retryable,
                        });
                    }
                }
            }
        };

        // 3. Cache write of the committed record
        if let Err(cache_err) = self
            .cache
            .store(cache_key, key_type, &record, tier, confidence, ttl)
            .await
        {
            tracing::error!(
                cache_key,
                product_id = %record.id,
                "Cache write failed after registry commit; rolling cache back: {}",
                cache_err
            );

            // 4. Compensate: restore the snapshot, or delete if none existed
            let rollback = match &snapshot {
                Some(entry) => self.cache.put_entry(entry).await,
                None => self.cache.invalidate(cache_key, key_type).await,
            };
            if let Err(rb_err) = rollback {
                tracing::error!(cache_key, "Cache rollback also failed: {}", rb_err);
            }

            return Err(TxnError::Consistency(format!(
                "registry updated but cache write failed for {}: {}",
                cache_key, cache_err
            )));
        }

        Ok(record)
    }

    async fn apply_registry_write(
        &self,
        write: &RegistryWrite,
    ) -> shelfscan_common::Result<ProductRecord> {
        match write {
            RegistryWrite::Create(fields) => self.registry.create(fields.clone()).await,
            RegistryWrite::Update(id, patch) => self.registry.update(*id, patch.clone()).await,
            RegistryWrite::UpsertByBarcode(fields) => {
                self.registry.upsert_by_barcode(fields.clone()).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheLookup, CacheStats, SqliteCacheStore};
    use crate::models::ProductMetadata;
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(3600);

    fn short_backoff() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 1,
        }
    }

    fn fields(name: &str) -> NewProduct {
        NewProduct {
            barcode: Some("012345678901".to_string()),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Registry that fails a scripted number of times before delegating
    struct FlakyRegistry {
        inner: crate::SqliteRegistry,
        failures_left: AtomicU32,
        attempts: AtomicU32,
        error: fn() -> Error,
    }

    impl FlakyRegistry {
        fn new(inner: crate::SqliteRegistry, failures: u32, error: fn() -> Error) -> Self {
            Self {
                inner,
                failures_left: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
                error,
            }
        }

        fn take_failure(&self) -> Option<Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                Some((self.error)())
            } else {
                None
            }
        }
    }

    #[async_trait]
    impl ProductRegistry for FlakyRegistry {
        async fn find_by_barcode(
            &self,
            barcode: &str,
        ) -> shelfscan_common::Result<Option<ProductRecord>> {
            self.inner.find_by_barcode(barcode).await
        }

        async fn search_by_metadata(
            &self,
            meta: &ProductMetadata,
        ) -> shelfscan_common::Result<Vec<(ProductRecord, f32)>> {
            self.inner.search_by_metadata(meta).await
        }

        async fn create(&self, fields: NewProduct) -> shelfscan_common::Result<ProductRecord> {
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            self.inner.create(fields).await
        }

        async fn update(
            &self,
            id: Uuid,
            patch: ProductPatch,
        ) -> shelfscan_common::Result<ProductRecord> {
            self.inner.update(id, patch).await
        }

        async fn upsert_by_barcode(
            &self,
            fields: NewProduct,
        ) -> shelfscan_common::Result<ProductRecord> {
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            self.inner.upsert_by_barcode(fields).await
        }
    }

    /// Cache whose store() always fails; everything else delegates
    struct BrokenStoreCache {
        inner: SqliteCacheStore,
    }

    #[async_trait]
    impl CacheStore for BrokenStoreCache {
        async fn lookup(
            &self,
            key: &str,
            key_type: KeyType,
        ) -> shelfscan_common::Result<CacheLookup> {
            self.inner.lookup(key, key_type).await
        }

        async fn store(
            &self,
            _key: &str,
            _key_type: KeyType,
            _record: &ProductRecord,
            _tier: u8,
            _confidence: f32,
            _ttl: Duration,
        ) -> shelfscan_common::Result<()> {
            Err(Error::Internal("cache backend unavailable".to_string()))
        }

        async fn touch(&self, key: &str, key_type: KeyType) -> shelfscan_common::Result<()> {
            self.inner.touch(key, key_type).await
        }

        async fn put_entry(&self, entry: &CacheEntry) -> shelfscan_common::Result<()> {
            self.inner.put_entry(entry).await
        }

        async fn invalidate(&self, key: &str, key_type: KeyType) -> shelfscan_common::Result<()> {
            self.inner.invalidate(key, key_type).await
        }

        async fn purge_expired(&self) -> shelfscan_common::Result<u64> {
            self.inner.purge_expired().await
        }

        async fn stats(&self) -> shelfscan_common::Result<CacheStats> {
            self.inner.stats().await
        }
    }

    async fn test_pool() -> SqlitePool {
        crate::db::init_memory_pool()
            .await
            .expect("Failed to create in-memory database")
    }

    #[tokio::test]
    async fn transient_failures_retried_to_success() {
        let pool = test_pool().await;
        let registry = Arc::new(FlakyRegistry::new(
            crate::SqliteRegistry::new(pool.clone()),
            2,
            || Error::Internal("connection reset by peer".to_string()),
        ));
        let cache = Arc::new(SqliteCacheStore::new(pool));
        // Runs on the real clock (a paused clock auto-advances sqlite pool
        // acquires straight to their deadline); a tiny base keeps the
        // backoff sleeps negligible
        let txn = TxnCoordinator::new(registry.clone(), cache, short_backoff());

        let record = txn
            .commit(
                RegistryWrite::Create(fields("Oat Flakes")),
                "012345678901",
                KeyType::Barcode,
                1,
                1.0,
                TTL,
            )
            .await
            .expect("commit should succeed after retries");

        assert_eq!(record.name, "Oat Flakes");
        // Failed transiently twice, then succeeded: exactly 3 attempts
        assert_eq!(registry.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let pool = test_pool().await;
        let registry = Arc::new(FlakyRegistry::new(
            crate::SqliteRegistry::new(pool.clone()),
            u32::MAX,
            || Error::Internal("UNIQUE constraint failed: products.barcode".to_string()),
        ));
        let cache = Arc::new(SqliteCacheStore::new(pool));
        let txn = TxnCoordinator::new(registry.clone(), cache.clone(), RetryPolicy::default());

        let err = txn
            .commit(
                RegistryWrite::Create(fields("Dupe")),
                "012345678901",
                KeyType::Barcode,
                1,
                1.0,
                TTL,
            )
            .await
            .unwrap_err();

        assert_eq!(registry.attempts.load(Ordering::SeqCst), 1);
        match err {
            TxnError::Registry {
                attempts,
                retryable,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(!retryable);
            }
            other => panic!("expected registry error, got {:?}", other),
        }
        // No cache write was attempted
        let lookup = cache.lookup("012345678901", KeyType::Barcode).await.unwrap();
        assert!(lookup.entry.is_none());
    }

    #[tokio::test]
    async fn retries_exhausted_leaves_stores_untouched() {
        let pool = test_pool().await;
        let registry = Arc::new(FlakyRegistry::new(
            crate::SqliteRegistry::new(pool.clone()),
            u32::MAX,
            || Error::Internal("operation timed out".to_string()),
        ));
        let cache = Arc::new(SqliteCacheStore::new(pool));
        let txn = TxnCoordinator::new(registry.clone(), cache.clone(), short_backoff());

        let err = txn
            .commit(
                RegistryWrite::Create(fields("Never")),
                "012345678901",
                KeyType::Barcode,
                1,
                1.0,
                TTL,
            )
            .await
            .unwrap_err();

        assert_eq!(registry.attempts.load(Ordering::SeqCst), 3);
        assert!(err.is_retryable());
        assert!(registry
            .find_by_barcode("012345678901")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cache_failure_rolls_back_to_snapshot() {
        let pool = test_pool().await;
        let sqlite_registry = crate::SqliteRegistry::new(pool.clone());
        let real_cache = SqliteCacheStore::new(pool.clone());

        // Seed a pre-transaction cache entry for the key
        let existing = sqlite_registry
            .create(NewProduct {
                barcode: Some("999999999999".to_string()),
                name: "Old Snapshot".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        real_cache
            .store("012345678901", KeyType::Barcode, &existing, 1, 0.9, TTL)
            .await
            .unwrap();

        let registry: Arc<dyn ProductRegistry> = Arc::new(sqlite_registry);
        let cache: Arc<dyn CacheStore> = Arc::new(BrokenStoreCache {
            inner: real_cache.clone(),
        });
        let txn = TxnCoordinator::new(registry, cache, RetryPolicy::default());

        let err = txn
            .commit(
                RegistryWrite::Create(fields("New Product")),
                "012345678901",
                KeyType::Barcode,
                1,
                1.0,
                TTL,
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, TxnError::Consistency(_)),
            "must be tagged as a consistency error, got {:?}",
            err
        );
        assert!(!err.is_retryable());

        // Cache shows the pre-transaction state
        let lookup = real_cache.lookup("012345678901", KeyType::Barcode).await.unwrap();
        let entry = lookup.entry.expect("snapshot must be restored");
        assert_eq!(entry.record.name, "Old Snapshot");
    }

    #[tokio::test]
    async fn cache_failure_with_no_snapshot_leaves_a_miss() {
        let pool = test_pool().await;
        let real_cache = SqliteCacheStore::new(pool.clone());
        let registry: Arc<dyn ProductRegistry> = Arc::new(crate::SqliteRegistry::new(pool));
        let cache: Arc<dyn CacheStore> = Arc::new(BrokenStoreCache {
            inner: real_cache.clone(),
        });
        let txn = TxnCoordinator::new(registry, cache, RetryPolicy::default());

        let err = txn
            .commit(
                RegistryWrite::Create(fields("Fresh")),
                "012345678901",
                KeyType::Barcode,
                1,
                1.0,
                TTL,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TxnError::Consistency(_)));
        let lookup = real_cache.lookup("012345678901", KeyType::Barcode).await.unwrap();
        assert!(lookup.entry.is_none(), "no prior entry: rollback leaves a miss");
    }
}
