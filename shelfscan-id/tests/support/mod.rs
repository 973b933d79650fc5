//! Shared test harness: in-memory stores and scripted tier stubs

// Each test binary uses a different subset of the harness
#![allow(dead_code)]

use async_trait::async_trait;
use shelfscan_id::cache::{CacheEntry, CacheLookup, CacheStats, CacheStore, KeyType};
use shelfscan_id::db;
use shelfscan_id::models::{ImagePayload, ProductMetadata, ProductRecord, ScanStage};
use shelfscan_id::services::tiers::{
    Classification, Discovery, DiscoveryTier, Extraction, ImageClassificationTier,
    NoopUsageLogger, ProgressSink, TextExtractionTier, UsageLogger,
};
use shelfscan_id::{OrchestratorParams, ScanOrchestrator, SqliteCacheStore, SqliteRegistry};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Text-extraction stub: `None` simulates a service outage
pub struct StubTextTier {
    pub extraction: Option<Extraction>,
}

impl StubTextTier {
    pub fn down() -> Self {
        Self { extraction: None }
    }

    pub fn nothing_readable() -> Self {
        Self {
            extraction: Some(Extraction {
                success: false,
                metadata: None,
                raw_text: None,
            }),
        }
    }

    pub fn extracts(metadata: ProductMetadata) -> Self {
        Self {
            extraction: Some(Extraction {
                success: true,
                metadata: Some(metadata),
                raw_text: Some("label text".to_string()),
            }),
        }
    }
}

#[async_trait]
impl TextExtractionTier for StubTextTier {
    async fn extract(&self, _image: &ImagePayload) -> anyhow::Result<Extraction> {
        self.extraction
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OCR service unavailable"))
    }
}

/// Discovery stub that records the metadata it was handed
pub struct StubDiscoveryTier {
    pub discovery: Option<Discovery>,
    pub seen_metadata: Mutex<Option<ProductMetadata>>,
}

impl StubDiscoveryTier {
    pub fn finds_nothing() -> Self {
        Self {
            discovery: None,
            seen_metadata: Mutex::new(None),
        }
    }

    pub fn finds(discovery: Discovery) -> Self {
        Self {
            discovery: Some(discovery),
            seen_metadata: Mutex::new(None),
        }
    }

    pub fn seen(&self) -> Option<ProductMetadata> {
        self.seen_metadata.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiscoveryTier for StubDiscoveryTier {
    async fn discover(
        &self,
        metadata: &ProductMetadata,
        _image_hash_hint: Option<&str>,
    ) -> anyhow::Result<Option<Discovery>> {
        *self.seen_metadata.lock().unwrap() = Some(metadata.clone());
        Ok(self.discovery.clone())
    }
}

/// Classification stub with a configurable sufficiency floor
pub struct StubClassificationTier {
    pub classification: Option<Classification>,
    pub sufficiency_floor: f32,
}

impl StubClassificationTier {
    pub fn down() -> Self {
        Self {
            classification: None,
            sufficiency_floor: 0.5,
        }
    }

    pub fn classifies(metadata: ProductMetadata, confidence: f32) -> Self {
        Self {
            classification: Some(Classification {
                success: true,
                metadata,
                visual_characteristics: vec!["boxed".to_string()],
                confidence,
            }),
            sufficiency_floor: 0.5,
        }
    }
}

#[async_trait]
impl ImageClassificationTier for StubClassificationTier {
    async fn classify(&self, _image: &ImagePayload) -> anyhow::Result<Classification> {
        self.classification
            .clone()
            .ok_or_else(|| anyhow::anyhow!("classification service unavailable"))
    }

    fn is_confidence_sufficient(&self, score: f32) -> bool {
        score >= self.sufficiency_floor
    }
}

/// Progress sink collecting the stages it saw
pub struct CollectingProgress {
    pub stages: Mutex<Vec<ScanStage>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self {
            stages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProgressSink for CollectingProgress {
    async fn emit(&self, stage: ScanStage, _message: &str) {
        self.stages.lock().unwrap().push(stage);
    }
}

/// Cache wrapper whose store() always fails, for consistency-path tests
pub struct FailingStoreCache {
    pub inner: SqliteCacheStore,
}

#[async_trait]
impl CacheStore for FailingStoreCache {
    async fn lookup(&self, key: &str, key_type: KeyType) -> shelfscan_common::Result<CacheLookup> {
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
        Err(shelfscan_common::Error::Internal(
            "cache backend unavailable".to_string(),
        ))
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

/// In-memory stores plus orchestrator construction
pub struct Harness {
    pub pool: SqlitePool,
    pub registry: SqliteRegistry,
    pub cache: SqliteCacheStore,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = db::init_memory_pool()
            .await
            .expect("Failed to create in-memory database");
        Self {
            registry: SqliteRegistry::new(pool.clone()),
            cache: SqliteCacheStore::new(pool.clone()),
            pool,
        }
    }

    pub fn orchestrator(
        &self,
        text: Arc<dyn TextExtractionTier>,
        discovery: Arc<dyn DiscoveryTier>,
        classification: Arc<dyn ImageClassificationTier>,
    ) -> ScanOrchestrator {
        self.orchestrator_with(
            text,
            discovery,
            classification,
            Arc::new(NoopUsageLogger),
            OrchestratorParams::default(),
        )
    }

    pub fn orchestrator_with(
        &self,
        text: Arc<dyn TextExtractionTier>,
        discovery: Arc<dyn DiscoveryTier>,
        classification: Arc<dyn ImageClassificationTier>,
        usage: Arc<dyn UsageLogger>,
        params: OrchestratorParams,
    ) -> ScanOrchestrator {
        ScanOrchestrator::new(
            Arc::new(self.registry.clone()),
            Arc::new(self.cache.clone()),
            text,
            discovery,
            classification,
            usage,
            params,
        )
    }
}

/// A small JPEG-ish payload; content only matters for its hash
pub fn test_image(content: &[u8]) -> ImagePayload {
    ImagePayload {
        bytes: content.to_vec(),
        mime_type: "image/jpeg".to_string(),
    }
}
