//! Tier strategy interfaces (external collaborators)
//!
//! Each tier is an independent strategy with no shared mutable state; the
//! orchestrator is the only component aware of tier ordering. Concrete
//! implementations (OCR, product search, image classification) live outside
//! this crate and are injected at construction time.

use crate::db::events::{self, UsageEvent};
use crate::models::{ImagePayload, ProductMetadata, ScanStage};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Result of OCR text extraction from a product photo.
///
/// Extracted metadata is returned even when no registry match follows,
/// because the discovery tier can reuse it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub success: bool,
    pub metadata: Option<ProductMetadata>,
    pub raw_text: Option<String>,
}

/// Result of discovery by extracted metadata (e.g. a product-search API)
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Barcode resolved by the discovery source, if any
    pub barcode: Option<String>,
    pub metadata: ProductMetadata,
    pub confidence: f32,
}

/// Result of visual classification
#[derive(Debug, Clone)]
pub struct Classification {
    pub success: bool,
    pub metadata: ProductMetadata,
    pub visual_characteristics: Vec<String>,
    pub confidence: f32,
}

/// Tier 2: extract printed text and product metadata from an image
#[async_trait]
pub trait TextExtractionTier: Send + Sync {
    async fn extract(&self, image: &ImagePayload) -> anyhow::Result<Extraction>;
}

/// Tier 3: discover a product from metadata extracted upstream
#[async_trait]
pub trait DiscoveryTier: Send + Sync {
    async fn discover(
        &self,
        metadata: &ProductMetadata,
        image_hash_hint: Option<&str>,
    ) -> anyhow::Result<Option<Discovery>>;
}

/// Tier 4: classify the product visually
#[async_trait]
pub trait ImageClassificationTier: Send + Sync {
    async fn classify(&self, image: &ImagePayload) -> anyhow::Result<Classification>;

    /// Fixed policy threshold: whether a classification score is usable
    fn is_confidence_sufficient(&self, score: f32) -> bool;
}

/// Optional per-stage progress notifications (SSE, UI). Fire-and-forget:
/// implementations swallow their own failures; absence of a sink does not
/// change orchestrator behavior.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, stage: ScanStage, message: &str);
}

/// Fire-and-forget usage recording for every tier attempt
#[async_trait]
pub trait UsageLogger: Send + Sync {
    async fn record(&self, event: UsageEvent);
}

/// Usage logger that discards events (tests, embedded callers)
pub struct NoopUsageLogger;

#[async_trait]
impl UsageLogger for NoopUsageLogger {
    async fn record(&self, _event: UsageEvent) {}
}

/// Usage logger writing scan_events rows; failures are logged and dropped
/// so an unavailable sink never affects a scan's outcome.
pub struct SqliteUsageLogger {
    pool: SqlitePool,
}

impl SqliteUsageLogger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageLogger for SqliteUsageLogger {
    async fn record(&self, event: UsageEvent) {
        if let Err(e) = events::insert_event(&self.pool, &event).await {
            tracing::warn!(tier = event.tier, "Usage event write failed: {}", e);
        }
    }
}
