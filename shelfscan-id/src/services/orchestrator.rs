//! Multi-tier identification orchestrator
//!
//! Runs the four identification tiers in fixed priority order, cheapest
//! first, and short-circuits on the first usable result:
//!
//! 1. Barcode: scan cache, then registry exact lookup
//! 2. Text extraction: image-hash cache, then OCR + fuzzy registry search
//! 3. Discovery: product search from tier 2's extracted metadata
//! 4. Image classification: match-or-create against the registry
//!
//! Every tier attempt settles into a `TierOutcome`: `Found` is terminal
//! regardless of its numeric confidence (low confidence attaches a warning
//! instead of escalating, which bounds latency), `NotFound` and `Failed`
//! both escalate. Tier 2's extracted metadata is the one value that flows
//! forward between tiers, threaded explicitly through the per-call state
//! below. Nothing propagates out of `scan()` as an error: every path
//! returns a structured `ScanResult`.

use crate::cache::{CacheEntry, CacheStore, KeyType};
use crate::db::events::UsageEvent;
use crate::models::{
    FailureCode, ImagePayload, NewProduct, ProductMetadata, ProductPatch, ProductRecord,
    ScanRequest, ScanResult, ScanStage, TierOutcome,
};
use crate::services::tiers::{
    DiscoveryTier, ImageClassificationTier, ProgressSink, TextExtractionTier, UsageLogger,
};
use crate::services::txn::{RegistryWrite, RetryPolicy, TxnCoordinator, TxnError};
use crate::ProductRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tunable orchestrator parameters.
///
/// Explicitly constructed and injected (persisted per-key in the settings
/// table); concurrent scans share nothing mutable.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorParams {
    /// TTL applied to cache writes, in seconds
    pub cache_ttl_secs: u64,
    /// Minimum similarity for a fuzzy registry candidate to count as a
    /// match: tier 2 escalates below it, tier 4 creates a new record
    /// instead of merging (guards against handing back, or merging into,
    /// an unrelated product)
    pub match_threshold: f32,
    /// Results below this confidence carry a low-confidence warning
    pub warn_threshold: f32,
    /// Fixed delay inserted before tier 4 to respect the classification
    /// provider's rate limit (a deliberate throughput trade-off)
    pub inter_tier_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorParams {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 7 * 24 * 3600,
            match_threshold: 0.6,
            warn_threshold: 0.8,
            inter_tier_delay_ms: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorParams {
    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// The director: sequences the tiers and owns all cross-tier state
pub struct ScanOrchestrator {
    registry: Arc<dyn ProductRegistry>,
    cache: Arc<dyn CacheStore>,
    text_tier: Arc<dyn TextExtractionTier>,
    discovery_tier: Arc<dyn DiscoveryTier>,
    classification_tier: Arc<dyn ImageClassificationTier>,
    usage: Arc<dyn UsageLogger>,
    progress: Option<Arc<dyn ProgressSink>>,
    txn: TxnCoordinator,
    params: OrchestratorParams,
}

impl ScanOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn ProductRegistry>,
        cache: Arc<dyn CacheStore>,
        text_tier: Arc<dyn TextExtractionTier>,
        discovery_tier: Arc<dyn DiscoveryTier>,
        classification_tier: Arc<dyn ImageClassificationTier>,
        usage: Arc<dyn UsageLogger>,
        params: OrchestratorParams,
    ) -> Self {
        let txn = TxnCoordinator::new(registry.clone(), cache.clone(), params.retry);
        Self {
            registry,
            cache,
            text_tier,
            discovery_tier,
            classification_tier,
            usage,
            progress: None,
            txn,
            params,
        }
    }

    /// Attach an optional progress sink; absence changes nothing
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Sole entry point. Always returns a structured result; tier failures
    /// become escalation, exhaustion becomes a retryable failure.
    pub async fn scan(&self, request: ScanRequest) -> ScanResult {
        let started = Instant::now();
        let image_hash = request.resolved_image_hash();
        let session_id = request.session_id.clone();

        // Tier 2's extracted metadata, threaded explicitly into tier 3
        let mut carried_metadata: Option<ProductMetadata> = None;

        // ---- Tier 1: barcode ------------------------------------------
        if let Some(barcode) = request.barcode.as_deref() {
            self.emit(ScanStage::BarcodeLookup, "Looking up barcode").await;
            let tier_started = Instant::now();

            if let Some(entry) = self.cache_hit(barcode, KeyType::Barcode).await {
                self.log_tier(&session_id, 1, true, tier_started, true, entry.confidence, None)
                    .await;
                let warning = self.low_confidence_warning(entry.confidence);
                return self
                    .finish_found(entry.record, entry.tier, entry.confidence, true, warning, started)
                    .await;
            }

            let outcome = self.run_barcode_tier(barcode).await;
            if let Some(result) = self.settle(1, outcome, &session_id, tier_started, started).await
            {
                return result;
            }
        }

        // ---- Tier 2: text extraction ----------------------------------
        if let (Some(image), Some(hash)) = (request.image.as_ref(), image_hash.as_deref()) {
            self.emit(ScanStage::TextExtraction, "Reading text from photo").await;
            let tier_started = Instant::now();

            if let Some(entry) = self.cache_hit(hash, KeyType::ImageHash).await {
                self.log_tier(&session_id, 2, true, tier_started, true, entry.confidence, None)
                    .await;
                let warning = self.low_confidence_warning(entry.confidence);
                return self
                    .finish_found(entry.record, entry.tier, entry.confidence, true, warning, started)
                    .await;
            }

            let outcome = match self
                .run_text_tier(image, hash, &mut carried_metadata)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => return self.finish_txn_failure(err, 2, &session_id, started).await,
            };
            if let Some(result) = self.settle(2, outcome, &session_id, tier_started, started).await
            {
                return result;
            }
        }

        // ---- Tier 3: discovery ----------------------------------------
        // Only reachable with extracted metadata, so an image hash exists
        if let (Some(metadata), Some(hash)) = (carried_metadata.as_ref(), image_hash.as_deref()) {
            self.emit(ScanStage::Discovery, "Searching product catalogs").await;
            let tier_started = Instant::now();

            let outcome = match self.run_discovery_tier(metadata, hash).await {
                Ok(outcome) => outcome,
                Err(err) => return self.finish_txn_failure(err, 3, &session_id, started).await,
            };
            if let Some(result) = self.settle(3, outcome, &session_id, tier_started, started).await
            {
                return result;
            }
        }

        // ---- Tier 4: image classification -----------------------------
        if let (Some(image), Some(hash)) = (request.image.as_ref(), image_hash.as_deref()) {
            // Rate-limit courtesy delay before the expensive provider call
            if self.params.inter_tier_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.params.inter_tier_delay_ms)).await;
            }

            self.emit(ScanStage::Classification, "Classifying product image").await;
            let tier_started = Instant::now();

            // Probe the hash again before paying for classification: a
            // concurrent scan of the same image (or a prior tier-4 run)
            // may have cached it since tier 2's miss
            if let Some(entry) = self.cache_hit(hash, KeyType::ImageHash).await {
                self.log_tier(&session_id, 4, true, tier_started, true, entry.confidence, None)
                    .await;
                let warning = self.low_confidence_warning(entry.confidence);
                return self
                    .finish_found(entry.record, entry.tier, entry.confidence, true, warning, started)
                    .await;
            }

            let outcome = match self.run_classification_tier(image, hash).await {
                Ok(outcome) => outcome,
                Err(err) => return self.finish_txn_failure(err, 4, &session_id, started).await,
            };
            if let Some(result) = self.settle(4, outcome, &session_id, tier_started, started).await
            {
                return result;
            }
        }

        // ---- All applicable tiers exhausted ---------------------------
        self.emit(ScanStage::Complete, "No tier could identify the product")
            .await;
        tracing::info!(
            barcode = request.barcode.as_deref().unwrap_or(""),
            has_image = request.image.is_some(),
            "All identification tiers exhausted"
        );
        ScanResult::failed(
            FailureCode::AllTiersExhausted,
            "Product could not be identified; retaking the photo may help",
            None,
            true,
            elapsed_ms(started),
        )
    }

    /// Tier 1: exact barcode lookup against the registry, with a
    /// best-effort cache write-back on a hit
    async fn run_barcode_tier(&self, barcode: &str) -> TierOutcome {
        match self.registry.find_by_barcode(barcode).await {
            Ok(Some(record)) => {
                // Write back so the next identical request is a cache hit.
                // A cache-write failure never aborts a successful scan.
                if let Err(e) = self
                    .cache
                    .store(barcode, KeyType::Barcode, &record, 1, 1.0, self.params.cache_ttl())
                    .await
                {
                    tracing::warn!(barcode, "Cache write-back failed: {}", e);
                }
                TierOutcome::Found {
                    record,
                    confidence: 1.0,
                    warning: None,
                }
            }
            Ok(None) => TierOutcome::NotFound,
            Err(e) => TierOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Tier 2: OCR the label, fuzzy-search the registry, and commit the
    /// match. Extracted metadata that finds no acceptable candidate is
    /// written into `carried` as escalation fuel for tier 3.
    async fn run_text_tier(
        &self,
        image: &ImagePayload,
        hash: &str,
        carried: &mut Option<ProductMetadata>,
    ) -> Result<TierOutcome, TxnError> {
        let extraction = match self.text_tier.extract(image).await {
            Ok(extraction) => extraction,
            Err(e) => {
                return Ok(TierOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        };

        if !extraction.success || extraction.metadata.is_none() {
            return Ok(TierOutcome::NotFound);
        }
        let mut metadata = extraction.metadata.unwrap_or_default();
        if metadata.raw_text.is_none() {
            metadata.raw_text = extraction.raw_text;
        }

        let matches = match self.registry.search_by_metadata(&metadata).await {
            Ok(matches) => matches,
            Err(e) => {
                // The extracted metadata still feeds tier 3
                *carried = Some(metadata);
                return Ok(TierOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        // A candidate below the match threshold is no match at all:
        // Jaro-Winkler rarely scores 0 between real strings, and accepting
        // a weak best candidate would hand back an unrelated product and
        // merge the extracted keywords into the wrong record
        match matches.into_iter().next() {
            Some((record, similarity)) if similarity >= self.params.match_threshold => {
                // Existing record may gain extracted keywords
                let patch = keyword_patch(&record, &metadata);
                self.emit(ScanStage::Persisting, "Saving identification").await;
                let updated = self
                    .txn
                    .commit(
                        RegistryWrite::Update(record.id, patch),
                        hash,
                        KeyType::ImageHash,
                        2,
                        similarity,
                        self.params.cache_ttl(),
                    )
                    .await?;
                Ok(TierOutcome::Found {
                    record: updated,
                    confidence: similarity,
                    warning: self.low_confidence_warning(similarity),
                })
            }
            _ => {
                *carried = Some(metadata);
                Ok(TierOutcome::NotFound)
            }
        }
    }

    /// Tier 3: discover a product from tier 2's metadata and commit it,
    /// by barcode upsert when the discovery source resolved one
    async fn run_discovery_tier(
        &self,
        metadata: &ProductMetadata,
        hash: &str,
    ) -> Result<TierOutcome, TxnError> {
        let discovery = match self.discovery_tier.discover(metadata, Some(hash)).await {
            Ok(Some(discovery)) => discovery,
            Ok(None) => return Ok(TierOutcome::NotFound),
            Err(e) => {
                return Ok(TierOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        };

        // Discovery fields win, extraction fills the gaps
        let merged = discovery.metadata.merged_with(metadata);
        let mut fields = NewProduct::from_metadata(&merged);
        fields.barcode = discovery.barcode.clone();

        let write = if fields.barcode.is_some() {
            RegistryWrite::UpsertByBarcode(fields)
        } else {
            RegistryWrite::Create(fields)
        };

        self.emit(ScanStage::Persisting, "Saving identification").await;
        let record = self
            .txn
            .commit(
                write,
                hash,
                KeyType::ImageHash,
                3,
                discovery.confidence,
                self.params.cache_ttl(),
            )
            .await?;
        Ok(TierOutcome::Found {
            record,
            confidence: discovery.confidence,
            warning: self.low_confidence_warning(discovery.confidence),
        })
    }

    /// Tier 4: classify the image and either merge into a sufficiently
    /// similar existing record or create a new one
    async fn run_classification_tier(
        &self,
        image: &ImagePayload,
        hash: &str,
    ) -> Result<TierOutcome, TxnError> {
        let classification = match self.classification_tier.classify(image).await {
            Ok(classification) => classification,
            Err(e) => {
                return Ok(TierOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        };

        if !classification.success
            || !self
                .classification_tier
                .is_confidence_sufficient(classification.confidence)
        {
            return Ok(TierOutcome::NotFound);
        }
        let confidence = classification.confidence;

        let matches = match self.registry.search_by_metadata(&classification.metadata).await {
            Ok(matches) => matches,
            Err(e) => {
                return Ok(TierOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        };

        let write = match matches.into_iter().next() {
            Some((record, similarity)) if similarity >= self.params.match_threshold => {
                tracing::debug!(
                    product_id = %record.id,
                    similarity,
                    "Classification matched existing product"
                );
                RegistryWrite::Update(record.id, visual_patch(&record, &classification))
            }
            _ => {
                // Below the merge threshold: a new record, never a risky merge
                let mut fields = NewProduct::from_metadata(&classification.metadata);
                fields.visual_characteristics = classification.visual_characteristics.clone();
                RegistryWrite::Create(fields)
            }
        };

        self.emit(ScanStage::Persisting, "Saving identification").await;
        let record = self
            .txn
            .commit(
                write,
                hash,
                KeyType::ImageHash,
                4,
                confidence,
                self.params.cache_ttl(),
            )
            .await?;
        Ok(TierOutcome::Found {
            record,
            confidence,
            warning: self.low_confidence_warning(confidence),
        })
    }

    /// Resolve a tier's outcome: `Found` completes the scan, `NotFound`
    /// and `Failed` escalate to the next tier (returning `None`)
    async fn settle(
        &self,
        tier: u8,
        outcome: TierOutcome,
        session_id: &Option<String>,
        tier_started: Instant,
        started: Instant,
    ) -> Option<ScanResult> {
        match outcome {
            TierOutcome::Found {
                record,
                confidence,
                warning,
            } => {
                self.log_tier(session_id, tier, true, tier_started, false, confidence, None)
                    .await;
                Some(
                    self.finish_found(record, tier, confidence, false, warning, started)
                        .await,
                )
            }
            TierOutcome::NotFound => {
                self.log_tier(session_id, tier, false, tier_started, false, 0.0, None)
                    .await;
                None
            }
            TierOutcome::Failed { reason } => {
                tracing::warn!(tier, "Tier attempt failed: {}", reason);
                self.log_tier(
                    session_id,
                    tier,
                    false,
                    tier_started,
                    false,
                    0.0,
                    Some("TIER_FAILURE"),
                )
                .await;
                None
            }
        }
    }

    /// Cache probe that degrades every failure to a miss, so the
    /// orchestrator can always fall through to the next tier. Access
    /// statistics are updated best-effort.
    async fn cache_hit(&self, key: &str, key_type: KeyType) -> Option<CacheEntry> {
        let lookup = match self.cache.lookup(key, key_type).await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::warn!(key, "Cache lookup degraded to miss: {}", e);
                return None;
            }
        };

        if !lookup.hit {
            return None;
        }

        if let Err(e) = self.cache.touch(key, key_type).await {
            tracing::debug!(key, "Cache touch failed (ignored): {}", e);
        }

        lookup.entry
    }

    fn low_confidence_warning(&self, confidence: f32) -> Option<String> {
        (confidence < self.params.warn_threshold).then(|| {
            format!(
                "Low confidence match ({:.2}); please verify the product",
                confidence
            )
        })
    }

    async fn finish_found(
        &self,
        record: ProductRecord,
        tier: u8,
        confidence: f32,
        cached: bool,
        warning: Option<String>,
        started: Instant,
    ) -> ScanResult {
        self.emit(ScanStage::Complete, "Product identified").await;
        tracing::info!(
            tier,
            confidence,
            cached,
            product = %record.name,
            "Scan resolved"
        );

        ScanResult::found(record, tier, confidence, cached, warning, elapsed_ms(started))
    }

    async fn finish_txn_failure(
        &self,
        err: TxnError,
        tier: u8,
        session_id: &Option<String>,
        started: Instant,
    ) -> ScanResult {
        let retryable = err.is_retryable();
        let code = match &err {
            TxnError::Registry { .. } => FailureCode::RegistryUnavailable,
            TxnError::Consistency(_) => FailureCode::DataConsistency,
        };
        tracing::error!(tier, "Scan persistence failed: {}", err);
        self.log_tier(session_id, tier, false, started, false, 0.0, Some(code.as_str()))
            .await;
        self.emit(ScanStage::Complete, "Identification could not be saved")
            .await;
        ScanResult::failed(code, err.to_string(), Some(tier), retryable, elapsed_ms(started))
    }

    async fn emit(&self, stage: ScanStage, message: &str) {
        tracing::debug!(stage = stage.as_str(), "{}", message);
        if let Some(sink) = &self.progress {
            sink.emit(stage, message).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_tier(
        &self,
        session_id: &Option<String>,
        tier: u8,
        success: bool,
        tier_started: Instant,
        cached: bool,
        confidence: f32,
        error_code: Option<&str>,
    ) {
        self.usage
            .record(UsageEvent {
                tier,
                success,
                elapsed_ms: elapsed_ms(tier_started),
                cached,
                confidence,
                error_code: error_code.map(str::to_string),
                session_id: session_id.clone(),
            })
            .await;
    }
}

/// Patch adding extracted keywords an existing record lacks
fn keyword_patch(record: &ProductRecord, metadata: &ProductMetadata) -> ProductPatch {
    let mut keywords = record.keywords.clone();
    for kw in &metadata.keywords {
        if !keywords.contains(kw) {
            keywords.push(kw.clone());
        }
    }

    ProductPatch {
        keywords: (keywords != record.keywords).then_some(keywords),
        ..Default::default()
    }
}

/// Patch adding visual characteristics a tier-4 match reported
fn visual_patch(
    record: &ProductRecord,
    classification: &crate::services::tiers::Classification,
) -> ProductPatch {
    let mut characteristics = record.visual_characteristics.clone();
    for vc in &classification.visual_characteristics {
        if !characteristics.contains(vc) {
            characteristics.push(vc.clone());
        }
    }

    ProductPatch {
        visual_characteristics: (characteristics != record.visual_characteristics)
            .then_some(characteristics),
        ..Default::default()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
