//! Scan request/result types and the uniform tier outcome

use crate::models::{ProductMetadata, ProductRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Image submitted with a scan request
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    /// Declared MIME type (e.g. "image/jpeg")
    pub mime_type: String,
}

impl ImagePayload {
    /// SHA-256 hex digest of the image bytes, used as the cache key
    pub fn content_hash(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }
}

/// Identification request. The caller guarantees that at least one of
/// `barcode` / `image` is present; the orchestrator does not re-validate.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// EAN/UPC digits, 8-13 characters
    pub barcode: Option<String>,
    pub image: Option<ImagePayload>,
    /// Precomputed SHA-256 hex of the image, if the caller already has it
    pub image_hash: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl ScanRequest {
    /// Cache key for the image: the precomputed hash when supplied,
    /// otherwise computed from the image bytes.
    pub fn resolved_image_hash(&self) -> Option<String> {
        self.image_hash
            .clone()
            .or_else(|| self.image.as_ref().map(|img| img.content_hash()))
    }
}

/// Uniform result of a single tier attempt
#[derive(Debug, Clone)]
pub enum TierOutcome {
    /// Tier resolved a product; low confidence carries a warning, not a retry
    Found {
        record: ProductRecord,
        confidence: f32,
        warning: Option<String>,
    },
    /// Tier ran cleanly and found nothing (escalation fuel, not an error)
    NotFound,
    /// Tier's underlying service errored; treated as not-found for escalation
    Failed { reason: String },
}

/// Progress stages emitted at tier transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    BarcodeLookup,
    TextExtraction,
    Discovery,
    Classification,
    Persisting,
    Complete,
}

impl ScanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStage::BarcodeLookup => "barcode_lookup",
            ScanStage::TextExtraction => "text_extraction",
            ScanStage::Discovery => "discovery",
            ScanStage::Classification => "classification",
            ScanStage::Persisting => "persisting",
            ScanStage::Complete => "complete",
        }
    }
}

/// Machine-readable failure codes surfaced in `ScanResult::error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    /// Every applicable tier returned not-found; retaking the photo may help
    AllTiersExhausted,
    /// A registry write failed and could not be retried into success
    RegistryUnavailable,
    /// Registry and cache diverged after a failed compensating rollback
    DataConsistency,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::AllTiersExhausted => "ALL_TIERS_EXHAUSTED",
            FailureCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            FailureCode::DataConsistency => "DATA_CONSISTENCY",
        }
    }
}

/// Structured scan failure
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub code: FailureCode,
    pub message: String,
    /// Tier (1-4) in which the failure originated, if attributable
    pub tier: Option<u8>,
    pub retryable: bool,
}

/// Uniform result of `scan()`; returned for success and failure alike
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub success: bool,
    pub record: Option<ProductRecord>,
    /// Tier (1-4) that produced the record
    pub tier: Option<u8>,
    pub confidence: f32,
    /// Whether the record came from the cross-store cache
    pub cached: bool,
    pub elapsed_ms: u64,
    /// Low-confidence warning; present when confidence fell below the
    /// warn threshold but the result was still usable
    pub warning: Option<String>,
    pub error: Option<ScanFailure>,
}

impl ScanResult {
    pub fn found(
        record: ProductRecord,
        tier: u8,
        confidence: f32,
        cached: bool,
        warning: Option<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            success: true,
            record: Some(record),
            tier: Some(tier),
            confidence,
            cached,
            elapsed_ms,
            warning,
            error: None,
        }
    }

    pub fn failed(
        code: FailureCode,
        message: impl Into<String>,
        tier: Option<u8>,
        retryable: bool,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            success: false,
            record: None,
            tier,
            confidence: 0.0,
            cached: false,
            elapsed_ms,
            warning: None,
            error: Some(ScanFailure {
                code,
                message: message.into(),
                tier,
                retryable,
            }),
        }
    }
}
