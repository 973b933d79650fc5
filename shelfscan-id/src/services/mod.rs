//! Identification services
//!
//! Tier strategy interfaces, the transactional update coordinator, and the
//! multi-tier scan orchestrator.

pub mod orchestrator;
pub mod tiers;
pub mod txn;

pub use orchestrator::{OrchestratorParams, ScanOrchestrator};
pub use tiers::{
    Classification, Discovery, DiscoveryTier, Extraction, ImageClassificationTier,
    NoopUsageLogger, ProgressSink, SqliteUsageLogger, TextExtractionTier, UsageLogger,
};
pub use txn::{RegistryWrite, RetryPolicy, TxnCoordinator, TxnError};
