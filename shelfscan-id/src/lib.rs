//! shelfscan-id library interface
//!
//! Multi-tier product identification core: given a barcode and/or a product
//! photo, resolve a canonical product record using the cheapest reliable
//! signal first (cache, barcode registry lookup, text extraction, discovery,
//! image classification), writing fresh resolutions through a transactional
//! coordinator so the product registry and the scan cache stay in agreement.

pub mod cache;
pub mod db;
pub mod models;
pub mod services;

pub use crate::cache::{CacheEntry, CacheLookup, CacheStore, KeyType, SqliteCacheStore};
pub use crate::db::products::{ProductRegistry, SqliteRegistry};
pub use crate::models::{
    ImagePayload, ProductMetadata, ProductRecord, ScanFailure, ScanRequest, ScanResult,
    TierOutcome,
};
pub use crate::services::orchestrator::{OrchestratorParams, ScanOrchestrator};
pub use crate::services::txn::{RetryPolicy, TxnCoordinator, TxnError};
