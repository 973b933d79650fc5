//! Domain models for product identification

pub mod product;
pub mod scan;

pub use product::{NewProduct, ProductMetadata, ProductPatch, ProductRecord};
pub use scan::{
    FailureCode, ImagePayload, ScanFailure, ScanRequest, ScanResult, ScanStage, TierOutcome,
};
