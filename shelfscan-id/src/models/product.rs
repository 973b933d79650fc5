//! Product record and extracted-metadata types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical product record as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Registry-assigned identity
    pub id: Uuid,
    /// EAN/UPC digits; unique across the registry when present
    pub barcode: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub category: Option<String>,
    /// Reference to a stored product image (key or URL)
    pub image_ref: Option<String>,
    /// Free-form search keywords
    pub keywords: Vec<String>,
    /// Visual characteristics reported by image classification
    pub visual_characteristics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a new product (the registry assigns id and timestamps)
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub barcode: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub category: Option<String>,
    pub image_ref: Option<String>,
    pub keywords: Vec<String>,
    pub visual_characteristics: Vec<String>,
}

impl NewProduct {
    /// Build creation fields from extracted metadata.
    ///
    /// Falls back to "Unknown product" when extraction produced no name;
    /// callers that require a real name should check `metadata.is_empty()`
    /// before resolving this far.
    pub fn from_metadata(meta: &ProductMetadata) -> Self {
        Self {
            barcode: None,
            name: meta
                .name
                .clone()
                .unwrap_or_else(|| "Unknown product".to_string()),
            brand: meta.brand.clone(),
            size: meta.size.clone(),
            category: meta.category.clone(),
            image_ref: None,
            keywords: meta.keywords.clone(),
            visual_characteristics: Vec::new(),
        }
    }
}

/// Partial update for an existing product.
///
/// `None` leaves the stored value untouched; `Some` overwrites it
/// (non-null incoming values win).
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub barcode: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub category: Option<String>,
    pub image_ref: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub visual_characteristics: Option<Vec<String>>,
}

/// Metadata extracted from a product photo.
///
/// Produced by the text-extraction tier (even when no registry match
/// follows) and by image classification; threaded explicitly from tier 2
/// into tier 3 by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub category: Option<String>,
    pub keywords: Vec<String>,
    /// Raw OCR text, kept for downstream discovery queries
    pub raw_text: Option<String>,
}

impl ProductMetadata {
    /// True when extraction produced nothing usable for matching
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.brand.is_none() && self.keywords.is_empty()
    }

    /// Merge with fallback metadata: this value's fields win, the
    /// fallback fills gaps, keywords are the union (self's order first).
    pub fn merged_with(&self, fallback: &ProductMetadata) -> ProductMetadata {
        let mut keywords = self.keywords.clone();
        for kw in &fallback.keywords {
            if !keywords.contains(kw) {
                keywords.push(kw.clone());
            }
        }

        ProductMetadata {
            name: self.name.clone().or_else(|| fallback.name.clone()),
            brand: self.brand.clone().or_else(|| fallback.brand.clone()),
            size: self.size.clone().or_else(|| fallback.size.clone()),
            category: self.category.clone().or_else(|| fallback.category.clone()),
            keywords,
            raw_text: self.raw_text.clone().or_else(|| fallback.raw_text.clone()),
        }
    }
}
