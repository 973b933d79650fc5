//! Product registry operations
//!
//! Durable, queryable store of canonical product records. Exact lookup by
//! barcode, fuzzy lookup by extracted metadata, and create/update/upsert
//! writes. The registry is the source of truth; the scan cache only ever
//! lags behind it.

use crate::models::{NewProduct, ProductMetadata, ProductPatch, ProductRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shelfscan_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

/// Maximum candidate rows scored per fuzzy search
const SEARCH_CANDIDATE_LIMIT: i64 = 1000;

/// Product registry contract.
///
/// Transient connectivity failures bubble up as `Error::Database` and are
/// retried by the transactional coordinator; constraint violations
/// (duplicate barcode) are non-retryable and surface immediately.
#[async_trait]
pub trait ProductRegistry: Send + Sync {
    /// Exact lookup by barcode
    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<ProductRecord>>;

    /// Fuzzy lookup by extracted metadata, descending by similarity.
    /// Empty on no match; ordering is stable (score, then id).
    async fn search_by_metadata(
        &self,
        meta: &ProductMetadata,
    ) -> Result<Vec<(ProductRecord, f32)>>;

    /// Insert a new product; duplicate barcode is a constraint violation
    async fn create(&self, fields: NewProduct) -> Result<ProductRecord>;

    /// Merge patch fields into an existing record (non-null incoming wins)
    async fn update(&self, id: Uuid, patch: ProductPatch) -> Result<ProductRecord>;

    /// Insert if the barcode is new, otherwise merge fields into the
    /// existing record. Atomic at the storage layer (single upsert
    /// statement) to avoid duplicate-barcode races between concurrent scans.
    async fn upsert_by_barcode(&self, fields: NewProduct) -> Result<ProductRecord>;
}

/// SQLite-backed registry over the shared pool
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRegistry for SqliteRegistry {
    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<ProductRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, barcode, name, brand, size, category, image_ref,
                   keywords, visual_characteristics, created_at, updated_at
            FROM products
            WHERE barcode = ?
            "#,
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn search_by_metadata(
        &self,
        meta: &ProductMetadata,
    ) -> Result<Vec<(ProductRecord, f32)>> {
        if meta.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, barcode, name, brand, size, category, image_ref,
                   keywords, visual_characteristics, created_at, updated_at
            FROM products
            LIMIT ?
            "#,
        )
        .bind(SEARCH_CANDIDATE_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::new();
        for row in &rows {
            let record = record_from_row(row)?;
            let score = metadata_similarity(&record, meta);
            if score > 0.0 {
                scored.push((record, score));
            }
        }

        // Descending by similarity; id breaks ties for stable ordering
        scored.sort_by(|(a_rec, a), (b_rec, b)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_rec.id.cmp(&b_rec.id))
        });

        Ok(scored)
    }

    async fn create(&self, fields: NewProduct) -> Result<ProductRecord> {
        let record = materialize(fields);

        sqlx::query(
            r#"
            INSERT INTO products (
                id, barcode, name, brand, size, category, image_ref,
                keywords, visual_characteristics, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.barcode)
        .bind(&record.name)
        .bind(&record.brand)
        .bind(&record.size)
        .bind(&record.category)
        .bind(&record.image_ref)
        .bind(serde_json::to_string(&record.keywords).unwrap_or_else(|_| "[]".to_string()))
        .bind(
            serde_json::to_string(&record.visual_characteristics)
                .unwrap_or_else(|_| "[]".to_string()),
        )
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update(&self, id: Uuid, patch: ProductPatch) -> Result<ProductRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, barcode, name, brand, size, category, image_ref,
                   keywords, visual_characteristics, created_at, updated_at
            FROM products
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let mut record = row
            .map(|r| record_from_row(&r))
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("Product not found: {}", id)))?;

        // Non-null incoming values win; None leaves stored values alone
        if let Some(barcode) = patch.barcode {
            record.barcode = Some(barcode);
        }
        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(brand) = patch.brand {
            record.brand = Some(brand);
        }
        if let Some(size) = patch.size {
            record.size = Some(size);
        }
        if let Some(category) = patch.category {
            record.category = Some(category);
        }
        if let Some(image_ref) = patch.image_ref {
            record.image_ref = Some(image_ref);
        }
        if let Some(keywords) = patch.keywords {
            record.keywords = keywords;
        }
        if let Some(vc) = patch.visual_characteristics {
            record.visual_characteristics = vc;
        }
        record.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE products SET
                barcode = ?, name = ?, brand = ?, size = ?, category = ?,
                image_ref = ?, keywords = ?, visual_characteristics = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.barcode)
        .bind(&record.name)
        .bind(&record.brand)
        .bind(&record.size)
        .bind(&record.category)
        .bind(&record.image_ref)
        .bind(serde_json::to_string(&record.keywords).unwrap_or_else(|_| "[]".to_string()))
        .bind(
            serde_json::to_string(&record.visual_characteristics)
                .unwrap_or_else(|_| "[]".to_string()),
        )
        .bind(record.updated_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_by_barcode(&self, fields: NewProduct) -> Result<ProductRecord> {
        let barcode = fields
            .barcode
            .clone()
            .ok_or_else(|| Error::InvalidInput("upsert_by_barcode requires a barcode".to_string()))?;

        let record = materialize(fields);

        sqlx::query(
            r#"
            INSERT INTO products (
                id, barcode, name, brand, size, category, image_ref,
                keywords, visual_characteristics, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(barcode) DO UPDATE SET
                name = excluded.name,
                brand = COALESCE(excluded.brand, products.brand),
                size = COALESCE(excluded.size, products.size),
                category = COALESCE(excluded.category, products.category),
                image_ref = COALESCE(excluded.image_ref, products.image_ref),
                keywords = CASE WHEN excluded.keywords = '[]'
                    THEN products.keywords ELSE excluded.keywords END,
                visual_characteristics = CASE WHEN excluded.visual_characteristics = '[]'
                    THEN products.visual_characteristics ELSE excluded.visual_characteristics END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id.to_string())
        .bind(&barcode)
        .bind(&record.name)
        .bind(&record.brand)
        .bind(&record.size)
        .bind(&record.category)
        .bind(&record.image_ref)
        .bind(serde_json::to_string(&record.keywords).unwrap_or_else(|_| "[]".to_string()))
        .bind(
            serde_json::to_string(&record.visual_characteristics)
                .unwrap_or_else(|_| "[]".to_string()),
        )
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        // Re-select: on conflict the surviving row keeps its original id
        self.find_by_barcode(&barcode)
            .await?
            .ok_or_else(|| Error::Internal(format!("upsert lost product: {}", barcode)))
    }
}

/// Assign identity and timestamps to creation fields
fn materialize(fields: NewProduct) -> ProductRecord {
    let now = Utc::now();
    ProductRecord {
        id: Uuid::new_v4(),
        barcode: fields.barcode,
        name: fields.name,
        brand: fields.brand,
        size: fields.size,
        category: fields.category,
        image_ref: fields.image_ref,
        keywords: fields.keywords,
        visual_characteristics: fields.visual_characteristics,
        created_at: now,
        updated_at: now,
    }
}

/// Map a products row into a ProductRecord
fn record_from_row(row: &SqliteRow) -> Result<ProductRecord> {
    let id_str: String = row.get("id");
    let keywords_json: String = row.get("keywords");
    let vc_json: String = row.get("visual_characteristics");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ProductRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| Error::Internal(format!("Invalid product id {}: {}", id_str, e)))?,
        barcode: row.get("barcode"),
        name: row.get("name"),
        brand: row.get("brand"),
        size: row.get("size"),
        category: row.get("category"),
        image_ref: row.get("image_ref"),
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        visual_characteristics: serde_json::from_str(&vc_json).unwrap_or_default(),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp {}: {}", value, e)))
}

/// Similarity between a stored record and extracted metadata.
///
/// Weighted Jaro-Winkler combination: 50% name, 30% brand, 20% keyword
/// overlap, renormalized over the components the metadata actually
/// provides so sparse extractions still score fairly.
pub fn metadata_similarity(record: &ProductRecord, meta: &ProductMetadata) -> f32 {
    const KEYWORD_MATCH_FLOOR: f64 = 0.85;

    let mut score = 0.0_f32;
    let mut weight = 0.0_f32;

    if let Some(name) = &meta.name {
        score += fuzzy_similarity(&record.name, name) * 0.5;
        weight += 0.5;
    }

    if let Some(brand) = &meta.brand {
        // No stored brand counts as a miss, not a skip
        if let Some(record_brand) = &record.brand {
            score += fuzzy_similarity(record_brand, brand) * 0.3;
        }
        weight += 0.3;
    }

    if !meta.keywords.is_empty() {
        let matched = meta
            .keywords
            .iter()
            .filter(|kw| {
                record
                    .keywords
                    .iter()
                    .any(|rk| fuzzy_similarity(rk, kw) as f64 >= KEYWORD_MATCH_FLOOR)
            })
            .count();
        score += (matched as f32 / meta.keywords.len() as f32) * 0.2;
        weight += 0.2;
    }

    if weight == 0.0 {
        0.0
    } else {
        score / weight
    }
}

/// Fuzzy string similarity using Jaro-Winkler on normalized input
fn fuzzy_similarity(a: &str, b: &str) -> f32 {
    let a_normalized = a.to_lowercase().trim().to_string();
    let b_normalized = b.to_lowercase().trim().to_string();
    strsim::jaro_winkler(&a_normalized, &b_normalized) as f32
}
