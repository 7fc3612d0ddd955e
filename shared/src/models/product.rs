//! Shop, product and variant models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A shop on the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: i64,
    pub name: String,
    /// Unique short code
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// A product owned by one shop.
///
/// `price` and `stock_level` are derived from the active variants and are
/// recomputed whenever a variant under the product changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub shop_id: i64,
    pub name: String,
    pub brand_id: Option<i64>,
    pub category_id: Option<i64>,
    pub sku: String,
    pub description: Option<String>,
    pub image_path: Option<String>,
    pub price: Decimal,
    pub stock_level: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A sellable SKU-level unit of a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: i64,
    pub product_id: i64,
    pub sku: String,
    pub name: Option<String>,
    pub attributes: serde_json::Value,
    pub price: Decimal,
    pub stock_level: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived product fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedProductFields {
    /// Lowest active variant price, `None` if no variant is active
    pub price: Option<Decimal>,
    /// Total stock of active variants, capped at `i32::MAX`
    pub stock_level: i32,
}

/// Compute the derived product fields from `(price, stock_level, is_active)`
/// of each variant
pub fn derive_product_fields(variants: &[(Decimal, i32, bool)]) -> DerivedProductFields {
    let active = variants.iter().filter(|(_, _, is_active)| *is_active);
    DerivedProductFields {
        price: active.clone().map(|(price, _, _)| *price).min(),
        stock_level: active.fold(0i32, |total, (_, stock, _)| total.saturating_add(*stock)),
    }
}

/// SKU of a shadow product created in `shop_id`
pub fn shadow_product_sku(source_sku: &str, shop_id: i64) -> String {
    format!("{}-S{}", source_sku, shop_id)
}

/// Second-chance SKU used when the shadow SKU is already taken
pub fn timestamped_sku(sku: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", sku, at.timestamp())
}
