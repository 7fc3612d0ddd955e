//! Stock Ledger: the only code path that changes a variant's stock level
//!
//! Every change writes one `stock_movements` row and recomputes the owning
//! product's derived price and stock in the same transaction. Callers are
//! expected to have locked the variant rows first with [`lock_variants`].
//!
//! Lock order is variants by ascending id, then their products by ascending
//! id. Product rows are taken `FOR NO KEY UPDATE` so inserts referencing them
//! are not blocked.

use rust_decimal::Decimal;
use shared::{apply_stock_delta, derive_product_fields, Actor, MovementType, SubjectRef};
use sqlx::{FromRow, PgConnection};

use crate::error::{AppError, AppResult};

/// Why the stock of a variant is changing
#[derive(Debug, Clone)]
pub struct StockChange {
    pub movement: MovementType,
    pub reference: Option<SubjectRef>,
    pub note: Option<String>,
}

impl StockChange {
    pub fn new(movement: MovementType, reference: SubjectRef) -> Self {
        Self {
            movement,
            reference: Some(reference),
            note: None,
        }
    }

    pub fn manual(movement: MovementType, note: Option<String>) -> Self {
        Self {
            movement,
            reference: None,
            note,
        }
    }
}

/// A variant row held under `FOR UPDATE`, joined with its product
#[derive(Debug, Clone, FromRow)]
pub struct LockedVariant {
    pub id: i64,
    pub product_id: i64,
    pub shop_id: i64,
    pub sku: String,
    pub price: Decimal,
    pub stock_level: i32,
    pub is_active: bool,
}

/// Lock the given variants in ascending id order, then their owning
/// products in ascending id order, and return the variants. Missing ids are
/// simply absent from the result.
pub async fn lock_variants(conn: &mut PgConnection, variant_ids: &[i64]) -> AppResult<Vec<LockedVariant>> {
    let mut ids = variant_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let rows = sqlx::query_as::<_, LockedVariant>(
        r#"
        SELECT v.id, v.product_id, p.shop_id, v.sku, v.price, v.stock_level, v.is_active
        FROM product_variants v
        JOIN products p ON p.id = v.product_id
        WHERE v.id = ANY($1)
        ORDER BY v.id
        FOR UPDATE OF v
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut product_ids: Vec<i64> = rows.iter().map(|v| v.product_id).collect();
    product_ids.sort_unstable();
    product_ids.dedup();

    sqlx::query("SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR NO KEY UPDATE")
        .bind(&product_ids)
        .execute(&mut *conn)
        .await?;

    Ok(rows)
}

/// Apply a signed `delta` to a variant's stock.
///
/// Fails with `InsufficientStock` if the level would go negative; nothing is
/// written in that case. Returns the new level.
pub async fn adjust_stock(
    conn: &mut PgConnection,
    actor: &Actor,
    variant_id: i64,
    delta: i32,
    change: &StockChange,
) -> AppResult<i32> {
    if delta == 0 {
        return Err(AppError::validation(
            "quantity",
            "Stock change must not be zero",
            "จำนวนที่เปลี่ยนแปลงต้องไม่เป็นศูนย์",
        ));
    }

    let current = current_level(conn, variant_id).await?;
    let new_level = apply_stock_delta(current.stock_level, delta).ok_or_else(|| {
        AppError::InsufficientStock(format!(
            "variant {} has {} in stock, change of {} requested",
            variant_id, current.stock_level, delta
        ))
    })?;

    write_level(conn, actor, &current, new_level, delta, change).await?;
    Ok(new_level)
}

/// Set a variant's stock to an absolute level, recording the difference.
/// Setting the current level again writes nothing.
pub async fn set_stock(
    conn: &mut PgConnection,
    actor: &Actor,
    variant_id: i64,
    level: i32,
    change: &StockChange,
) -> AppResult<i32> {
    if level < 0 {
        return Err(AppError::validation(
            "stock_level",
            "Stock level cannot be negative",
            "ระดับสต็อกต้องไม่ติดลบ",
        ));
    }

    let current = current_level(conn, variant_id).await?;
    let delta = level - current.stock_level;
    if delta == 0 {
        return Ok(level);
    }

    write_level(conn, actor, &current, level, delta, change).await?;
    Ok(level)
}

/// Recompute a product's derived price and stock from its active variants.
/// The stored price is kept when no variant is active.
///
/// The product row is locked before the variants are read, so the read sees
/// every variant change committed by an earlier holder of the lock.
pub async fn recompute_product(conn: &mut PgConnection, product_id: i64) -> AppResult<()> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM products WHERE id = $1 FOR NO KEY UPDATE")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

    let variants = sqlx::query_as::<_, (Decimal, i32, bool)>(
        "SELECT price, stock_level, is_active FROM product_variants WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    let derived = derive_product_fields(&variants);

    sqlx::query(
        r#"
        UPDATE products
        SET price = COALESCE($2, price), stock_level = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(product_id)
    .bind(derived.price)
    .bind(derived.stock_level)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn current_level(conn: &mut PgConnection, variant_id: i64) -> AppResult<LockedVariant> {
    sqlx::query_as::<_, LockedVariant>(
        r#"
        SELECT v.id, v.product_id, p.shop_id, v.sku, v.price, v.stock_level, v.is_active
        FROM product_variants v
        JOIN products p ON p.id = v.product_id
        WHERE v.id = $1
        FOR UPDATE OF v
        "#,
    )
    .bind(variant_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Product variant".to_string()))
}

async fn write_level(
    conn: &mut PgConnection,
    actor: &Actor,
    variant: &LockedVariant,
    new_level: i32,
    delta: i32,
    change: &StockChange,
) -> AppResult<()> {
    sqlx::query("UPDATE product_variants SET stock_level = $2, updated_at = NOW() WHERE id = $1")
        .bind(variant.id)
        .bind(new_level)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            event_type, product_id, variant_id, shop_id, quantity, unit_price,
            reference_type, reference_id, actor_id, note
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(change.movement.as_str())
    .bind(variant.product_id)
    .bind(variant.id)
    .bind(variant.shop_id)
    .bind(delta)
    .bind(variant.price)
    .bind(change.reference.map(|r| r.kind()))
    .bind(change.reference.map(|r| r.id()))
    .bind(actor.user_id)
    .bind(&change.note)
    .execute(&mut *conn)
    .await?;

    recompute_product(conn, variant.product_id).await?;

    tracing::debug!(
        variant_id = variant.id,
        delta,
        new_level,
        movement = change.movement.as_str(),
        "stock changed"
    );

    Ok(())
}
