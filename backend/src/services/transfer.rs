//! Inter-shop stock transfers and the share permissions that gate them
//!
//! A transfer moves stock from a variant in one shop to the matching variant
//! in another, creating a shadow product and variant in the destination the
//! first time. Everything happens in one transaction: if any step fails the
//! shadow rows, stock changes and transfer record are all rolled back.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use shared::{
    shadow_product_sku, timestamped_sku, Actor, MovementType, Role, ShopStockShare, StockTransfer,
    SubjectRef, TransferStatus,
};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::RequestMeta;
use crate::models::{convert_rows, ShopStockShareRow, StockTransferRow};
use crate::services::audit::{AuditEntry, AuditLogger};
use crate::services::outbox::{self, DomainEvent};
use crate::services::stock_ledger::{self, StockChange};

const TRANSFER_COLUMNS: &str = "id, source_variant_id, destination_variant_id, from_shop_id, \
     to_shop_id, quantity, initiated_by, status, note, created_at";

/// Transfer service
#[derive(Clone)]
pub struct TransferService {
    db: PgPool,
}

/// Input for a transfer request
#[derive(Debug, Deserialize, Validate)]
pub struct TransferInput {
    pub source_variant_id: i64,
    pub to_shop_id: i64,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(length(max = 1000, message = "Note must be at most 1000 characters"))]
    pub note: Option<String>,
}

/// Input for enabling or disabling a share
#[derive(Debug, Deserialize)]
pub struct SetShareInput {
    pub from_shop_id: i64,
    pub to_shop_id: i64,
    pub is_enabled: bool,
}

/// Source variant joined with everything needed to build its shadow
#[derive(Debug, FromRow)]
struct SourceRow {
    variant_id: i64,
    variant_sku: String,
    variant_name: Option<String>,
    attributes: serde_json::Value,
    variant_price: rust_decimal::Decimal,
    variant_active: bool,
    stock_level: i32,
    product_id: i64,
    shop_id: i64,
    product_name: String,
    brand_id: Option<i64>,
    category_id: Option<i64>,
    product_sku: String,
    description: Option<String>,
    image_path: Option<String>,
    product_active: bool,
}

impl TransferService {
    /// Create a new TransferService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Move `quantity` units of a variant to another shop
    pub async fn transfer(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        input: TransferInput,
    ) -> AppResult<StockTransfer> {
        input.validate()?;

        let source = self.load_source(input.source_variant_id).await?;

        if !actor.is_elevated() && !actor.works_for(source.shop_id) {
            return Err(AppError::InsufficientPermissions);
        }

        if input.to_shop_id == source.shop_id {
            return Err(AppError::InvalidDestination(
                "destination shop must differ from the source shop".to_string(),
            ));
        }

        let destination_exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM shops WHERE id = $1)")
                .bind(input.to_shop_id)
                .fetch_one(&self.db)
                .await?;
        if !destination_exists {
            return Err(AppError::InvalidDestination(format!(
                "shop {} does not exist",
                input.to_shop_id
            )));
        }

        if !actor.is_elevated() && !self.share_enabled(source.shop_id, input.to_shop_id).await? {
            self.record_blocked(actor, meta, &source, &input).await?;
            return Err(AppError::SharingDisabled {
                from_shop_id: source.shop_id,
                to_shop_id: input.to_shop_id,
            });
        }

        // Cheap early exit; the authoritative check runs under the lock
        if source.stock_level < input.quantity {
            return Err(insufficient(&source, input.quantity, source.stock_level));
        }

        let mut tx = self.db.begin().await?;

        let destination_variant_id = resolve_destination(&mut *tx, &source, input.to_shop_id).await?;

        let locked =
            stock_ledger::lock_variants(&mut *tx, &[source.variant_id, destination_variant_id]).await?;
        let available = locked
            .iter()
            .find(|v| v.id == source.variant_id)
            .map(|v| v.stock_level)
            .ok_or_else(|| AppError::NotFound("Product variant".to_string()))?;
        if available < input.quantity {
            return Err(insufficient(&source, input.quantity, available));
        }

        let row = sqlx::query_as::<_, StockTransferRow>(&format!(
            r#"
            INSERT INTO stock_transfers (
                source_variant_id, destination_variant_id, from_shop_id, to_shop_id,
                quantity, initiated_by, status, note
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(source.variant_id)
        .bind(destination_variant_id)
        .bind(source.shop_id)
        .bind(input.to_shop_id)
        .bind(input.quantity)
        .bind(actor.user_id)
        .bind(TransferStatus::Completed.as_str())
        .bind(&input.note)
        .fetch_one(&mut *tx)
        .await?;
        let transfer = StockTransfer::try_from(row)?;
        let reference = SubjectRef::Transfer(transfer.id);

        stock_ledger::adjust_stock(
            &mut *tx,
            actor,
            source.variant_id,
            -input.quantity,
            &StockChange::new(MovementType::TransferOut, reference),
        )
        .await?;
        stock_ledger::adjust_stock(
            &mut *tx,
            actor,
            destination_variant_id,
            input.quantity,
            &StockChange::new(MovementType::TransferIn, reference),
        )
        .await?;

        AuditLogger::log(
            &mut *tx,
            actor,
            meta,
            AuditEntry::new("inventory.transfer.completed", reference).new_values(json!({
                "source_variant_id": source.variant_id,
                "destination_variant_id": destination_variant_id,
                "from_shop_id": source.shop_id,
                "to_shop_id": input.to_shop_id,
                "quantity": input.quantity,
            })),
        )
        .await?;

        outbox::enqueue(
            &mut *tx,
            DomainEvent::new(
                "stock.transferred",
                reference,
                json!({
                    "from_shop_id": source.shop_id,
                    "to_shop_id": input.to_shop_id,
                    "quantity": input.quantity,
                }),
            ),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            transfer_id = transfer.id,
            from_shop = source.shop_id,
            to_shop = input.to_shop_id,
            quantity = input.quantity,
            "Stock transferred"
        );

        Ok(transfer)
    }

    async fn load_source(&self, variant_id: i64) -> AppResult<SourceRow> {
        sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT v.id AS variant_id, v.sku AS variant_sku, v.name AS variant_name, v.attributes,
                   v.price AS variant_price, v.is_active AS variant_active, v.stock_level,
                   p.id AS product_id, p.shop_id, p.name AS product_name, p.brand_id, p.category_id,
                   p.sku AS product_sku, p.description, p.image_path, p.is_active AS product_active
            FROM product_variants v
            JOIN products p ON p.id = v.product_id
            WHERE v.id = $1
            "#,
        )
        .bind(variant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product variant".to_string()))
    }

    async fn share_enabled(&self, from_shop_id: i64, to_shop_id: i64) -> AppResult<bool> {
        let enabled = sqlx::query_scalar::<_, bool>(
            "SELECT is_enabled FROM shop_stock_shares WHERE from_shop_id = $1 AND to_shop_id = $2",
        )
        .bind(from_shop_id)
        .bind(to_shop_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(enabled.unwrap_or(false))
    }

    /// Persist the refused attempt in its own transaction so the record
    /// survives the error returned to the caller
    async fn record_blocked(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        source: &SourceRow,
        input: &TransferInput,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO stock_transfers (
                source_variant_id, from_shop_id, to_shop_id, quantity, initiated_by, status, note
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(source.variant_id)
        .bind(source.shop_id)
        .bind(input.to_shop_id)
        .bind(input.quantity)
        .bind(actor.user_id)
        .bind(TransferStatus::Blocked.as_str())
        .bind(&input.note)
        .fetch_one(&mut *tx)
        .await?;

        AuditLogger::log(
            &mut *tx,
            actor,
            meta,
            AuditEntry::new("inventory.transfer.blocked", SubjectRef::Transfer(id)).metadata(json!({
                "from_shop_id": source.shop_id,
                "to_shop_id": input.to_shop_id,
                "quantity": input.quantity,
                "reason": "sharing_disabled",
            })),
        )
        .await?;

        tx.commit().await?;

        tracing::warn!(
            transfer_id = id,
            from_shop = source.shop_id,
            to_shop = input.to_shop_id,
            "Transfer blocked: sharing disabled"
        );

        Ok(())
    }

    /// Enable or disable stock sharing from one shop to another
    pub async fn set_share(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        input: SetShareInput,
    ) -> AppResult<ShopStockShare> {
        let may_manage = actor.is_elevated()
            || (actor.has_role(Role::Manager) && actor.shop_id == Some(input.from_shop_id));
        if !may_manage {
            return Err(AppError::InsufficientPermissions);
        }
        if input.from_shop_id == input.to_shop_id {
            return Err(AppError::InvalidDestination(
                "a shop cannot share stock with itself".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;

        let previous = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT is_enabled FROM shop_stock_shares
            WHERE from_shop_id = $1 AND to_shop_id = $2
            FOR UPDATE
            "#,
        )
        .bind(input.from_shop_id)
        .bind(input.to_shop_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, ShopStockShareRow>(
            r#"
            INSERT INTO shop_stock_shares (from_shop_id, to_shop_id, is_enabled)
            VALUES ($1, $2, $3)
            ON CONFLICT (from_shop_id, to_shop_id)
            DO UPDATE SET is_enabled = EXCLUDED.is_enabled, updated_at = NOW()
            RETURNING id, from_shop_id, to_shop_id, is_enabled, created_at, updated_at
            "#,
        )
        .bind(input.from_shop_id)
        .bind(input.to_shop_id)
        .bind(input.is_enabled)
        .fetch_one(&mut *tx)
        .await?;

        AuditLogger::log(
            &mut *tx,
            actor,
            meta,
            AuditEntry::new("inventory.share.updated", SubjectRef::ShopStockShare(row.id))
                .old_values(json!({ "is_enabled": previous }))
                .new_values(json!({ "is_enabled": input.is_enabled })),
        )
        .await?;

        tx.commit().await?;

        Ok(row.into())
    }

    /// Shares involving the actor's shop, or all shares for admins
    pub async fn list_shares(&self, actor: &Actor) -> AppResult<Vec<ShopStockShare>> {
        let rows = sqlx::query_as::<_, ShopStockShareRow>(
            r#"
            SELECT id, from_shop_id, to_shop_id, is_enabled, created_at, updated_at
            FROM shop_stock_shares
            WHERE $1 OR from_shop_id = $2 OR to_shop_id = $2
            ORDER BY from_shop_id, to_shop_id
            "#,
        )
        .bind(actor.is_elevated())
        .bind(actor.shop_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Transfers into or out of a shop, newest first
    pub async fn list_transfers(&self, actor: &Actor, shop_id: Option<i64>) -> AppResult<Vec<StockTransfer>> {
        let shop_id = match shop_id.or(actor.shop_id) {
            Some(id) => id,
            None => {
                return Err(AppError::validation(
                    "shop_id",
                    "shop_id is required",
                    "ต้องระบุร้านค้า",
                ))
            }
        };
        if !actor.works_for(shop_id) {
            return Err(AppError::InsufficientPermissions);
        }

        let rows = sqlx::query_as::<_, StockTransferRow>(&format!(
            r#"
            SELECT {}
            FROM stock_transfers
            WHERE from_shop_id = $1 OR to_shop_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(shop_id)
        .fetch_all(&self.db)
        .await?;

        Ok(convert_rows(rows)?)
    }
}

fn insufficient(source: &SourceRow, requested: i32, available: i32) -> AppError {
    AppError::InsufficientStock(format!(
        "variant {} has {} in stock, {} requested",
        source.variant_id, available, requested
    ))
}

/// Find or create the destination product and variant matching `source`.
///
/// Serialised per destination shop with an advisory lock so two concurrent
/// first transfers cannot both create a shadow product.
async fn resolve_destination(conn: &mut PgConnection, source: &SourceRow, to_shop_id: i64) -> AppResult<i64> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("shadow-product:{}", to_shop_id))
        .execute(&mut *conn)
        .await?;

    let existing_product = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM products
        WHERE shop_id = $1
          AND name = $2
          AND brand_id IS NOT DISTINCT FROM $3
          AND category_id IS NOT DISTINCT FROM $4
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(to_shop_id)
    .bind(&source.product_name)
    .bind(source.brand_id)
    .bind(source.category_id)
    .fetch_optional(&mut *conn)
    .await?;

    let product_id = match existing_product {
        Some(id) => id,
        None => create_shadow_product(conn, source, to_shop_id).await?,
    };

    let existing_variant = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM product_variants WHERE product_id = $1 AND sku = $2",
    )
    .bind(product_id)
    .bind(&source.variant_sku)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = existing_variant {
        return Ok(id);
    }

    let variant_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO product_variants (product_id, sku, name, attributes, price, stock_level, is_active)
        VALUES ($1, $2, $3, $4, $5, 0, $6)
        RETURNING id
        "#,
    )
    .bind(product_id)
    .bind(&source.variant_sku)
    .bind(&source.variant_name)
    .bind(&source.attributes)
    .bind(source.variant_price)
    .bind(source.variant_active)
    .fetch_one(&mut *conn)
    .await?;

    // Derived fields are recomputed when the transfer-in is applied

    tracing::debug!(variant_id, product_id, to_shop_id, "Created shadow variant");

    Ok(variant_id)
}

async fn create_shadow_product(conn: &mut PgConnection, source: &SourceRow, to_shop_id: i64) -> AppResult<i64> {
    let mut sku = shadow_product_sku(&source.product_sku, to_shop_id);
    let taken = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM products WHERE sku = $1)")
        .bind(&sku)
        .fetch_one(&mut *conn)
        .await?;
    if taken {
        sku = timestamped_sku(&sku, Utc::now());
    }

    let product_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO products (
            shop_id, name, brand_id, category_id, sku, description, image_path,
            price, stock_level, is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9)
        RETURNING id
        "#,
    )
    .bind(to_shop_id)
    .bind(&source.product_name)
    .bind(source.brand_id)
    .bind(source.category_id)
    .bind(&sku)
    .bind(&source.description)
    .bind(&source.image_path)
    .bind(source.variant_price)
    .bind(source.product_active)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(product_id, to_shop_id, sku = %sku, "Created shadow product");

    Ok(product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_input_requires_positive_quantity() {
        let input = TransferInput {
            source_variant_id: 1,
            to_shop_id: 2,
            quantity: 0,
            note: None,
        };
        assert!(input.validate().is_err());

        let input = TransferInput { quantity: 3, ..input };
        assert!(input.validate().is_ok());
    }
}
