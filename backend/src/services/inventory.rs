//! Inventory service for manual stock corrections and movement history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{Actor, MovementType, StockMovement, SubjectRef};
use sqlx::PgPool;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::RequestMeta;
use crate::models::{convert_rows, StockMovementRow};
use crate::services::audit::{AuditEntry, AuditLogger};
use crate::services::outbox::{self, DomainEvent};
use crate::services::stock_ledger::{self, StockChange};

/// Inventory service for stock corrections made by shop staff
#[derive(Clone)]
pub struct InventoryService {
    db: PgPool,
}

/// Input for a relative stock correction
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustStockInput {
    /// Signed change; negative removes stock
    pub delta: i32,
    #[validate(length(max = 1000, message = "Note must be at most 1000 characters"))]
    pub note: Option<String>,
}

/// Input for setting an absolute stock level
#[derive(Debug, Deserialize, Validate)]
pub struct SetStockInput {
    #[validate(range(min = 0, message = "Stock level cannot be negative"))]
    pub stock_level: i32,
    #[validate(length(max = 1000, message = "Note must be at most 1000 characters"))]
    pub note: Option<String>,
}

enum Correction {
    Delta(i32),
    Level(i32),
}

/// Variant stock after a correction
#[derive(Debug, Clone, Serialize)]
pub struct VariantStock {
    pub variant_id: i64,
    pub product_id: i64,
    pub shop_id: i64,
    pub stock_level: i32,
}

/// Flat movement record for CSV export
#[derive(Debug, Serialize)]
pub struct MovementCsvRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub event_type: &'static str,
    pub shop_id: i64,
    pub product_id: i64,
    pub variant_id: i64,
    pub quantity: i32,
    pub unit_price: String,
    pub reference_type: Option<&'static str>,
    pub reference_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub note: Option<String>,
}

impl From<&StockMovement> for MovementCsvRecord {
    fn from(m: &StockMovement) -> Self {
        Self {
            id: m.id,
            created_at: m.created_at,
            event_type: m.event_type.as_str(),
            shop_id: m.shop_id,
            product_id: m.product_id,
            variant_id: m.variant_id,
            quantity: m.quantity,
            unit_price: m.unit_price.to_string(),
            reference_type: m.reference.map(|r| r.kind()),
            reference_id: m.reference.map(|r| r.id()),
            actor_id: m.actor_id,
            note: m.note.clone(),
        }
    }
}

impl InventoryService {
    /// Create a new InventoryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Owning shop of a variant, enforcing that `actor` works for it
    async fn authorize_variant(&self, actor: &Actor, variant_id: i64) -> AppResult<i64> {
        let shop_id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT p.shop_id FROM product_variants v
            JOIN products p ON p.id = v.product_id
            WHERE v.id = $1
            "#,
        )
        .bind(variant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product variant".to_string()))?;

        if !actor.works_for(shop_id) {
            return Err(AppError::InsufficientPermissions);
        }
        Ok(shop_id)
    }

    /// Apply a manual relative correction
    pub async fn adjust(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        variant_id: i64,
        input: AdjustStockInput,
    ) -> AppResult<VariantStock> {
        input.validate()?;
        self.authorize_variant(actor, variant_id).await?;

        let change = StockChange::manual(MovementType::ManualAdjustment, input.note);
        self.apply(actor, meta, variant_id, Correction::Delta(input.delta), change)
            .await
    }

    /// Set an absolute stock level
    pub async fn set_level(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        variant_id: i64,
        input: SetStockInput,
    ) -> AppResult<VariantStock> {
        input.validate()?;
        self.authorize_variant(actor, variant_id).await?;

        let change = StockChange::manual(MovementType::ManualSet, input.note);
        self.apply(actor, meta, variant_id, Correction::Level(input.stock_level), change)
            .await
    }

    async fn apply(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        variant_id: i64,
        correction: Correction,
        change: StockChange,
    ) -> AppResult<VariantStock> {
        let mut tx = self.db.begin().await?;

        let before = stock_ledger::lock_variants(&mut *tx, &[variant_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Product variant".to_string()))?;

        let stock_level = match correction {
            Correction::Delta(delta) => {
                stock_ledger::adjust_stock(&mut *tx, actor, variant_id, delta, &change).await?
            }
            Correction::Level(level) => {
                stock_ledger::set_stock(&mut *tx, actor, variant_id, level, &change).await?
            }
        };

        AuditLogger::log(
            &mut *tx,
            actor,
            meta,
            AuditEntry::new("inventory.stock_corrected", SubjectRef::Variant(variant_id))
                .old_values(json!({ "stock_level": before.stock_level }))
                .new_values(json!({ "stock_level": stock_level }))
                .metadata(json!({ "movement": change.movement.as_str(), "note": change.note })),
        )
        .await?;

        outbox::enqueue(
            &mut *tx,
            DomainEvent::new(
                "stock.corrected",
                SubjectRef::Variant(variant_id),
                json!({ "shop_id": before.shop_id, "from": before.stock_level, "to": stock_level }),
            ),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            variant_id,
            from = before.stock_level,
            to = stock_level,
            "Manual stock correction by user {}",
            actor.user_id
        );

        Ok(VariantStock {
            variant_id,
            product_id: before.product_id,
            shop_id: before.shop_id,
            stock_level,
        })
    }

    /// Movement history of a variant, oldest first
    pub async fn movements(&self, actor: &Actor, variant_id: i64) -> AppResult<Vec<StockMovement>> {
        self.authorize_variant(actor, variant_id).await?;

        let rows = sqlx::query_as::<_, StockMovementRow>(
            r#"
            SELECT id, event_type, product_id, variant_id, shop_id, quantity, unit_price,
                   reference_type, reference_id, actor_id, note, created_at
            FROM stock_movements
            WHERE variant_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(variant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(convert_rows(rows)?)
    }

    /// Export movements as CSV
    pub fn export_to_csv(movements: &[StockMovement]) -> AppResult<String> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for movement in movements {
            wtr.serialize(MovementCsvRecord::from(movement))
                .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_csv_flattens_reference() {
        let movement = StockMovement {
            id: 1,
            event_type: MovementType::TransferOut,
            product_id: 2,
            variant_id: 3,
            shop_id: 4,
            quantity: -5,
            unit_price: Decimal::new(1050, 2),
            reference: Some(SubjectRef::Transfer(9)),
            actor_id: Some(7),
            note: None,
            created_at: Utc::now(),
        };
        let csv = InventoryService::export_to_csv(&[movement]).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("id,created_at,event_type"));
        let row = lines.next().unwrap();
        assert!(row.contains("transfer_out"));
        assert!(row.contains(",-5,10.50,transfer,9,7,"));
    }

    #[test]
    fn test_set_input_rejects_negative() {
        let input = SetStockInput {
            stock_level: -1,
            note: None,
        };
        assert!(input.validate().is_err());
    }
}
