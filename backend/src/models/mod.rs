//! Database models for the Multi-Shop Commerce Platform
//!
//! Re-exports models from the shared crate and adds the row types that map
//! text status columns back onto the shared enums

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

pub use shared::models::*;
use shared::{GpsCoordinates, SubjectRef, UnknownVariant};

fn subject(kind: Option<String>, id: Option<i64>) -> Result<Option<SubjectRef>, UnknownVariant> {
    match (kind, id) {
        (Some(kind), Some(id)) => SubjectRef::from_parts(&kind, id)
            .map(Some)
            .ok_or(UnknownVariant(kind)),
        _ => Ok(None),
    }
}

#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub shop_id: i64,
    pub user_id: i64,
    pub customer_id: Option<i64>,
    pub invoice_no: String,
    pub receipt_no: String,
    pub job_no: String,
    pub status: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total_amount: Decimal,
    pub phone: String,
    pub address: String,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub idempotency_key: Option<String>,
    pub cancel_reason: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub return_requested_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`OrderRow`]
pub const ORDER_COLUMNS: &str = "id, shop_id, user_id, customer_id, invoice_no, receipt_no, job_no, \
     status, subtotal, discount_total, total_amount, phone, address, latitude, longitude, \
     idempotency_key, cancel_reason, shipped_at, delivered_at, cancelled_at, \
     refund_requested_at, refunded_at, return_requested_at, returned_at, created_at, updated_at";

impl TryFrom<OrderRow> for Order {
    type Error = UnknownVariant;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let coordinates = match (row.latitude, row.longitude) {
            (Some(lat), Some(lng)) => Some(GpsCoordinates::new(lat, lng)),
            _ => None,
        };
        Ok(Order {
            id: row.id,
            shop_id: row.shop_id,
            user_id: row.user_id,
            customer_id: row.customer_id,
            invoice_no: row.invoice_no,
            receipt_no: row.receipt_no,
            job_no: row.job_no,
            status: row.status.parse()?,
            subtotal: row.subtotal,
            discount_total: row.discount_total,
            total_amount: row.total_amount,
            phone: row.phone,
            address: row.address,
            coordinates,
            idempotency_key: row.idempotency_key,
            cancel_reason: row.cancel_reason,
            shipped_at: row.shipped_at,
            delivered_at: row.delivered_at,
            cancelled_at: row.cancelled_at,
            refund_requested_at: row.refund_requested_at,
            refunded_at: row.refunded_at,
            return_requested_at: row.return_requested_at,
            returned_at: row.returned_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct OrderItemRow {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub variant_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            line_total: row.line_total,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct StockMovementRow {
    pub id: i64,
    pub event_type: String,
    pub product_id: i64,
    pub variant_id: i64,
    pub shop_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StockMovementRow> for StockMovement {
    type Error = UnknownVariant;

    fn try_from(row: StockMovementRow) -> Result<Self, Self::Error> {
        Ok(StockMovement {
            id: row.id,
            event_type: row.event_type.parse()?,
            product_id: row.product_id,
            variant_id: row.variant_id,
            shop_id: row.shop_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            reference: subject(row.reference_type, row.reference_id)?,
            actor_id: row.actor_id,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ShopStockShareRow {
    pub id: i64,
    pub from_shop_id: i64,
    pub to_shop_id: i64,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ShopStockShareRow> for ShopStockShare {
    fn from(row: ShopStockShareRow) -> Self {
        ShopStockShare {
            id: row.id,
            from_shop_id: row.from_shop_id,
            to_shop_id: row.to_shop_id,
            is_enabled: row.is_enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct StockTransferRow {
    pub id: i64,
    pub source_variant_id: i64,
    pub destination_variant_id: Option<i64>,
    pub from_shop_id: i64,
    pub to_shop_id: i64,
    pub quantity: i32,
    pub initiated_by: i64,
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StockTransferRow> for StockTransfer {
    type Error = UnknownVariant;

    fn try_from(row: StockTransferRow) -> Result<Self, Self::Error> {
        Ok(StockTransfer {
            id: row.id,
            source_variant_id: row.source_variant_id,
            destination_variant_id: row.destination_variant_id,
            from_shop_id: row.from_shop_id,
            to_shop_id: row.to_shop_id,
            quantity: row.quantity,
            initiated_by: row.initiated_by,
            status: row.status.parse()?,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ApprovalRequestRow {
    pub id: i64,
    pub order_id: i64,
    pub request_type: String,
    pub status: String,
    pub requested_by: i64,
    pub approved_by: Option<i64>,
    pub decided_at: Option<DateTime<Utc>>,
    pub amount: Option<Decimal>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ApprovalRequestRow> for ApprovalRequest {
    type Error = UnknownVariant;

    fn try_from(row: ApprovalRequestRow) -> Result<Self, Self::Error> {
        Ok(ApprovalRequest {
            id: row.id,
            order_id: row.order_id,
            request_type: row.request_type.parse()?,
            status: row.status.parse()?,
            requested_by: row.requested_by,
            approved_by: row.approved_by,
            decided_at: row.decided_at,
            amount: row.amount,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct FinancialAdjustmentRow {
    pub id: i64,
    pub order_id: i64,
    pub adjustment_type: String,
    pub amount: Decimal,
    pub reason: String,
    pub created_by: i64,
    pub approval_request_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FinancialAdjustmentRow> for FinancialAdjustment {
    type Error = UnknownVariant;

    fn try_from(row: FinancialAdjustmentRow) -> Result<Self, Self::Error> {
        Ok(FinancialAdjustment {
            id: row.id,
            order_id: row.order_id,
            adjustment_type: row.adjustment_type.parse()?,
            amount: row.amount,
            reason: row.reason,
            created_by: row.created_by,
            approval_request_id: row.approval_request_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PaymentRow {
    pub id: i64,
    pub order_id: i64,
    pub event_type: String,
    pub amount: Decimal,
    pub status: String,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub slip_path: Option<String>,
    pub actor_id: i64,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub financial_adjustment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = UnknownVariant;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            event_type: row.event_type.parse()?,
            amount: row.amount,
            status: row.status.parse()?,
            reference: row.reference,
            note: row.note,
            slip_path: row.slip_path,
            actor_id: row.actor_id,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            financial_adjustment_id: row.financial_adjustment_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct AuditLogRow {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub event: String,
    pub subject_type: Option<String>,
    pub subject_id: Option<i64>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditLogRow> for AuditLog {
    type Error = UnknownVariant;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        Ok(AuditLog {
            id: row.id,
            actor_id: row.actor_id,
            event: row.event,
            subject: subject(row.subject_type, row.subject_id)?,
            old_values: row.old_values,
            new_values: row.new_values,
            metadata: row.metadata,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
        })
    }
}

/// Convert a batch of rows, failing on the first unknown stored value
pub fn convert_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>, UnknownVariant>
where
    T: TryFrom<R, Error = UnknownVariant>,
{
    rows.into_iter().map(T::try_from).collect()
}
