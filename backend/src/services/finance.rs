//! Financial governance: approval requests, adjustments and the payment
//! ledger
//!
//! Payments and adjustments are append-only. A correction is always a new
//! row; the database rejects UPDATE and DELETE on both tables.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{
    authorize_adjustment, can_view_order, net_paid, validate_positive_amount, validate_reason,
    Actor, AdjustmentType, ApprovalRequest, ApprovalStatus, ApprovalType, FinancialAdjustment,
    GateError, Payment, PaymentEventType, SubjectRef,
};
use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::RequestMeta;
use crate::models::{convert_rows, ApprovalRequestRow, FinancialAdjustmentRow, PaymentRow};
use crate::services::audit::{AuditEntry, AuditLogger};
use crate::services::order::share_order;
use crate::services::outbox::{self, DomainEvent};

const APPROVAL_COLUMNS: &str = "id, order_id, request_type, status, requested_by, approved_by, \
     decided_at, amount, reason, created_at";

const PAYMENT_COLUMNS: &str = "id, order_id, event_type, amount, status, reference, note, \
     slip_path, actor_id, approved_by, approved_at, financial_adjustment_id, created_at";

/// Finance service
#[derive(Clone)]
pub struct FinanceService {
    db: PgPool,
}

/// Input for opening an approval request
#[derive(Debug, Deserialize, Validate)]
pub struct RequestApprovalInput {
    pub request_type: ApprovalType,
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 1000, message = "Reason is required"))]
    pub reason: String,
}

/// Input for deciding an approval request
#[derive(Debug, Default, Deserialize, Validate)]
pub struct DecideApprovalInput {
    #[validate(length(max = 1000, message = "Note must be at most 1000 characters"))]
    pub note: Option<String>,
}

/// Input for a financial adjustment
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAdjustmentInput {
    pub adjustment_type: AdjustmentType,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 1000, message = "Reason is required"))]
    pub reason: String,
    pub approval_request_id: Option<i64>,
}

/// Input for a payment ledger event
#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentInput {
    pub event_type: PaymentEventType,
    pub amount: Decimal,
    #[validate(length(max = 255, message = "Reference must be at most 255 characters"))]
    pub reference: Option<String>,
    #[validate(length(max = 1000, message = "Note must be at most 1000 characters"))]
    pub note: Option<String>,
    /// Path of an already uploaded payment slip
    #[validate(length(max = 500, message = "Slip path must be at most 500 characters"))]
    pub slip_path: Option<String>,
}

/// A new approval request row
pub struct NewApproval<'a> {
    pub order_id: i64,
    pub request_type: ApprovalType,
    pub amount: Option<Decimal>,
    pub reason: &'a str,
}

/// Adjustment together with its mirrored payment row
#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentRecord {
    pub adjustment: FinancialAdjustment,
    pub payment: Payment,
}

/// Payment ledger of one order with its running balance
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSummary {
    pub order_id: i64,
    pub total_amount: Decimal,
    pub net_paid: Decimal,
    pub balance_due: Decimal,
    pub payments: Vec<Payment>,
}

/// Load an approval request; callers inside a transaction pass its connection
pub(crate) async fn load_approval(conn: &mut PgConnection, request_id: i64) -> AppResult<ApprovalRequest> {
    let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
        "SELECT {} FROM approval_requests WHERE id = $1",
        APPROVAL_COLUMNS
    ))
    .bind(request_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Approval request".to_string()))?;

    Ok(ApprovalRequest::try_from(row)?)
}

/// Insert a pending approval request with its audit row and event
pub(crate) async fn insert_approval(
    conn: &mut PgConnection,
    actor: &Actor,
    meta: &RequestMeta,
    new: NewApproval<'_>,
) -> AppResult<ApprovalRequest> {
    let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
        r#"
        INSERT INTO approval_requests (order_id, request_type, status, requested_by, amount, reason)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        APPROVAL_COLUMNS
    ))
    .bind(new.order_id)
    .bind(new.request_type.as_str())
    .bind(ApprovalStatus::Pending.as_str())
    .bind(actor.user_id)
    .bind(new.amount)
    .bind(new.reason)
    .fetch_one(&mut *conn)
    .await?;
    let request = ApprovalRequest::try_from(row)?;

    AuditLogger::log(
        conn,
        actor,
        meta,
        AuditEntry::new("approval.requested", SubjectRef::ApprovalRequest(request.id)).new_values(json!({
            "order_id": request.order_id,
            "request_type": request.request_type,
            "amount": request.amount,
            "reason": request.reason,
        })),
    )
    .await?;

    outbox::enqueue(
        conn,
        DomainEvent::new(
            "approval.requested",
            SubjectRef::ApprovalRequest(request.id),
            json!({ "order_id": request.order_id, "request_type": request.request_type }),
        ),
    )
    .await?;

    Ok(request)
}

fn check_amount(field: &str, amount: Decimal) -> AppResult<()> {
    validate_positive_amount(amount).map_err(|m| AppError::Validation {
        field: field.to_string(),
        message: m.to_string(),
        message_th: "จำนวนเงินไม่ถูกต้อง".to_string(),
    })
}

impl FinanceService {
    /// Create a new FinanceService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Open a pending discount or refund request on an order
    pub async fn request_approval(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        order_id: i64,
        input: RequestApprovalInput,
    ) -> AppResult<ApprovalRequest> {
        input.validate()?;
        validate_reason(&input.reason).map_err(|m| AppError::validation("reason", m, "ต้องระบุเหตุผล"))?;
        if let Some(amount) = input.amount {
            check_amount("amount", amount)?;
        }

        let mut tx = self.db.begin().await?;
        let order = share_order(&mut *tx, order_id).await?;
        if !can_view_order(actor, order.user_id, order.shop_id) {
            return Err(AppError::InsufficientPermissions);
        }

        let request = insert_approval(
            &mut *tx,
            actor,
            meta,
            NewApproval {
                order_id,
                request_type: input.request_type,
                amount: input.amount,
                reason: input.reason.trim(),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            approval_request_id = request.id,
            order_id,
            request_type = request.request_type.as_str(),
            "Approval requested by user {}",
            actor.user_id
        );

        Ok(request)
    }

    /// Approve or reject a pending request. Decisions are final.
    pub async fn decide_approval(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        request_id: i64,
        approve: bool,
        input: DecideApprovalInput,
    ) -> AppResult<ApprovalRequest> {
        input.validate()?;
        if !actor.is_finance_capable() {
            return Err(AppError::InsufficientPermissions);
        }

        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            "SELECT {} FROM approval_requests WHERE id = $1 FOR UPDATE",
            APPROVAL_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Approval request".to_string()))?;
        let current = ApprovalRequest::try_from(row)?;

        let next = current.status.decide(approve).ok_or_else(|| {
            AppError::InvalidStateTransition(format!(
                "approval request {} is already {}",
                current.id,
                current.status.as_str()
            ))
        })?;

        let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            r#"
            UPDATE approval_requests
            SET status = $2, approved_by = $3, decided_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            APPROVAL_COLUMNS
        ))
        .bind(request_id)
        .bind(next.as_str())
        .bind(actor.user_id)
        .fetch_one(&mut *tx)
        .await?;
        let decided = ApprovalRequest::try_from(row)?;

        AuditLogger::log(
            &mut *tx,
            actor,
            meta,
            AuditEntry::new("approval.decided", SubjectRef::ApprovalRequest(request_id))
                .old_values(json!({ "status": current.status }))
                .new_values(json!({ "status": decided.status, "approved_by": actor.user_id }))
                .metadata(json!({ "note": input.note })),
        )
        .await?;

        outbox::enqueue(
            &mut *tx,
            DomainEvent::new(
                "approval.decided",
                SubjectRef::ApprovalRequest(request_id),
                json!({ "order_id": decided.order_id, "status": decided.status }),
            ),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            approval_request_id = request_id,
            status = decided.status.as_str(),
            "Approval decided by user {}",
            actor.user_id
        );

        Ok(decided)
    }

    /// Write an adjustment and its mirrored payment row together
    pub async fn create_adjustment(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        order_id: i64,
        input: CreateAdjustmentInput,
    ) -> AppResult<AdjustmentRecord> {
        input.validate()?;
        validate_reason(&input.reason).map_err(|m| AppError::validation("reason", m, "ต้องระบุเหตุผล"))?;
        check_amount("amount", input.amount)?;

        let mut tx = self.db.begin().await?;
        let order = share_order(&mut *tx, order_id).await?;
        if !actor.works_for(order.shop_id) && !actor.is_finance_capable() {
            return Err(AppError::InsufficientPermissions);
        }

        let approval = match input.approval_request_id {
            Some(id) => Some(load_approval(&mut *tx, id).await.map_err(|e| match e {
                AppError::NotFound(_) => {
                    AppError::ApprovalNotSatisfied(format!("approval request {} does not exist", id))
                }
                other => other,
            })?),
            None => None,
        };

        authorize_adjustment(actor, order_id, approval.as_ref()).map_err(|e| match e {
            GateError::ApprovalRequired => AppError::ApprovalNotSatisfied(match approval {
                Some(ref request) => format!(
                    "approval request {} is not an approved request for order {}",
                    request.id, order_id
                ),
                None => "an approved request for this order is required".to_string(),
            }),
            GateError::Forbidden => AppError::InsufficientPermissions,
        })?;

        if let Some(request) = &approval {
            // Serialise adjustments drawing on the same approval
            sqlx::query("SELECT id FROM approval_requests WHERE id = $1 FOR UPDATE")
                .bind(request.id)
                .execute(&mut *tx)
                .await?;
            let used = sqlx::query_scalar::<_, Decimal>(
                "SELECT COALESCE(SUM(amount), 0) FROM financial_adjustments WHERE approval_request_id = $1",
            )
            .bind(request.id)
            .fetch_one(&mut *tx)
            .await?;

            if !request.covers(input.amount, used) {
                return Err(AppError::ApprovalNotSatisfied(format!(
                    "approval request {} allows {}, {} already adjusted",
                    request.id,
                    request.amount.unwrap_or_default(),
                    used
                )));
            }
        }

        let row = sqlx::query_as::<_, FinancialAdjustmentRow>(
            r#"
            INSERT INTO financial_adjustments (
                order_id, adjustment_type, amount, reason, created_by, approval_request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, order_id, adjustment_type, amount, reason, created_by,
                      approval_request_id, created_at
            "#,
        )
        .bind(order_id)
        .bind(input.adjustment_type.as_str())
        .bind(input.amount)
        .bind(input.reason.trim())
        .bind(actor.user_id)
        .bind(input.approval_request_id)
        .fetch_one(&mut *tx)
        .await?;
        let adjustment = FinancialAdjustment::try_from(row)?;

        let event = PaymentEventType::Adjustment;
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments (
                order_id, event_type, amount, status, note, actor_id, approved_by, approved_at,
                financial_adjustment_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .bind(event.as_str())
        .bind(input.adjustment_type.mirrored_payment_amount(input.amount))
        .bind(event.resulting_status().as_str())
        .bind(&adjustment.reason)
        .bind(actor.user_id)
        .bind(approval.as_ref().and_then(|a| a.approved_by))
        .bind(approval.as_ref().and_then(|a| a.decided_at))
        .bind(adjustment.id)
        .fetch_one(&mut *tx)
        .await?;
        let payment = Payment::try_from(row)?;

        AuditLogger::log(
            &mut *tx,
            actor,
            meta,
            AuditEntry::new("finance.adjustment.created", SubjectRef::Adjustment(adjustment.id))
                .new_values(json!({
                    "order_id": order_id,
                    "adjustment_type": adjustment.adjustment_type,
                    "amount": adjustment.amount,
                    "payment_id": payment.id,
                    "payment_amount": payment.amount,
                }))
                .metadata(json!({ "approval_request_id": input.approval_request_id })),
        )
        .await?;

        outbox::enqueue(
            &mut *tx,
            DomainEvent::new(
                "finance.adjustment.created",
                SubjectRef::Adjustment(adjustment.id),
                json!({ "order_id": order_id, "amount": payment.amount }),
            ),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            adjustment_id = adjustment.id,
            order_id,
            amount = %payment.amount,
            "Financial adjustment created by user {}",
            actor.user_id
        );

        Ok(AdjustmentRecord { adjustment, payment })
    }

    /// Append one payment ledger row
    pub async fn record_payment_event(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        order_id: i64,
        input: RecordPaymentInput,
    ) -> AppResult<Payment> {
        input.validate()?;

        let event = input.event_type;
        if event == PaymentEventType::Adjustment {
            return Err(AppError::validation(
                "event_type",
                "Adjustments are recorded through the adjustments endpoint",
                "การปรับยอดต้องทำผ่านเมนูปรับยอดเท่านั้น",
            ));
        }
        if !(event.allows_zero_amount() && input.amount.is_zero()) {
            check_amount("amount", input.amount)?;
        }

        let mut tx = self.db.begin().await?;
        let order = share_order(&mut *tx, order_id).await?;

        let permitted = if event.requires_finance() {
            actor.is_finance_capable()
        } else {
            actor.user_id == order.user_id || actor.works_for(order.shop_id)
        };
        if !permitted {
            return Err(AppError::InsufficientPermissions);
        }

        let verified_at: Option<DateTime<Utc>> = matches!(event, PaymentEventType::Verify | PaymentEventType::Reject)
            .then(Utc::now);
        let approved_by = verified_at.map(|_| actor.user_id);

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments (
                order_id, event_type, amount, status, reference, note, slip_path, actor_id,
                approved_by, approved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .bind(event.as_str())
        .bind(event.signed_amount(input.amount))
        .bind(event.resulting_status().as_str())
        .bind(&input.reference)
        .bind(&input.note)
        .bind(&input.slip_path)
        .bind(actor.user_id)
        .bind(approved_by)
        .bind(verified_at)
        .fetch_one(&mut *tx)
        .await?;
        let payment = Payment::try_from(row)?;

        AuditLogger::log(
            &mut *tx,
            actor,
            meta,
            AuditEntry::new("finance.payment.recorded", SubjectRef::Payment(payment.id)).new_values(json!({
                "order_id": order_id,
                "event_type": payment.event_type,
                "amount": payment.amount,
                "status": payment.status,
                "reference": payment.reference,
            })),
        )
        .await?;

        outbox::enqueue(
            &mut *tx,
            DomainEvent::new(
                "finance.payment.recorded",
                SubjectRef::Payment(payment.id),
                json!({ "order_id": order_id, "event_type": payment.event_type, "amount": payment.amount }),
            ),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = payment.id,
            order_id,
            event_type = event.as_str(),
            amount = %payment.amount,
            "Payment event recorded by user {}",
            actor.user_id
        );

        Ok(payment)
    }

    /// Payment rows of an order with the net paid balance
    pub async fn list_payments(&self, actor: &Actor, order_id: i64) -> AppResult<PaymentSummary> {
        let (user_id, shop_id, total_amount) = sqlx::query_as::<_, (i64, i64, Decimal)>(
            "SELECT user_id, shop_id, total_amount FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        if !can_view_order(actor, user_id, shop_id) {
            return Err(AppError::InsufficientPermissions);
        }

        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at, id",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;
        let payments: Vec<Payment> = convert_rows(rows)?;

        let ledger: Vec<(PaymentEventType, Decimal)> =
            payments.iter().map(|p| (p.event_type, p.amount)).collect();
        let paid = net_paid(&ledger);

        Ok(PaymentSummary {
            order_id,
            total_amount,
            net_paid: paid,
            balance_due: total_amount - paid,
            payments,
        })
    }

    /// Approval requests of an order, oldest first
    pub async fn list_approvals(&self, actor: &Actor, order_id: i64) -> AppResult<Vec<ApprovalRequest>> {
        let (user_id, shop_id) =
            sqlx::query_as::<_, (i64, i64)>("SELECT user_id, shop_id FROM orders WHERE id = $1")
                .bind(order_id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        if !can_view_order(actor, user_id, shop_id) {
            return Err(AppError::InsufficientPermissions);
        }

        let rows = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            "SELECT {} FROM approval_requests WHERE order_id = $1 ORDER BY created_at, id",
            APPROVAL_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(convert_rows(rows)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustment_input_parses() {
        let input: CreateAdjustmentInput = serde_json::from_str(
            r#"{"adjustment_type":"reversal","amount":"150.00","reason":"duplicate charge"}"#,
        )
        .unwrap();
        assert_eq!(input.adjustment_type, AdjustmentType::Reversal);
        assert_eq!(input.adjustment_type.mirrored_payment_amount(input.amount), Decimal::new(-15000, 2));
        assert!(input.approval_request_id.is_none());
    }

    #[test]
    fn test_payment_input_requires_reason_lengths() {
        let input = RecordPaymentInput {
            event_type: PaymentEventType::Deposit,
            amount: Decimal::new(100, 0),
            reference: Some("x".repeat(256)),
            note: None,
            slip_path: None,
        };
        assert!(input.validate().is_err());
    }
}
