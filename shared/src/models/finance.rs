//! Financial governance models: approvals, adjustments and payment events

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    Discount,
    Refund,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::Discount => "discount",
            ApprovalType::Refund => "refund",
        }
    }
}

impl std::str::FromStr for ApprovalType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discount" => Ok(ApprovalType::Discount),
            "refund" => Ok(ApprovalType::Refund),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    /// Status after a decision; only a pending request can be decided
    pub fn decide(&self, approve: bool) -> Option<ApprovalStatus> {
        match self {
            ApprovalStatus::Pending if approve => Some(ApprovalStatus::Approved),
            ApprovalStatus::Pending => Some(ApprovalStatus::Rejected),
            ApprovalStatus::Approved | ApprovalStatus::Rejected => None,
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Authorization artifact for a discount or refund
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: i64,
    pub order_id: i64,
    pub request_type: ApprovalType,
    pub status: ApprovalStatus,
    pub requested_by: i64,
    pub approved_by: Option<i64>,
    pub decided_at: Option<DateTime<Utc>>,
    pub amount: Option<Decimal>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Approved and scoped to `order_id`, optionally of a given type
    pub fn authorizes(&self, order_id: i64, request_type: Option<ApprovalType>) -> bool {
        self.status == ApprovalStatus::Approved
            && self.order_id == order_id
            && request_type.map_or(true, |t| t == self.request_type)
    }

    /// Whether `amount` fits in what is left of the approved amount after
    /// `already_used`. Requests without an amount cap nothing.
    pub fn covers(&self, amount: Decimal, already_used: Decimal) -> bool {
        self.amount.map_or(true, |cap| already_used + amount <= cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Reversal,
    Adjustment,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::Reversal => "reversal",
            AdjustmentType::Adjustment => "adjustment",
        }
    }

    /// Signed amount of the payment row mirroring an adjustment
    pub fn mirrored_payment_amount(&self, amount: Decimal) -> Decimal {
        match self {
            AdjustmentType::Reversal => -amount.abs(),
            AdjustmentType::Adjustment => amount.abs(),
        }
    }
}

impl std::str::FromStr for AdjustmentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reversal" => Ok(AdjustmentType::Reversal),
            "adjustment" => Ok(AdjustmentType::Adjustment),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Append-only financial adjustment against an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialAdjustment {
    pub id: i64,
    pub order_id: i64,
    pub adjustment_type: AdjustmentType,
    /// Always positive; direction is carried by `adjustment_type`
    pub amount: Decimal,
    pub reason: String,
    pub created_by: i64,
    pub approval_request_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventType {
    Deposit,
    Partial,
    Verify,
    Reject,
    Refund,
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Rejected,
    Refunded,
    Posted,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Posted => "posted",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "verified" => Ok(PaymentStatus::Verified),
            "rejected" => Ok(PaymentStatus::Rejected),
            "refunded" => Ok(PaymentStatus::Refunded),
            "posted" => Ok(PaymentStatus::Posted),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl PaymentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventType::Deposit => "deposit",
            PaymentEventType::Partial => "partial",
            PaymentEventType::Verify => "verify",
            PaymentEventType::Reject => "reject",
            PaymentEventType::Refund => "refund",
            PaymentEventType::Adjustment => "adjustment",
        }
    }

    /// Refunds are stored negative; every other event keeps the magnitude
    pub fn signed_amount(&self, amount: Decimal) -> Decimal {
        match self {
            PaymentEventType::Refund => -amount.abs(),
            _ => amount.abs(),
        }
    }

    /// Status written on the ledger row for this event
    pub fn resulting_status(&self) -> PaymentStatus {
        match self {
            PaymentEventType::Deposit | PaymentEventType::Partial => PaymentStatus::Pending,
            PaymentEventType::Verify => PaymentStatus::Verified,
            PaymentEventType::Reject => PaymentStatus::Rejected,
            PaymentEventType::Refund => PaymentStatus::Refunded,
            PaymentEventType::Adjustment => PaymentStatus::Posted,
        }
    }

    /// Verification outcomes and refunds are finance decisions
    pub fn requires_finance(&self) -> bool {
        matches!(
            self,
            PaymentEventType::Verify | PaymentEventType::Reject | PaymentEventType::Refund
        )
    }

    /// Verify/reject may carry a zero amount; money-moving events may not
    pub fn allows_zero_amount(&self) -> bool {
        matches!(self, PaymentEventType::Verify | PaymentEventType::Reject)
    }
}

impl std::str::FromStr for PaymentEventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(PaymentEventType::Deposit),
            "partial" => Ok(PaymentEventType::Partial),
            "verify" => Ok(PaymentEventType::Verify),
            "reject" => Ok(PaymentEventType::Reject),
            "refund" => Ok(PaymentEventType::Refund),
            "adjustment" => Ok(PaymentEventType::Adjustment),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Append-only payment ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub event_type: PaymentEventType,
    /// Signed; refunds and reversals are negative
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub note: Option<String>,
    /// Opaque blob-store path of an uploaded slip
    pub slip_path: Option<String>,
    pub actor_id: i64,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    /// Set on the row mirroring a financial adjustment
    pub financial_adjustment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Net money received for an order: deposits, partials, refunds and
/// adjustments. Verification rows carry no money movement.
pub fn net_paid(payments: &[(PaymentEventType, Decimal)]) -> Decimal {
    payments
        .iter()
        .filter(|(event_type, _)| {
            !matches!(event_type, PaymentEventType::Verify | PaymentEventType::Reject)
        })
        .map(|(_, amount)| *amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn test_refund_amount_is_negative() {
        assert_eq!(PaymentEventType::Refund.signed_amount(dec(250)), dec(-250));
        assert_eq!(PaymentEventType::Refund.signed_amount(dec(-250)), dec(-250));
        assert_eq!(PaymentEventType::Deposit.signed_amount(dec(250)), dec(250));
    }

    #[test]
    fn test_decision_is_one_way() {
        assert_eq!(ApprovalStatus::Pending.decide(true), Some(ApprovalStatus::Approved));
        assert_eq!(ApprovalStatus::Pending.decide(false), Some(ApprovalStatus::Rejected));
        assert_eq!(ApprovalStatus::Approved.decide(false), None);
        assert_eq!(ApprovalStatus::Rejected.decide(true), None);
    }

    #[test]
    fn test_approval_scope() {
        let request = ApprovalRequest {
            id: 1,
            order_id: 10,
            request_type: ApprovalType::Refund,
            status: ApprovalStatus::Approved,
            requested_by: 5,
            approved_by: Some(6),
            decided_at: Some(Utc::now()),
            amount: Some(dec(100)),
            reason: "damaged".to_string(),
            created_at: Utc::now(),
        };
        assert!(request.authorizes(10, Some(ApprovalType::Refund)));
        assert!(request.authorizes(10, None));
        assert!(!request.authorizes(11, None));
        assert!(!request.authorizes(10, Some(ApprovalType::Discount)));

        let pending = ApprovalRequest {
            status: ApprovalStatus::Pending,
            ..request
        };
        assert!(!pending.authorizes(10, None));
    }

    #[test]
    fn test_adjustment_mirror_sign() {
        assert_eq!(AdjustmentType::Reversal.mirrored_payment_amount(dec(40)), dec(-40));
        assert_eq!(AdjustmentType::Adjustment.mirrored_payment_amount(dec(40)), dec(40));
    }

    #[test]
    fn test_net_paid_ignores_verification_rows() {
        let rows = [
            (PaymentEventType::Deposit, dec(500)),
            (PaymentEventType::Verify, dec(500)),
            (PaymentEventType::Partial, dec(200)),
            (PaymentEventType::Refund, dec(-100)),
            (PaymentEventType::Adjustment, dec(-50)),
        ];
        assert_eq!(net_paid(&rows), dec(550));
    }
}
