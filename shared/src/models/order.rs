//! Order models and the order-status state machine

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{GpsCoordinates, UnknownVariant};

/// Status of an order.
///
/// ```text
/// pending -> confirmed -> shipped -> delivered
/// pending -> cancelled
/// {confirmed, shipped} -> refund_requested -> refunded
/// delivered -> return_requested -> returned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    RefundRequested,
    Refunded,
    ReturnRequested,
    Returned,
}

/// Order timestamp column stamped when a status is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTimestamp {
    ShippedAt,
    DeliveredAt,
    CancelledAt,
    RefundRequestedAt,
    RefundedAt,
    ReturnRequestedAt,
    ReturnedAt,
}

impl StatusTimestamp {
    pub fn column(&self) -> &'static str {
        match self {
            StatusTimestamp::ShippedAt => "shipped_at",
            StatusTimestamp::DeliveredAt => "delivered_at",
            StatusTimestamp::CancelledAt => "cancelled_at",
            StatusTimestamp::RefundRequestedAt => "refund_requested_at",
            StatusTimestamp::RefundedAt => "refunded_at",
            StatusTimestamp::ReturnRequestedAt => "return_requested_at",
            StatusTimestamp::ReturnedAt => "returned_at",
        }
    }
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::RefundRequested,
        OrderStatus::Refunded,
        OrderStatus::ReturnRequested,
        OrderStatus::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::RefundRequested => "refund_requested",
            OrderStatus::Refunded => "refunded",
            OrderStatus::ReturnRequested => "return_requested",
            OrderStatus::Returned => "returned",
        }
    }

    /// States directly reachable from this one
    pub fn next_states(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Shipped, OrderStatus::RefundRequested],
            OrderStatus::Shipped => &[OrderStatus::Delivered, OrderStatus::RefundRequested],
            OrderStatus::Delivered => &[OrderStatus::ReturnRequested],
            OrderStatus::RefundRequested => &[OrderStatus::Refunded],
            OrderStatus::ReturnRequested => &[OrderStatus::Returned],
            OrderStatus::Cancelled | OrderStatus::Refunded | OrderStatus::Returned => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.next_states().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_states().is_empty()
    }

    /// Entering one of these states puts the order's stock back
    pub fn is_restocking(&self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Refunded | OrderStatus::Returned
        )
    }

    /// Whether moving `self -> next` must restock the order items
    pub fn triggers_restock(&self, next: OrderStatus) -> bool {
        next.is_restocking() && !self.is_restocking()
    }

    pub fn timestamp(&self) -> Option<StatusTimestamp> {
        match self {
            OrderStatus::Shipped => Some(StatusTimestamp::ShippedAt),
            OrderStatus::Delivered => Some(StatusTimestamp::DeliveredAt),
            OrderStatus::Cancelled => Some(StatusTimestamp::CancelledAt),
            OrderStatus::RefundRequested => Some(StatusTimestamp::RefundRequestedAt),
            OrderStatus::Refunded => Some(StatusTimestamp::RefundedAt),
            OrderStatus::ReturnRequested => Some(StatusTimestamp::ReturnRequestedAt),
            OrderStatus::Returned => Some(StatusTimestamp::ReturnedAt),
            OrderStatus::Pending | OrderStatus::Confirmed => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Why a status change was refused by the state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot move order from {from} to {to}")]
    NotReachable { from: OrderStatus, to: OrderStatus },

    #[error("return window of {days} days has passed")]
    ReturnWindowClosed { days: i64 },

    #[error("order has no delivery time recorded")]
    MissingDeliveryTime,
}

/// Validate a status change against the state machine.
///
/// `delivered -> return_requested` is additionally bounded by the return
/// window measured from `delivered_at`.
pub fn check_transition(
    from: OrderStatus,
    to: OrderStatus,
    delivered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    return_window_days: i64,
) -> Result<(), TransitionError> {
    if !from.can_transition_to(to) {
        return Err(TransitionError::NotReachable { from, to });
    }

    if to == OrderStatus::ReturnRequested {
        let delivered_at = delivered_at.ok_or(TransitionError::MissingDeliveryTime)?;
        if now - delivered_at > Duration::days(return_window_days) {
            return Err(TransitionError::ReturnWindowClosed {
                days: return_window_days,
            });
        }
    }

    Ok(())
}

/// An order placed with one shop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub shop_id: i64,
    pub user_id: i64,
    pub customer_id: Option<i64>,
    pub invoice_no: String,
    pub receipt_no: String,
    pub job_no: String,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total_amount: Decimal,
    pub phone: String,
    pub address: String,
    pub coordinates: Option<GpsCoordinates>,
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

/// A line of an order; `unit_price` is captured when the order is placed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub variant_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// A requested line resolved against the current variant row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub variant_id: i64,
    pub product_id: i64,
    pub shop_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Money totals of one order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total_amount: Decimal,
}

impl OrderTotals {
    pub fn from_lines(lines: &[PricedLine]) -> Self {
        let subtotal: Decimal = lines.iter().map(PricedLine::line_total).sum();
        Self {
            subtotal,
            discount_total: Decimal::ZERO,
            total_amount: subtotal,
        }
    }
}

/// Sum quantities of repeated variants, returning lines in ascending
/// variant order (the order locks are taken in). `None` when a summed
/// quantity does not fit in an `i32`.
pub fn merge_requested_items(items: &[(i64, i32)]) -> Option<Vec<(i64, i32)>> {
    let mut merged: BTreeMap<i64, i32> = BTreeMap::new();
    for (variant_id, quantity) in items {
        let total = merged.entry(*variant_id).or_insert(0);
        *total = total.checked_add(*quantity)?;
    }
    Some(merged.into_iter().collect())
}

/// Group priced lines by owning shop; one order is created per group
pub fn split_by_shop(lines: Vec<PricedLine>) -> BTreeMap<i64, Vec<PricedLine>> {
    let mut groups: BTreeMap<i64, Vec<PricedLine>> = BTreeMap::new();
    for line in lines {
        groups.entry(line.shop_id).or_default().push(line);
    }
    groups
}

/// Invoice, receipt and job numbers of one order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNumbers {
    pub invoice_no: String,
    pub receipt_no: String,
    pub job_no: String,
}

/// Build order numbers from the order date and a database sequence value
pub fn generate_order_numbers(date: NaiveDate, sequence: i64) -> OrderNumbers {
    let day = date.format("%Y%m%d");
    OrderNumbers {
        invoice_no: format!("INV-{}-{:06}", day, sequence),
        receipt_no: format!("RCP-{}-{:06}", day, sequence),
        job_no: format!("JOB-{}-{:06}", day, sequence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn status_strategy() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::ReturnRequested,
            OrderStatus::Returned,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_pending_cannot_jump_to_delivered() {
        let now = Utc::now();
        let err = check_transition(OrderStatus::Pending, OrderStatus::Delivered, None, now, 7)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotReachable {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered
            }
        );
    }

    #[test]
    fn test_refund_only_from_confirmed_or_shipped() {
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::RefundRequested));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::RefundRequested));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::RefundRequested));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::RefundRequested));
        assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn test_return_window() {
        let now = Utc::now();
        let recent = Some(now - Duration::days(6));
        let stale = Some(now - Duration::days(8));

        assert!(check_transition(
            OrderStatus::Delivered,
            OrderStatus::ReturnRequested,
            recent,
            now,
            7
        )
        .is_ok());
        assert_eq!(
            check_transition(OrderStatus::Delivered, OrderStatus::ReturnRequested, stale, now, 7),
            Err(TransitionError::ReturnWindowClosed { days: 7 })
        );
        assert_eq!(
            check_transition(OrderStatus::Delivered, OrderStatus::ReturnRequested, None, now, 7),
            Err(TransitionError::MissingDeliveryTime)
        );
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(OrderStatus::from_str("lost").is_err());
    }

    #[test]
    fn test_merge_requested_items_sorts_and_sums() {
        let merged = merge_requested_items(&[(9, 1), (3, 2), (9, 4)]).unwrap();
        assert_eq!(merged, vec![(3, 2), (9, 5)]);
    }

    #[test]
    fn test_merge_requested_items_rejects_overflow() {
        assert_eq!(merge_requested_items(&[(1, i32::MAX), (1, 1)]), None);
        assert_eq!(merge_requested_items(&[(1, i32::MAX), (2, 1)]), Some(vec![(1, i32::MAX), (2, 1)]));
    }

    #[test]
    fn test_split_by_shop_keeps_each_shop_items() {
        let line = |variant_id, shop_id, quantity, price: i64| PricedLine {
            variant_id,
            product_id: variant_id * 10,
            shop_id,
            quantity,
            unit_price: Decimal::from(price),
        };
        let groups = split_by_shop(vec![line(1, 100, 2, 50), line(2, 200, 1, 30), line(3, 100, 1, 20)]);

        assert_eq!(groups.len(), 2);
        assert_eq!(OrderTotals::from_lines(&groups[&100]).total_amount, Decimal::from(120));
        assert_eq!(OrderTotals::from_lines(&groups[&200]).total_amount, Decimal::from(30));
        assert!(groups[&100].iter().all(|l| l.shop_id == 100));
    }

    #[test]
    fn test_generate_order_numbers() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let numbers = generate_order_numbers(date, 42);
        assert_eq!(numbers.invoice_no, "INV-20240309-000042");
        assert_eq!(numbers.receipt_no, "RCP-20240309-000042");
        assert_eq!(numbers.job_no, "JOB-20240309-000042");
    }

    proptest! {
        /// Terminal states have no way out, so a restock can only fire once
        #[test]
        fn prop_restock_fires_at_most_once_along_any_path(
            steps in prop::collection::vec(status_strategy(), 0..12)
        ) {
            let mut current = OrderStatus::Pending;
            let mut restocks = 0;
            for next in steps {
                if current.can_transition_to(next) {
                    if current.triggers_restock(next) {
                        restocks += 1;
                    }
                    current = next;
                }
            }
            prop_assert!(restocks <= 1);
            if restocks == 1 {
                prop_assert!(current.is_restocking());
            }
        }

        #[test]
        fn prop_terminal_states_are_exactly_the_restocking_states(status in status_strategy()) {
            prop_assert_eq!(status.is_terminal(), status.is_restocking());
        }

        #[test]
        fn prop_no_transition_returns_to_pending(from in status_strategy()) {
            prop_assert!(!from.can_transition_to(OrderStatus::Pending));
        }

        #[test]
        fn prop_split_preserves_subtotal(
            raw in prop::collection::vec((1i64..50, 1i64..4, 1i32..20, 1i64..10_000), 1..20)
        ) {
            let lines: Vec<PricedLine> = raw
                .iter()
                .map(|(variant_id, shop_id, quantity, cents)| PricedLine {
                    variant_id: *variant_id,
                    product_id: *variant_id,
                    shop_id: *shop_id,
                    quantity: *quantity,
                    unit_price: Decimal::new(*cents, 2),
                })
                .collect();
            let whole = OrderTotals::from_lines(&lines).subtotal;
            let split: Decimal = split_by_shop(lines)
                .values()
                .map(|group| OrderTotals::from_lines(group).subtotal)
                .sum();
            prop_assert_eq!(whole, split);
        }
    }
}
