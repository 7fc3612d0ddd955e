//! Order rule tests
//!
//! Tests for the order lifecycle rules the order service relies on:
//! - Transition legality and terminal closure
//! - Restock-once on cancellation and refund
//! - Role gating of status changes
//! - Cart split conservation across shops

use chrono::{Duration, NaiveDate, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    authorize_customer_request, authorize_status_change, check_transition, generate_order_numbers,
    merge_requested_items, split_by_shop, Actor, ApprovalRequest, ApprovalStatus, ApprovalType,
    GateError, OrderStatus, OrderTotals, PricedLine, Role, TransitionError,
};
use std::str::FromStr;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const SHOP: i64 = 4;
const ORDER: i64 = 31;

fn staff(roles: &[Role]) -> Actor {
    Actor::new(900, roles.to_vec(), Some(SHOP))
}

fn approval(order_id: i64, status: ApprovalStatus) -> ApprovalRequest {
    ApprovalRequest {
        id: 1,
        order_id,
        request_type: ApprovalType::Refund,
        status,
        requested_by: 77,
        approved_by: None,
        decided_at: None,
        amount: Some(dec("250.00")),
        reason: "parcel damaged".to_string(),
        created_at: Utc::now(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// pending -> delivered skips confirmation and shipping
    #[test]
    fn test_pending_cannot_jump_to_delivered() {
        let err = check_transition(
            OrderStatus::Pending,
            OrderStatus::Delivered,
            None,
            Utc::now(),
            7,
        )
        .unwrap_err();

        assert_eq!(
            err,
            TransitionError::NotReachable {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered,
            }
        );
    }

    #[test]
    fn test_happy_path() {
        let path = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_return_window() {
        let now = Utc::now();

        assert!(check_transition(
            OrderStatus::Delivered,
            OrderStatus::ReturnRequested,
            Some(now - Duration::days(3)),
            now,
            7,
        )
        .is_ok());

        assert_eq!(
            check_transition(
                OrderStatus::Delivered,
                OrderStatus::ReturnRequested,
                Some(now - Duration::days(8)),
                now,
                7,
            ),
            Err(TransitionError::ReturnWindowClosed { days: 7 })
        );

        assert_eq!(
            check_transition(OrderStatus::Delivered, OrderStatus::ReturnRequested, None, now, 7),
            Err(TransitionError::MissingDeliveryTime)
        );
    }

    #[test]
    fn test_only_admin_or_manager_cancel() {
        let next = OrderStatus::Cancelled;
        assert!(authorize_status_change(&staff(&[Role::Admin]), ORDER, SHOP, next, None).is_ok());
        assert!(authorize_status_change(&staff(&[Role::Manager]), ORDER, SHOP, next, None).is_ok());
        assert_eq!(
            authorize_status_change(&staff(&[Role::Staff]), ORDER, SHOP, next, None),
            Err(GateError::Forbidden)
        );
        assert_eq!(
            authorize_status_change(&staff(&[Role::Finance]), ORDER, SHOP, next, None),
            Err(GateError::Forbidden)
        );
    }

    #[test]
    fn test_delivery_role_limited_to_shipping() {
        let rider = staff(&[Role::Delivery]);
        assert!(authorize_status_change(&rider, ORDER, SHOP, OrderStatus::Shipped, None).is_ok());
        assert!(authorize_status_change(&rider, ORDER, SHOP, OrderStatus::Delivered, None).is_ok());
        assert_eq!(
            authorize_status_change(&rider, ORDER, SHOP, OrderStatus::Confirmed, None),
            Err(GateError::Forbidden)
        );
    }

    #[test]
    fn test_refund_needs_finance_or_approval() {
        let clerk = staff(&[Role::Staff]);
        let next = OrderStatus::Refunded;

        assert_eq!(
            authorize_status_change(&clerk, ORDER, SHOP, next, None),
            Err(GateError::ApprovalRequired)
        );

        let approved = approval(ORDER, ApprovalStatus::Approved);
        assert!(authorize_status_change(&clerk, ORDER, SHOP, next, Some(&approved)).is_ok());

        let other_order = approval(ORDER + 1, ApprovalStatus::Approved);
        assert_eq!(
            authorize_status_change(&clerk, ORDER, SHOP, next, Some(&other_order)),
            Err(GateError::ApprovalRequired)
        );

        let pending = approval(ORDER, ApprovalStatus::Pending);
        assert_eq!(
            authorize_status_change(&clerk, ORDER, SHOP, next, Some(&pending)),
            Err(GateError::ApprovalRequired)
        );

        assert!(authorize_status_change(&staff(&[Role::Finance]), ORDER, SHOP, next, None).is_ok());
    }

    #[test]
    fn test_staff_of_other_shop_forbidden() {
        let outsider = Actor::new(5, vec![Role::Manager], Some(SHOP + 1));
        assert_eq!(
            authorize_status_change(&outsider, ORDER, SHOP, OrderStatus::Confirmed, None),
            Err(GateError::Forbidden)
        );
    }

    #[test]
    fn test_customer_cancel_only_while_pending() {
        let owner = Actor::new(12, vec![Role::Customer], None);

        assert!(authorize_customer_request(&owner, 12, OrderStatus::Pending, OrderStatus::Cancelled)
            .is_ok());
        assert_eq!(
            authorize_customer_request(&owner, 12, OrderStatus::Confirmed, OrderStatus::Cancelled),
            Err(GateError::Forbidden)
        );
        assert_eq!(
            authorize_customer_request(&owner, 13, OrderStatus::Pending, OrderStatus::Cancelled),
            Err(GateError::Forbidden)
        );
        assert_eq!(
            authorize_customer_request(&owner, 12, OrderStatus::Pending, OrderStatus::Confirmed),
            Err(GateError::Forbidden)
        );
    }

    #[test]
    fn test_order_numbers_share_sequence() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let numbers = generate_order_numbers(date, 42);

        assert_eq!(numbers.invoice_no, "INV-20240601-000042");
        assert_eq!(numbers.receipt_no, "RCP-20240601-000042");
        assert_eq!(numbers.job_no, "JOB-20240601-000042");
    }

    /// Two shops in one cart produce two groups with their own totals
    #[test]
    fn test_cart_split_two_shops() {
        let lines = vec![
            PricedLine { variant_id: 1, product_id: 1, shop_id: 10, quantity: 2, unit_price: dec("120.00") },
            PricedLine { variant_id: 2, product_id: 2, shop_id: 20, quantity: 1, unit_price: dec("59.50") },
            PricedLine { variant_id: 3, product_id: 3, shop_id: 10, quantity: 3, unit_price: dec("10.00") },
        ];

        let groups = split_by_shop(lines);
        assert_eq!(groups.len(), 2);

        let shop_a = OrderTotals::from_lines(&groups[&10]);
        let shop_b = OrderTotals::from_lines(&groups[&20]);
        assert_eq!(shop_a.total_amount, dec("270.00"));
        assert_eq!(shop_b.total_amount, dec("59.50"));
        assert!(groups[&10].iter().all(|l| l.shop_id == 10));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn status_strategy() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    fn role_strategy() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Admin),
            Just(Role::Manager),
            Just(Role::Finance),
            Just(Role::Staff),
            Just(Role::Delivery),
            Just(Role::Customer),
        ]
    }

    fn line_strategy() -> impl Strategy<Value = PricedLine> {
        (1i64..50, 1i64..5, 1i32..20, 1i64..100000).prop_map(|(variant_id, shop_id, quantity, cents)| {
            PricedLine {
                variant_id,
                product_id: variant_id,
                shop_id,
                quantity,
                unit_price: Decimal::new(cents, 2),
            }
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any transition outside the state machine is refused
        #[test]
        fn prop_transition_legality(from in status_strategy(), to in status_strategy()) {
            let now = Utc::now();
            let result = check_transition(from, to, Some(now), now, 7);
            prop_assert_eq!(result.is_ok(), from.next_states().contains(&to));
        }

        /// Terminal states have no way out
        #[test]
        fn prop_terminal_closure(from in status_strategy(), to in status_strategy()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        /// A restocking transition can fire at most once along any path
        #[test]
        fn prop_restock_once(steps in prop::collection::vec(status_strategy(), 1..12)) {
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
        }

        /// Role gating never lets an actor from another shop through
        #[test]
        fn prop_gating_scoped_to_shop(
            roles in prop::collection::vec(role_strategy(), 1..3),
            next in status_strategy(),
        ) {
            let outsider = Actor::new(1, roles.clone(), Some(SHOP + 1));
            if !roles.contains(&Role::Admin) {
                prop_assert!(authorize_status_change(&outsider, ORDER, SHOP, next, None).is_err());
            }
        }

        /// Splitting a cart conserves every line and the grand total
        #[test]
        fn prop_cart_split_conserves_total(lines in prop::collection::vec(line_strategy(), 1..20)) {
            let grand_total = OrderTotals::from_lines(&lines).total_amount;
            let line_count = lines.len();

            let groups = split_by_shop(lines);
            let split_total: Decimal = groups
                .values()
                .map(|group| OrderTotals::from_lines(group).total_amount)
                .sum();
            let split_count: usize = groups.values().map(Vec::len).sum();

            prop_assert_eq!(split_total, grand_total);
            prop_assert_eq!(split_count, line_count);
            for (shop_id, group) in &groups {
                prop_assert!(group.iter().all(|l| l.shop_id == *shop_id));
            }
        }

        /// Merging repeated variants keeps total quantity and sorts by id
        #[test]
        fn prop_merge_requested_items(
            items in prop::collection::vec((1i64..10, 1i32..50), 1..30)
        ) {
            let merged = merge_requested_items(&items).unwrap();

            let before: i32 = items.iter().map(|(_, q)| q).sum();
            let after: i32 = merged.iter().map(|(_, q)| q).sum();
            prop_assert_eq!(before, after);
            prop_assert!(merged.windows(2).all(|w| w[0].0 < w[1].0));
        }
    }
}
