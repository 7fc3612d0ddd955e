//! Ledger rule tests
//!
//! Tests for the money and stock ledgers:
//! - Stock conservation across transfers and no negative stock
//! - Derived product price/stock from variants
//! - Payment sign conventions and net paid
//! - Adjustment approval gate

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    apply_stock_delta, authorize_adjustment, derive_product_fields, net_paid, shadow_product_sku,
    timestamped_sku, Actor, AdjustmentType, ApprovalRequest, ApprovalStatus, ApprovalType,
    GateError, MovementType, PaymentEventType, PaymentStatus, Role,
};
use std::str::FromStr;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn approved_request(order_id: i64) -> ApprovalRequest {
    ApprovalRequest {
        id: 3,
        order_id,
        request_type: ApprovalType::Refund,
        status: ApprovalStatus::Approved,
        requested_by: 8,
        approved_by: Some(2),
        decided_at: Some(Utc::now()),
        amount: Some(dec("80.00")),
        reason: "wrong size".to_string(),
        created_at: Utc::now(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_movement_types() {
        let types = [
            MovementType::OrderPlaced,
            MovementType::OrderRestock,
            MovementType::TransferOut,
            MovementType::TransferIn,
            MovementType::ManualAdjustment,
            MovementType::ManualSet,
        ];

        for t in types {
            assert_eq!(MovementType::from_str(t.as_str()), Ok(t));
            assert!(t.as_str().chars().all(|c| c.is_lowercase() || c == '_'));
        }
    }

    /// RED-L with 10 units, 4 moved out: 6 left, shadow holds 4
    #[test]
    fn test_transfer_scenario_levels() {
        let source = apply_stock_delta(10, -4).unwrap();
        let shadow = apply_stock_delta(0, 4).unwrap();

        assert_eq!(source, 6);
        assert_eq!(shadow, 4);
        assert_eq!(source + shadow, 10);
    }

    #[test]
    fn test_stock_cannot_go_negative() {
        assert_eq!(apply_stock_delta(3, -4), None);
        assert_eq!(apply_stock_delta(i32::MAX, 1), None);
    }

    #[test]
    fn test_derived_fields_ignore_inactive() {
        let derived = derive_product_fields(&[
            (dec("199.00"), 5, true),
            (dec("149.00"), 7, false),
            (dec("179.00"), 2, true),
        ]);

        assert_eq!(derived.price, Some(dec("179.00")));
        assert_eq!(derived.stock_level, 7);

        let none_active = derive_product_fields(&[(dec("10.00"), 3, false)]);
        assert_eq!(none_active.price, None);
        assert_eq!(none_active.stock_level, 0);
    }

    #[test]
    fn test_shadow_sku() {
        assert_eq!(shadow_product_sku("TEE-RED", 9), "TEE-RED-S9");

        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(timestamped_sku("TEE-RED-S9", at), "TEE-RED-S9-1717200000");
    }

    #[test]
    fn test_payment_event_semantics() {
        assert_eq!(PaymentEventType::Refund.signed_amount(dec("40.00")), dec("-40.00"));
        assert_eq!(PaymentEventType::Deposit.signed_amount(dec("40.00")), dec("40.00"));

        assert_eq!(PaymentEventType::Verify.resulting_status(), PaymentStatus::Verified);
        assert_eq!(PaymentEventType::Adjustment.resulting_status(), PaymentStatus::Posted);

        assert!(PaymentEventType::Refund.requires_finance());
        assert!(!PaymentEventType::Deposit.requires_finance());
        assert!(PaymentEventType::Reject.allows_zero_amount());
        assert!(!PaymentEventType::Partial.allows_zero_amount());
    }

    #[test]
    fn test_net_paid_skips_verification_rows() {
        let ledger = [
            (PaymentEventType::Deposit, dec("500.00")),
            (PaymentEventType::Verify, dec("500.00")),
            (PaymentEventType::Partial, dec("250.00")),
            (PaymentEventType::Refund, dec("-100.00")),
            (PaymentEventType::Adjustment, dec("-50.00")),
        ];

        assert_eq!(net_paid(&ledger), dec("600.00"));
    }

    #[test]
    fn test_mirrored_payment_sign() {
        assert_eq!(AdjustmentType::Reversal.mirrored_payment_amount(dec("75.00")), dec("-75.00"));
        assert_eq!(AdjustmentType::Adjustment.mirrored_payment_amount(dec("75.00")), dec("75.00"));
    }

    /// Non-finance staff need an approved request for the same order
    #[test]
    fn test_adjustment_approval_gate() {
        let manager = Actor::new(4, vec![Role::Manager], Some(1));
        let finance = Actor::new(5, vec![Role::Finance], None);

        assert_eq!(authorize_adjustment(&manager, 10, None), Err(GateError::ApprovalRequired));
        assert!(authorize_adjustment(&manager, 10, Some(&approved_request(10))).is_ok());
        assert_eq!(
            authorize_adjustment(&manager, 10, Some(&approved_request(11))),
            Err(GateError::ApprovalRequired)
        );
        assert!(authorize_adjustment(&finance, 10, None).is_ok());

        let mut rejected = approved_request(10);
        rejected.status = ApprovalStatus::Rejected;
        assert_eq!(
            authorize_adjustment(&finance, 10, Some(&rejected)),
            Err(GateError::ApprovalRequired)
        );
    }

    /// An approval for 80.00 covers adjustments up to 80.00 in total
    #[test]
    fn test_approval_amount_caps_adjustments() {
        let request = approved_request(10);
        assert!(request.covers(dec("80.00"), Decimal::ZERO));
        assert!(request.covers(dec("30.00"), dec("50.00")));
        assert!(!request.covers(dec("30.01"), dec("50.00")));
        assert!(!request.covers(dec("0.01"), dec("80.00")));

        let mut uncapped = approved_request(10);
        uncapped.amount = None;
        assert!(uncapped.covers(dec("99999.00"), dec("99999.00")));
    }

    #[test]
    fn test_approval_decisions_are_final() {
        assert_eq!(ApprovalStatus::Pending.decide(true), Some(ApprovalStatus::Approved));
        assert_eq!(ApprovalStatus::Pending.decide(false), Some(ApprovalStatus::Rejected));
        assert_eq!(ApprovalStatus::Approved.decide(false), None);
        assert_eq!(ApprovalStatus::Rejected.decide(true), None);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn amount_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10_000_000i64).prop_map(|n| Decimal::new(n, 2)) // 0.01 to 100000.00
    }

    fn event_strategy() -> impl Strategy<Value = PaymentEventType> {
        prop_oneof![
            Just(PaymentEventType::Deposit),
            Just(PaymentEventType::Partial),
            Just(PaymentEventType::Verify),
            Just(PaymentEventType::Reject),
            Just(PaymentEventType::Refund),
            Just(PaymentEventType::Adjustment),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A transfer of q units conserves the pair's total stock
        #[test]
        fn prop_transfer_conserves_stock(
            source in 0i32..10_000,
            destination in 0i32..10_000,
            quantity in 1i32..10_000,
        ) {
            match apply_stock_delta(source, -quantity) {
                Some(source_after) => {
                    let destination_after = apply_stock_delta(destination, quantity).unwrap();
                    prop_assert_eq!(source_after + destination_after, source + destination);
                    prop_assert!(source_after >= 0);
                }
                None => prop_assert!(quantity > source),
            }
        }

        /// Replaying any delta sequence with rejection never yields negative stock
        #[test]
        fn prop_no_negative_stock(
            start in 0i32..500,
            deltas in prop::collection::vec(-50i32..50, 0..40),
        ) {
            let mut level = start;
            for delta in deltas {
                if let Some(next) = apply_stock_delta(level, delta) {
                    level = next;
                }
                prop_assert!(level >= 0);
            }
        }

        /// Product price is the minimum active variant price
        #[test]
        fn prop_derived_price_is_min_active(
            variants in prop::collection::vec((amount_strategy(), 0i32..100, any::<bool>()), 0..10)
        ) {
            let derived = derive_product_fields(&variants);
            let active: Vec<_> = variants.iter().filter(|v| v.2).collect();

            prop_assert_eq!(derived.price.is_some(), !active.is_empty());
            for (price, _, _) in &active {
                prop_assert!(derived.price.unwrap() <= *price);
            }
            prop_assert_eq!(derived.stock_level, active.iter().map(|v| v.1).sum::<i32>());
        }

        /// Only refunds are stored with a negative sign
        #[test]
        fn prop_signed_amount(event in event_strategy(), amount in amount_strategy()) {
            let signed = event.signed_amount(amount);
            prop_assert_eq!(signed.abs(), amount);
            prop_assert_eq!(signed.is_sign_negative(), event == PaymentEventType::Refund);
        }

        /// Verification rows never move the net paid amount
        #[test]
        fn prop_net_paid_ignores_verification(
            ledger in prop::collection::vec((event_strategy(), amount_strategy()), 0..20),
            extra in amount_strategy(),
        ) {
            let mut with_verify = ledger.clone();
            with_verify.push((PaymentEventType::Verify, extra));
            with_verify.push((PaymentEventType::Reject, extra));

            prop_assert_eq!(net_paid(&with_verify), net_paid(&ledger));
        }
    }
}
