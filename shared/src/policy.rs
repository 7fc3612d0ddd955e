//! Role gating for order-status changes and financial actions

use serde::{Deserialize, Serialize};

use crate::models::{ApprovalRequest, ApprovalType, OrderStatus};
use crate::types::{Actor, Role};

/// Why an actor may not perform a gated action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GateError {
    #[error("actor is not allowed to perform this action")]
    Forbidden,

    #[error("an approved request is required")]
    ApprovalRequired,
}

/// Decide whether `actor` may move an order of `order_shop_id` into `next`
/// through the staff status endpoint.
///
/// - only admin/manager may cancel
/// - delivery-only actors may only ship or deliver
/// - refund states need a finance-capable role or an approved refund
///   request scoped to the order
pub fn authorize_status_change(
    actor: &Actor,
    order_id: i64,
    order_shop_id: i64,
    next: OrderStatus,
    approval: Option<&ApprovalRequest>,
) -> Result<(), GateError> {
    if !actor.works_for(order_shop_id) {
        return Err(GateError::Forbidden);
    }

    if next == OrderStatus::Cancelled {
        return if actor.has_any_role(&[Role::Admin, Role::Manager]) {
            Ok(())
        } else {
            Err(GateError::Forbidden)
        };
    }

    if actor.is_delivery_only() && !matches!(next, OrderStatus::Shipped | OrderStatus::Delivered) {
        return Err(GateError::Forbidden);
    }

    if matches!(next, OrderStatus::RefundRequested | OrderStatus::Refunded) {
        let approved = approval
            .map(|request| request.authorizes(order_id, Some(ApprovalType::Refund)))
            .unwrap_or(false);
        if !actor.is_finance_capable() && !approved {
            return Err(GateError::ApprovalRequired);
        }
    }

    Ok(())
}

/// Statuses an order owner may move their own order into
pub fn customer_may_request(next: OrderStatus) -> bool {
    matches!(
        next,
        OrderStatus::Cancelled | OrderStatus::RefundRequested | OrderStatus::ReturnRequested
    )
}

/// Owners may only cancel while the order is still pending
pub fn authorize_customer_request(
    actor: &Actor,
    order_user_id: i64,
    current: OrderStatus,
    next: OrderStatus,
) -> Result<(), GateError> {
    if actor.user_id != order_user_id || !customer_may_request(next) {
        return Err(GateError::Forbidden);
    }
    if next == OrderStatus::Cancelled && current != OrderStatus::Pending {
        return Err(GateError::Forbidden);
    }
    Ok(())
}

/// Owners, staff of the order's shop, admins and finance may read an order
/// and its ledger rows
pub fn can_view_order(actor: &Actor, order_user_id: i64, order_shop_id: i64) -> bool {
    actor.user_id == order_user_id || actor.works_for(order_shop_id) || actor.is_finance_capable()
}

/// Whether `actor` may post a financial adjustment given the optional
/// referenced approval request
pub fn authorize_adjustment(
    actor: &Actor,
    order_id: i64,
    approval: Option<&ApprovalRequest>,
) -> Result<(), GateError> {
    match approval {
        Some(request) if request.authorizes(order_id, None) => Ok(()),
        Some(_) => Err(GateError::ApprovalRequired),
        None if actor.is_finance_capable() => Ok(()),
        None => Err(GateError::ApprovalRequired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ApprovalStatus;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    const ORDER: i64 = 10;
    const SHOP: i64 = 3;

    fn actor(roles: &[Role]) -> Actor {
        Actor::new(1, roles.to_vec(), Some(SHOP))
    }

    fn refund_request(order_id: i64, status: ApprovalStatus) -> ApprovalRequest {
        ApprovalRequest {
            id: 7,
            order_id,
            request_type: ApprovalType::Refund,
            status,
            requested_by: 2,
            approved_by: None,
            decided_at: None,
            amount: Some(Decimal::from(100)),
            reason: "late delivery".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_only_admin_or_manager_can_cancel() {
        for role in [Role::Admin, Role::Manager] {
            assert!(authorize_status_change(&actor(&[role]), ORDER, SHOP, OrderStatus::Cancelled, None).is_ok());
        }
        for role in [Role::Staff, Role::Finance, Role::Delivery] {
            assert_eq!(
                authorize_status_change(&actor(&[role]), ORDER, SHOP, OrderStatus::Cancelled, None),
                Err(GateError::Forbidden)
            );
        }
    }

    #[test]
    fn test_delivery_only_ships_and_delivers() {
        let rider = actor(&[Role::Delivery]);
        assert!(authorize_status_change(&rider, ORDER, SHOP, OrderStatus::Shipped, None).is_ok());
        assert!(authorize_status_change(&rider, ORDER, SHOP, OrderStatus::Delivered, None).is_ok());
        assert_eq!(
            authorize_status_change(&rider, ORDER, SHOP, OrderStatus::Confirmed, None),
            Err(GateError::Forbidden)
        );
    }

    #[test]
    fn test_refund_needs_finance_or_approval() {
        let staff = actor(&[Role::Staff]);
        assert_eq!(
            authorize_status_change(&staff, ORDER, SHOP, OrderStatus::Refunded, None),
            Err(GateError::ApprovalRequired)
        );

        let approved = refund_request(ORDER, ApprovalStatus::Approved);
        assert!(authorize_status_change(&staff, ORDER, SHOP, OrderStatus::Refunded, Some(&approved)).is_ok());

        let other_order = refund_request(ORDER + 1, ApprovalStatus::Approved);
        assert_eq!(
            authorize_status_change(&staff, ORDER, SHOP, OrderStatus::Refunded, Some(&other_order)),
            Err(GateError::ApprovalRequired)
        );

        let pending = refund_request(ORDER, ApprovalStatus::Pending);
        assert_eq!(
            authorize_status_change(&staff, ORDER, SHOP, OrderStatus::RefundRequested, Some(&pending)),
            Err(GateError::ApprovalRequired)
        );

        let finance = actor(&[Role::Finance]);
        assert!(authorize_status_change(&finance, ORDER, SHOP, OrderStatus::Refunded, None).is_ok());
    }

    #[test]
    fn test_staff_of_other_shop_is_forbidden() {
        let outsider = Actor::new(1, vec![Role::Manager], Some(SHOP + 1));
        assert_eq!(
            authorize_status_change(&outsider, ORDER, SHOP, OrderStatus::Confirmed, None),
            Err(GateError::Forbidden)
        );
        let customer = Actor::new(1, vec![Role::Customer], None);
        assert_eq!(
            authorize_status_change(&customer, ORDER, SHOP, OrderStatus::Confirmed, None),
            Err(GateError::Forbidden)
        );
    }

    #[test]
    fn test_customer_requests() {
        let owner = Actor::new(42, vec![Role::Customer], None);
        assert!(authorize_customer_request(&owner, 42, OrderStatus::Pending, OrderStatus::Cancelled).is_ok());
        assert_eq!(
            authorize_customer_request(&owner, 42, OrderStatus::Confirmed, OrderStatus::Cancelled),
            Err(GateError::Forbidden)
        );
        assert!(authorize_customer_request(&owner, 42, OrderStatus::Shipped, OrderStatus::RefundRequested).is_ok());
        assert_eq!(
            authorize_customer_request(&owner, 41, OrderStatus::Pending, OrderStatus::Cancelled),
            Err(GateError::Forbidden)
        );
        assert_eq!(
            authorize_customer_request(&owner, 42, OrderStatus::Pending, OrderStatus::Confirmed),
            Err(GateError::Forbidden)
        );
    }

    #[test]
    fn test_adjustment_gate() {
        let staff = actor(&[Role::Staff]);
        let finance = actor(&[Role::Finance]);
        let approved = refund_request(ORDER, ApprovalStatus::Approved);
        let rejected = refund_request(ORDER, ApprovalStatus::Rejected);
        let foreign = refund_request(ORDER + 1, ApprovalStatus::Approved);

        assert_eq!(authorize_adjustment(&staff, ORDER, None), Err(GateError::ApprovalRequired));
        assert!(authorize_adjustment(&staff, ORDER, Some(&approved)).is_ok());
        assert_eq!(authorize_adjustment(&staff, ORDER, Some(&rejected)), Err(GateError::ApprovalRequired));
        assert_eq!(authorize_adjustment(&staff, ORDER, Some(&foreign)), Err(GateError::ApprovalRequired));
        assert!(authorize_adjustment(&finance, ORDER, None).is_ok());
        // A supplied reference must hold even for finance
        assert_eq!(authorize_adjustment(&finance, ORDER, Some(&foreign)), Err(GateError::ApprovalRequired));
    }

    #[test]
    fn test_order_visibility() {
        let owner = Actor::new(42, vec![Role::Customer], None);
        let stranger = Actor::new(43, vec![Role::Customer], None);
        let finance = Actor::new(1, vec![Role::Finance], None);
        assert!(can_view_order(&owner, 42, SHOP));
        assert!(!can_view_order(&stranger, 42, SHOP));
        assert!(can_view_order(&actor(&[Role::Staff]), 42, SHOP));
        assert!(can_view_order(&finance, 42, SHOP));
    }

    fn role_strategy() -> impl Strategy<Value = Role> {
        prop::sample::select(vec![
            Role::Admin,
            Role::Manager,
            Role::Finance,
            Role::Staff,
            Role::Delivery,
            Role::Customer,
        ])
    }

    proptest! {
        /// Without finance capability and without an approval, refund states stay closed
        #[test]
        fn prop_refund_gate_holds_for_non_finance(roles in prop::collection::vec(role_strategy(), 1..4)) {
            let actor = Actor::new(1, roles, Some(SHOP));
            prop_assume!(!actor.is_finance_capable());
            for next in [OrderStatus::RefundRequested, OrderStatus::Refunded] {
                prop_assert!(authorize_status_change(&actor, ORDER, SHOP, next, None).is_err());
            }
        }
    }
}
