//! Common types used across the platform

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// GPS coordinates of a delivery address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpsCoordinates {
    pub latitude: Decimal,
    pub longitude: Decimal,
}

impl GpsCoordinates {
    pub fn new(latitude: Decimal, longitude: Decimal) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.latitude.abs() <= Decimal::from(90) && self.longitude.abs() <= Decimal::from(180)
    }
}

/// Roles an authenticated actor may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Finance,
    Staff,
    Delivery,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Finance => "finance",
            Role::Staff => "staff",
            Role::Delivery => "delivery",
            Role::Customer => "customer",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "finance" => Ok(Role::Finance),
            "staff" => Ok(Role::Staff),
            "delivery" => Ok(Role::Delivery),
            "customer" => Ok(Role::Customer),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when a stored or submitted string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(pub String);

/// The authenticated caller of an operation.
///
/// Every service call receives the actor explicitly; nothing reads a
/// request-global "current user".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub roles: Vec<Role>,
    /// Shop the actor works for, if any
    pub shop_id: Option<i64>,
}

impl Actor {
    pub fn new(user_id: i64, roles: Vec<Role>, shop_id: Option<i64>) -> Self {
        Self {
            user_id,
            roles,
            shop_id,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }

    /// Admins bypass shop stock-share checks
    pub fn is_elevated(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// May decide approvals and post adjustments without a prior approval
    pub fn is_finance_capable(&self) -> bool {
        self.has_any_role(&[Role::Admin, Role::Finance])
    }

    pub fn is_staff(&self) -> bool {
        self.roles.iter().any(|r| *r != Role::Customer)
    }

    /// Holds the delivery role and no other staff role
    pub fn is_delivery_only(&self) -> bool {
        self.has_role(Role::Delivery)
            && !self.has_any_role(&[Role::Admin, Role::Manager, Role::Finance, Role::Staff])
    }

    /// Staff bound to `shop_id`, or an admin (who is bound to every shop)
    pub fn works_for(&self, shop_id: i64) -> bool {
        self.is_elevated() || (self.is_staff() && self.shop_id == Some(shop_id))
    }
}

/// Reference to the entity a ledger or audit row is about.
///
/// Stored as a `(subject_type, subject_id)` column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SubjectRef {
    Order(i64),
    Transfer(i64),
    Adjustment(i64),
    ApprovalRequest(i64),
    Payment(i64),
    Variant(i64),
    ShopStockShare(i64),
}

impl SubjectRef {
    pub fn kind(&self) -> &'static str {
        match self {
            SubjectRef::Order(_) => "order",
            SubjectRef::Transfer(_) => "transfer",
            SubjectRef::Adjustment(_) => "adjustment",
            SubjectRef::ApprovalRequest(_) => "approval_request",
            SubjectRef::Payment(_) => "payment",
            SubjectRef::Variant(_) => "variant",
            SubjectRef::ShopStockShare(_) => "shop_stock_share",
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            SubjectRef::Order(id)
            | SubjectRef::Transfer(id)
            | SubjectRef::Adjustment(id)
            | SubjectRef::ApprovalRequest(id)
            | SubjectRef::Payment(id)
            | SubjectRef::Variant(id)
            | SubjectRef::ShopStockShare(id) => id,
        }
    }

    /// Rebuild from the stored column pair
    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "order" => Some(SubjectRef::Order(id)),
            "transfer" => Some(SubjectRef::Transfer(id)),
            "adjustment" => Some(SubjectRef::Adjustment(id)),
            "approval_request" => Some(SubjectRef::ApprovalRequest(id)),
            "payment" => Some(SubjectRef::Payment(id)),
            "variant" => Some(SubjectRef::Variant(id)),
            "shop_stock_share" => Some(SubjectRef::ShopStockShare(id)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_ref_round_trips_through_columns() {
        let refs = [
            SubjectRef::Order(1),
            SubjectRef::Transfer(2),
            SubjectRef::Adjustment(3),
            SubjectRef::ApprovalRequest(4),
            SubjectRef::Payment(5),
            SubjectRef::Variant(6),
            SubjectRef::ShopStockShare(7),
        ];
        for r in refs {
            assert_eq!(SubjectRef::from_parts(r.kind(), r.id()), Some(r));
        }
        assert_eq!(SubjectRef::from_parts("lot", 1), None);
    }

    #[test]
    fn test_subject_ref_serializes_as_tagged_union() {
        let json = serde_json::to_value(SubjectRef::Order(42)).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "order", "id": 42 }));
    }

    #[test]
    fn test_actor_capabilities() {
        let admin = Actor::new(1, vec![Role::Admin], None);
        assert!(admin.is_elevated());
        assert!(admin.is_finance_capable());
        assert!(admin.works_for(99));

        let finance = Actor::new(2, vec![Role::Finance], Some(1));
        assert!(!finance.is_elevated());
        assert!(finance.is_finance_capable());

        let rider = Actor::new(3, vec![Role::Delivery], Some(1));
        assert!(rider.is_delivery_only());
        assert!(rider.works_for(1));
        assert!(!rider.works_for(2));

        let rider_manager = Actor::new(4, vec![Role::Delivery, Role::Manager], Some(1));
        assert!(!rider_manager.is_delivery_only());

        let customer = Actor::new(5, vec![Role::Customer], None);
        assert!(!customer.is_staff());
        assert!(!customer.works_for(1));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("finance".parse::<Role>(), Ok(Role::Finance));
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_gps_coordinates_bounds() {
        assert!(GpsCoordinates::new(Decimal::from(13), Decimal::from(100)).is_valid());
        assert!(!GpsCoordinates::new(Decimal::from(91), Decimal::ZERO).is_valid());
    }
}
