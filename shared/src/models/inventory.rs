//! Stock ledger and inter-shop transfer models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{SubjectRef, UnknownVariant};

/// Why a variant's stock level changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    OrderPlaced,
    OrderRestock,
    TransferOut,
    TransferIn,
    ManualAdjustment,
    ManualSet,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::OrderPlaced => "order_placed",
            MovementType::OrderRestock => "order_restock",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
            MovementType::ManualAdjustment => "manual_adjustment",
            MovementType::ManualSet => "manual_set",
        }
    }
}

impl std::str::FromStr for MovementType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_placed" => Ok(MovementType::OrderPlaced),
            "order_restock" => Ok(MovementType::OrderRestock),
            "transfer_out" => Ok(MovementType::TransferOut),
            "transfer_in" => Ok(MovementType::TransferIn),
            "manual_adjustment" => Ok(MovementType::ManualAdjustment),
            "manual_set" => Ok(MovementType::ManualSet),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Immutable record of one stock change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: i64,
    pub event_type: MovementType,
    pub product_id: i64,
    pub variant_id: i64,
    pub shop_id: i64,
    /// Signed change applied to the variant
    pub quantity: i32,
    pub unit_price: Decimal,
    pub reference: Option<SubjectRef>,
    pub actor_id: Option<i64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Directed permission for stock to flow between two shops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopStockShare {
    pub id: i64,
    pub from_shop_id: i64,
    pub to_shop_id: i64,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Completed,
    Blocked,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransferStatus::Completed),
            "blocked" => Ok(TransferStatus::Blocked),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Immutable record of one transfer attempt between shops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockTransfer {
    pub id: i64,
    pub source_variant_id: i64,
    /// `None` when the transfer was blocked before a destination existed
    pub destination_variant_id: Option<i64>,
    pub from_shop_id: i64,
    pub to_shop_id: i64,
    pub quantity: i32,
    pub initiated_by: i64,
    pub status: TransferStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Resulting level after applying `delta`, or `None` if it would go negative
pub fn apply_stock_delta(current: i32, delta: i32) -> Option<i32> {
    current.checked_add(delta).filter(|level| *level >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_apply_stock_delta() {
        assert_eq!(apply_stock_delta(10, -4), Some(6));
        assert_eq!(apply_stock_delta(3, -3), Some(0));
        assert_eq!(apply_stock_delta(3, -4), None);
        assert_eq!(apply_stock_delta(i32::MAX, 1), None);
    }

    proptest! {
        #[test]
        fn prop_stock_never_negative(start in 0i32..1000, deltas in prop::collection::vec(-50i32..50, 0..40)) {
            let mut level = start;
            for delta in deltas {
                if let Some(next) = apply_stock_delta(level, delta) {
                    level = next;
                }
                prop_assert!(level >= 0);
            }
        }

        #[test]
        fn prop_transfer_conserves_stock(source in 0i32..1000, dest in 0i32..1000, qty in 1i32..1000) {
            if let Some(source_after) = apply_stock_delta(source, -qty) {
                let dest_after = apply_stock_delta(dest, qty).unwrap();
                prop_assert_eq!(source_after + dest_after, source + dest);
            } else {
                prop_assert!(qty > source);
            }
        }
    }
}
