//! WebAssembly module for the Multi-Shop Commerce back office
//!
//! Provides client-side previews for:
//! - Order status buttons (allowed transitions)
//! - Per-shop cart split and totals
//! - Payment ledger sign conventions
//! - Input validation before submission

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::debug_1(&JsValue::from_str("multi-shop commerce wasm loaded"));
}

fn parse_status(status: &str) -> Result<OrderStatus, JsValue> {
    OrderStatus::from_str(status)
        .map_err(|e| JsValue::from_str(&format!("Invalid order status: {}", e)))
}

fn parse_decimal(value: &str) -> Result<Decimal, JsValue> {
    Decimal::from_str(value).map_err(|e| JsValue::from_str(&format!("Invalid amount: {}", e)))
}

/// Whether an order may move from `current` to `next`
#[wasm_bindgen]
pub fn can_transition(current: &str, next: &str) -> Result<bool, JsValue> {
    Ok(parse_status(current)?.can_transition_to(parse_status(next)?))
}

/// Whether no further status change is possible
#[wasm_bindgen]
pub fn is_terminal_status(status: &str) -> Result<bool, JsValue> {
    Ok(parse_status(status)?.is_terminal())
}

/// Statuses reachable from `status`, for rendering action buttons
#[wasm_bindgen]
pub fn next_statuses(status: &str) -> Result<js_sys::Array, JsValue> {
    let current = parse_status(status)?;
    Ok(current
        .next_states()
        .iter()
        .map(|next| JsValue::from_str(next.as_str()))
        .collect())
}

/// Preview how a cart splits into per-shop orders.
///
/// Takes a JSON array of priced lines and returns a JSON object keyed by
/// shop id with each group's totals.
#[wasm_bindgen]
pub fn preview_cart_split(lines_json: &str) -> Result<String, JsValue> {
    let lines: Vec<PricedLine> = serde_json::from_str(lines_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid cart JSON: {}", e)))?;

    let totals: BTreeMap<i64, OrderTotals> = split_by_shop(lines)
        .into_iter()
        .map(|(shop_id, group)| (shop_id, OrderTotals::from_lines(&group)))
        .collect();

    serde_json::to_string(&totals).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Signed ledger contribution of a payment event, as a decimal string
#[wasm_bindgen]
pub fn signed_payment_amount(event_type: &str, amount: &str) -> Result<String, JsValue> {
    let event = PaymentEventType::from_str(event_type)
        .map_err(|e| JsValue::from_str(&format!("Invalid payment event: {}", e)))?;
    Ok(event.signed_amount(parse_decimal(amount)?).to_string())
}

/// Validate a money amount entered in a form
#[wasm_bindgen]
pub fn is_valid_amount(amount: &str) -> bool {
    Decimal::from_str(amount)
        .map(|value| validate_positive_amount(value).is_ok())
        .unwrap_or(false)
}

/// Validate a client-generated idempotency key
#[wasm_bindgen]
pub fn is_valid_idempotency_key(key: &str) -> bool {
    validate_idempotency_key(key, MAX_IDEMPOTENCY_KEY_LEN).is_ok()
}

/// Validate a checkout phone number
#[wasm_bindgen]
pub fn is_valid_phone(phone: &str) -> bool {
    validate_phone(phone).is_ok()
}

/// SKU a transfer will give the destination product if none matches
#[wasm_bindgen]
pub fn preview_shadow_sku(source_sku: &str, shop_id: i64) -> String {
    shadow_product_sku(source_sku, shop_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_transition() {
        assert!(can_transition("pending", "confirmed").unwrap());
        assert!(can_transition("shipped", "delivered").unwrap());
        assert!(!can_transition("delivered", "pending").unwrap());
        assert!(!can_transition("refunded", "cancelled").unwrap());
    }

    #[test]
    fn test_is_terminal_status() {
        assert!(is_terminal_status("cancelled").unwrap());
        assert!(is_terminal_status("refunded").unwrap());
        assert!(!is_terminal_status("pending").unwrap());
    }

    #[test]
    fn test_preview_cart_split() {
        let lines = r#"[
            {"variant_id": 1, "product_id": 1, "shop_id": 2, "quantity": 2, "unit_price": "10.00"},
            {"variant_id": 5, "product_id": 4, "shop_id": 7, "quantity": 1, "unit_price": "99.50"},
            {"variant_id": 3, "product_id": 2, "shop_id": 2, "quantity": 3, "unit_price": "5.00"}
        ]"#;

        let json = preview_cart_split(lines).unwrap();
        let totals: BTreeMap<i64, OrderTotals> = serde_json::from_str(&json).unwrap();

        assert_eq!(totals.len(), 2);
        assert_eq!(totals[&2].total_amount, Decimal::from(35));
        assert_eq!(totals[&7].total_amount, Decimal::from_str("99.50").unwrap());
    }

    #[test]
    fn test_signed_payment_amount() {
        assert_eq!(signed_payment_amount("deposit", "100").unwrap(), "100");
        assert_eq!(signed_payment_amount("refund", "40").unwrap(), "-40");
    }

    #[test]
    fn test_form_validations() {
        assert!(is_valid_amount("12.50"));
        assert!(!is_valid_amount("0"));
        assert!(!is_valid_amount("abc"));
        assert!(is_valid_idempotency_key("checkout-1"));
        assert!(!is_valid_idempotency_key(""));
        assert!(is_valid_phone("081-234-5678"));
        assert_eq!(preview_shadow_sku("TEE-01", 4), "TEE-01-S4");
    }
}
