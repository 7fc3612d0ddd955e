//! Validation utilities for the Multi-Shop Commerce Platform

use rust_decimal::Decimal;

/// Longest accepted `X-Idempotency-Key`
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 120;

// ============================================================================
// Order Intake Validations
// ============================================================================

/// Validate an idempotency key: 1..=max_len visible ASCII characters
pub fn validate_idempotency_key(key: &str, max_len: usize) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("Idempotency key must not be empty");
    }
    if key.len() > max_len {
        return Err("Idempotency key is too long");
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Idempotency key must be visible ASCII without spaces");
    }
    Ok(())
}

/// Validate a contact phone number
/// Accepts: 0812345678, 081-234-5678, +66 81 234 5678
pub fn validate_phone(phone: &str) -> Result<(), &'static str> {
    if !phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '+' | '(' | ')'))
    {
        return Err("Phone number contains invalid characters");
    }
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if !(9..=15).contains(&digits) {
        return Err("Phone number must have 9 to 15 digits");
    }
    Ok(())
}

/// Validate a requested line quantity
pub fn validate_quantity(quantity: i32) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be positive");
    }
    Ok(())
}

// ============================================================================
// Financial Validations
// ============================================================================

/// Validate a money amount: positive with at most two decimal places
pub fn validate_positive_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount <= Decimal::ZERO {
        return Err("Amount must be positive");
    }
    if amount.scale() > 2 && amount.normalize().scale() > 2 {
        return Err("Amount must have at most two decimal places");
    }
    Ok(())
}

/// Validate a free-text reason attached to a governed action
pub fn validate_reason(reason: &str) -> Result<(), &'static str> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err("Reason is required");
    }
    if trimmed.chars().count() > 1000 {
        return Err("Reason must be at most 1000 characters");
    }
    Ok(())
}
