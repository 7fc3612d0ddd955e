//! Error handling for the Multi-Shop Commerce Platform
//!
//! Provides consistent error responses in Thai and English

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{GateError, TransitionError, UnknownVariant};
use thiserror::Error;

/// A single rejected input field
#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid token")]
    InvalidToken,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_th: String,
    },

    #[error("Validation failed on {} field(s)", .0.len())]
    ValidationFailed(Vec<FieldViolation>),

    #[error("Idempotency key rejected: {0}")]
    IdempotencyConflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Stock sharing disabled from shop {from_shop_id} to shop {to_shop_id}")]
    SharingDisabled { from_shop_id: i64, to_shop_id: i64 },

    #[error("Invalid transfer destination: {0}")]
    InvalidDestination(String),

    #[error("Approval required: {0}")]
    ApprovalRequired(String),

    #[error("Approval not satisfied: {0}")]
    ApprovalNotSatisfied(String),

    // External service errors
    #[error("External service error: {0}")]
    ExternalService(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a single-field validation failure
    pub fn validation(field: &str, message: &str, message_th: &str) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.to_string(),
            message_th: message_th.to_string(),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::InvalidStateTransition(err.to_string())
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Forbidden => AppError::InsufficientPermissions,
            GateError::ApprovalRequired => AppError::ApprovalRequired(
                "an approved refund request for this order is required".to_string(),
            ),
        }
    }
}

impl From<UnknownVariant> for AppError {
    fn from(err: UnknownVariant) -> Self {
        AppError::Internal(format!("Unexpected stored value: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut violations: Vec<FieldViolation> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| FieldViolation {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        violations.sort_by(|a, b| a.field.cmp(&b.field));
        AppError::ValidationFailed(violations)
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_th: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldViolation>>,
}

impl ErrorDetail {
    fn new(code: &str, message_en: impl Into<String>, message_th: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message_en: message_en.into(),
            message_th: message_th.into(),
            field: None,
            fields: None,
        }
    }
}

impl AppError {
    /// Stable machine-readable error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidToken => "INVALID_TOKEN",
            AppError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            AppError::Validation { .. } | AppError::ValidationFailed(_) => "VALIDATION_ERROR",
            AppError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            AppError::SharingDisabled { .. } => "SHARING_DISABLED",
            AppError::InvalidDestination(_) => "INVALID_DESTINATION",
            AppError::ApprovalRequired(_) => "APPROVAL_REQUIRED",
            AppError::ApprovalNotSatisfied(_) => "APPROVAL_NOT_SATISFIED",
            AppError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AppError::Validation { .. } | AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::IdempotencyConflict(_)
            | AppError::InvalidStateTransition(_)
            | AppError::InsufficientStock(_)
            | AppError::SharingDisabled { .. }
            | AppError::InvalidDestination(_)
            | AppError::ApprovalRequired(_)
            | AppError::ApprovalNotSatisfied(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_) | AppError::Internal(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let error_detail = match &self {
            AppError::InvalidToken => {
                ErrorDetail::new(code, "Invalid token", "โทเค็นไม่ถูกต้อง")
            }
            AppError::InsufficientPermissions => ErrorDetail::new(
                code,
                "You do not have permission to perform this action",
                "คุณไม่มีสิทธิ์ในการดำเนินการนี้",
            ),
            AppError::Validation {
                field,
                message,
                message_th,
            } => ErrorDetail {
                field: Some(field.clone()),
                ..ErrorDetail::new(code, message.clone(), message_th.clone())
            },
            AppError::ValidationFailed(violations) => ErrorDetail {
                fields: Some(violations.clone()),
                ..ErrorDetail::new(code, "One or more fields are invalid", "ข้อมูลบางช่องไม่ถูกต้อง")
            },
            AppError::IdempotencyConflict(msg) => ErrorDetail {
                field: Some("X-Idempotency-Key".to_string()),
                ..ErrorDetail::new(code, msg.clone(), format!("คีย์ไม่ถูกต้อง: {}", msg))
            },
            AppError::NotFound(resource) => ErrorDetail::new(
                code,
                format!("{} not found", resource),
                format!("ไม่พบ {}", resource),
            ),
            AppError::InvalidStateTransition(msg) => ErrorDetail::new(
                code,
                msg.clone(),
                format!("ไม่สามารถเปลี่ยนสถานะได้: {}", msg),
            ),
            AppError::InsufficientStock(msg) => ErrorDetail::new(
                code,
                msg.clone(),
                format!("สินค้าคงคลังไม่เพียงพอ: {}", msg),
            ),
            AppError::SharingDisabled { .. } => ErrorDetail::new(
                code,
                self.to_string(),
                "ร้านค้าต้นทางไม่ได้เปิดการแบ่งปันสต็อกให้ร้านค้าปลายทาง",
            ),
            AppError::InvalidDestination(msg) => ErrorDetail::new(
                code,
                msg.clone(),
                format!("ร้านค้าปลายทางไม่ถูกต้อง: {}", msg),
            ),
            AppError::ApprovalRequired(msg) => ErrorDetail::new(
                code,
                msg.clone(),
                format!("ต้องได้รับการอนุมัติก่อน: {}", msg),
            ),
            AppError::ApprovalNotSatisfied(msg) => ErrorDetail::new(
                code,
                msg.clone(),
                format!("คำขออนุมัติไม่ตรงตามเงื่อนไข: {}", msg),
            ),
            AppError::ExternalService(msg) => ErrorDetail::new(
                code,
                format!("External service error: {}", msg),
                format!("เกิดข้อผิดพลาดกับบริการภายนอก: {}", msg),
            ),
            AppError::DatabaseError(_) => ErrorDetail::new(
                code,
                "A database error occurred",
                "เกิดข้อผิดพลาดกับฐานข้อมูล",
            ),
            AppError::Internal(_) | AppError::InternalError(_) => ErrorDetail::new(
                code,
                "An internal server error occurred",
                "เกิดข้อผิดพลาดภายในเซิร์ฟเวอร์",
            ),
        };

        // Log the error for debugging
        tracing::error!("Error: {:?}", self);

        (self.status_code(), Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use shared::OrderStatus;

    #[test]
    fn test_business_failures_are_unprocessable() {
        let errors = [
            AppError::InvalidStateTransition("x".into()),
            AppError::InsufficientStock("x".into()),
            AppError::SharingDisabled {
                from_shop_id: 1,
                to_shop_id: 2,
            },
            AppError::ApprovalRequired("x".into()),
            AppError::ApprovalNotSatisfied("x".into()),
            AppError::IdempotencyConflict("x".into()),
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY, "{:?}", err);
        }
    }

    #[test]
    fn test_gate_errors_map_to_taxonomy() {
        let forbidden: AppError = GateError::Forbidden.into();
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

        let approval: AppError = GateError::ApprovalRequired.into();
        assert_eq!(approval.code(), "APPROVAL_REQUIRED");
    }

    #[test]
    fn test_transition_error_maps_to_invalid_transition() {
        let err: AppError = TransitionError::NotReachable {
            from: OrderStatus::Pending,
            to: OrderStatus::Delivered,
        }
        .into();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
        assert!(err.to_string().contains("pending"));
    }
}
