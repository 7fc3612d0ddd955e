//! HTTP handlers for approvals, adjustments and payments

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{ApprovalRequest, Payment};

use crate::error::AppResult;
use crate::middleware::{CurrentUser, RequestMeta};
use crate::services::finance::{
    AdjustmentRecord, CreateAdjustmentInput, DecideApprovalInput, FinanceService,
    PaymentSummary, RecordPaymentInput, RequestApprovalInput,
};
use crate::AppState;

/// Open an approval request on an order
pub async fn request_approval(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(order_id): Path<i64>,
    Json(input): Json<RequestApprovalInput>,
) -> AppResult<(StatusCode, Json<ApprovalRequest>)> {
    let service = FinanceService::new(state.db);
    let request = service
        .request_approval(&current_user.0.actor(), &meta, order_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// List approval requests of an order
pub async fn list_approvals(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<i64>,
) -> AppResult<Json<Vec<ApprovalRequest>>> {
    let service = FinanceService::new(state.db);
    let requests = service
        .list_approvals(&current_user.0.actor(), order_id)
        .await?;
    Ok(Json(requests))
}

async fn decide(
    state: AppState,
    current_user: CurrentUser,
    meta: RequestMeta,
    request_id: i64,
    approve: bool,
    input: Option<Json<DecideApprovalInput>>,
) -> AppResult<Json<ApprovalRequest>> {
    let input = input.map(|Json(i)| i).unwrap_or_default();
    let service = FinanceService::new(state.db);
    let request = service
        .decide_approval(&current_user.0.actor(), &meta, request_id, approve, input)
        .await?;
    Ok(Json(request))
}

/// Approve a pending request
pub async fn approve(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(request_id): Path<i64>,
    input: Option<Json<DecideApprovalInput>>,
) -> AppResult<Json<ApprovalRequest>> {
    decide(state, current_user, meta, request_id, true, input).await
}

/// Reject a pending request
pub async fn reject(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(request_id): Path<i64>,
    input: Option<Json<DecideApprovalInput>>,
) -> AppResult<Json<ApprovalRequest>> {
    decide(state, current_user, meta, request_id, false, input).await
}

/// Create a financial adjustment
pub async fn create_adjustment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(order_id): Path<i64>,
    Json(input): Json<CreateAdjustmentInput>,
) -> AppResult<(StatusCode, Json<AdjustmentRecord>)> {
    let service = FinanceService::new(state.db);
    let record = service
        .create_adjustment(&current_user.0.actor(), &meta, order_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Append a payment event
pub async fn record_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(order_id): Path<i64>,
    Json(input): Json<RecordPaymentInput>,
) -> AppResult<(StatusCode, Json<Payment>)> {
    let service = FinanceService::new(state.db);
    let payment = service
        .record_payment_event(&current_user.0.actor(), &meta, order_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Payment ledger of an order
pub async fn list_payments(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<i64>,
) -> AppResult<Json<PaymentSummary>> {
    let service = FinanceService::new(state.db);
    let summary = service
        .list_payments(&current_user.0.actor(), order_id)
        .await?;
    Ok(Json(summary))
}
