//! HTTP handlers for order endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use shared::{AuditLog, Order, OrderStatus, SubjectRef};

use crate::error::{AppError, AppResult};
use crate::middleware::{CurrentUser, RequestMeta};
use crate::services::order::{
    CreateOrderInput, CustomerRequestInput, OrderPlacement, OrderService, OrderWithItems,
    UpdateStatusInput,
};
use crate::services::AuditLogger;
use crate::AppState;

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

fn order_service(state: &AppState) -> OrderService {
    OrderService::new(state.db.clone(), state.config.orders.clone())
}

/// Place an order; 201 when created, 200 when an earlier call is replayed
pub async fn create_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    headers: HeaderMap,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<(StatusCode, Json<OrderPlacement>)> {
    let key = headers
        .get(IDEMPOTENCY_HEADER)
        .map(|v| v.to_str().map(str::to_string))
        .transpose()
        .map_err(|_| AppError::IdempotencyConflict("key must be visible ASCII".to_string()))?;

    let actor = current_user.0.actor();
    let placement = order_service(&state)
        .create_order(&actor, &meta, input, key)
        .await?;

    let status = if placement.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(placement)))
}

/// List orders visible to the caller
pub async fn list_orders(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<Order>>> {
    let orders = order_service(&state)
        .list_orders(&current_user.0.actor())
        .await?;
    Ok(Json(orders))
}

/// Get one order with its items
pub async fn get_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<i64>,
) -> AppResult<Json<OrderWithItems>> {
    let order = order_service(&state)
        .get_order(&current_user.0.actor(), order_id)
        .await?;
    Ok(Json(order))
}

/// Staff status change
pub async fn update_status(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(order_id): Path<i64>,
    Json(input): Json<UpdateStatusInput>,
) -> AppResult<Json<OrderWithItems>> {
    let order = order_service(&state)
        .update_status(&current_user.0.actor(), &meta, order_id, input)
        .await?;
    Ok(Json(order))
}

async fn customer_request(
    state: AppState,
    current_user: CurrentUser,
    meta: RequestMeta,
    order_id: i64,
    next: OrderStatus,
    input: Option<Json<CustomerRequestInput>>,
) -> AppResult<Json<OrderWithItems>> {
    let input = input.map(|Json(i)| i).unwrap_or_default();
    let order = order_service(&state)
        .customer_request(&current_user.0.actor(), &meta, order_id, next, input)
        .await?;
    Ok(Json(order))
}

/// Owner cancels a pending order
pub async fn cancel_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(order_id): Path<i64>,
    input: Option<Json<CustomerRequestInput>>,
) -> AppResult<Json<OrderWithItems>> {
    customer_request(state, current_user, meta, order_id, OrderStatus::Cancelled, input).await
}

/// Owner asks for a refund
pub async fn request_refund(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(order_id): Path<i64>,
    input: Option<Json<CustomerRequestInput>>,
) -> AppResult<Json<OrderWithItems>> {
    customer_request(state, current_user, meta, order_id, OrderStatus::RefundRequested, input).await
}

/// Owner asks to return a delivered order
pub async fn request_return(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(order_id): Path<i64>,
    input: Option<Json<CustomerRequestInput>>,
) -> AppResult<Json<OrderWithItems>> {
    customer_request(state, current_user, meta, order_id, OrderStatus::ReturnRequested, input).await
}

/// Audit trail of an order
pub async fn order_audit(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<i64>,
) -> AppResult<Json<Vec<AuditLog>>> {
    // Visibility check
    order_service(&state)
        .get_order(&current_user.0.actor(), order_id)
        .await?;
    let entries = AuditLogger::for_subject(&state.db, SubjectRef::Order(order_id)).await?;
    Ok(Json(entries))
}
