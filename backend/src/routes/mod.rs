//! Route definitions for the Multi-Shop Commerce Platform

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - orders and their financial ledger
        .nest("/orders", order_routes(state))
        // Protected routes - approval decisions
        .nest("/approvals", approval_routes(state))
        // Protected routes - stock and transfers
        .nest("/inventory", inventory_routes(state))
        // Protected routes - cart
        .nest("/cart", cart_routes(state))
}

/// Order routes (protected)
fn order_routes(state: &AppState) -> Router<AppState> {
    use handlers::{finance, orders};

    Router::new()
        .route("/", get(orders::list_orders).post(orders::create_order))
        .route("/:order_id", get(orders::get_order))
        .route("/:order_id/status", patch(orders::update_status))
        .route("/:order_id/cancel", post(orders::cancel_order))
        .route("/:order_id/refund-request", post(orders::request_refund))
        .route("/:order_id/return-request", post(orders::request_return))
        .route("/:order_id/audit", get(orders::order_audit))
        .route(
            "/:order_id/approvals",
            get(finance::list_approvals).post(finance::request_approval),
        )
        .route("/:order_id/adjustments", post(finance::create_adjustment))
        .route(
            "/:order_id/payments",
            get(finance::list_payments).post(finance::record_payment),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

/// Approval decision routes (protected)
fn approval_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/:request_id/approve", patch(handlers::finance::approve))
        .route("/:request_id/reject", patch(handlers::finance::reject))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

/// Inventory routes (protected)
fn inventory_routes(state: &AppState) -> Router<AppState> {
    use handlers::inventory;

    Router::new()
        .route("/transfer", post(inventory::transfer_stock))
        .route("/transfers", get(inventory::list_transfers))
        .route("/shares", get(inventory::list_shares).put(inventory::set_share))
        .route("/variants/:variant_id/adjust", post(inventory::adjust_stock))
        .route("/variants/:variant_id/stock", put(inventory::set_stock))
        .route("/variants/:variant_id/movements", get(inventory::variant_movements))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

/// Cart routes (protected)
fn cart_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::cart::get_cart))
        .route("/items", put(handlers::cart::set_cart_item))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}
