//! HTTP handlers for inventory endpoints

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use shared::{ShopStockShare, StockTransfer};

use crate::error::AppResult;
use crate::middleware::{CurrentUser, RequestMeta};
use crate::services::inventory::{AdjustStockInput, InventoryService, SetStockInput, VariantStock};
use crate::services::transfer::{SetShareInput, TransferInput, TransferService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MovementQuery {
    pub format: Option<String>, // "json" or "csv"
}

#[derive(Debug, Deserialize)]
pub struct TransferQuery {
    pub shop_id: Option<i64>,
}

/// Transfer stock to another shop
pub async fn transfer_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Json(input): Json<TransferInput>,
) -> AppResult<Json<StockTransfer>> {
    let service = TransferService::new(state.db);
    let transfer = service
        .transfer(&current_user.0.actor(), &meta, input)
        .await?;
    Ok(Json(transfer))
}

/// Transfers into or out of a shop
pub async fn list_transfers(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<TransferQuery>,
) -> AppResult<Json<Vec<StockTransfer>>> {
    let service = TransferService::new(state.db);
    let transfers = service
        .list_transfers(&current_user.0.actor(), query.shop_id)
        .await?;
    Ok(Json(transfers))
}

/// Enable or disable sharing between two shops
pub async fn set_share(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Json(input): Json<SetShareInput>,
) -> AppResult<Json<ShopStockShare>> {
    let service = TransferService::new(state.db);
    let share = service
        .set_share(&current_user.0.actor(), &meta, input)
        .await?;
    Ok(Json(share))
}

/// Shares visible to the caller
pub async fn list_shares(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<ShopStockShare>>> {
    let service = TransferService::new(state.db);
    let shares = service.list_shares(&current_user.0.actor()).await?;
    Ok(Json(shares))
}

/// Relative stock correction
pub async fn adjust_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(variant_id): Path<i64>,
    Json(input): Json<AdjustStockInput>,
) -> AppResult<Json<VariantStock>> {
    let service = InventoryService::new(state.db);
    let stock = service
        .adjust(&current_user.0.actor(), &meta, variant_id, input)
        .await?;
    Ok(Json(stock))
}

/// Absolute stock level
pub async fn set_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    meta: RequestMeta,
    Path(variant_id): Path<i64>,
    Json(input): Json<SetStockInput>,
) -> AppResult<Json<VariantStock>> {
    let service = InventoryService::new(state.db);
    let stock = service
        .set_level(&current_user.0.actor(), &meta, variant_id, input)
        .await?;
    Ok(Json(stock))
}

/// Movement history of a variant as JSON or CSV
pub async fn variant_movements(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(variant_id): Path<i64>,
    Query(query): Query<MovementQuery>,
) -> AppResult<Response> {
    let service = InventoryService::new(state.db);
    let movements = service
        .movements(&current_user.0.actor(), variant_id)
        .await?;

    if query.format.as_deref() == Some("csv") {
        let csv = InventoryService::export_to_csv(&movements)?;
        let disposition = format!("attachment; filename=\"variant_{}_movements.csv\"", variant_id);
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            csv,
        )
            .into_response());
    }

    Ok(Json(movements).into_response())
}
