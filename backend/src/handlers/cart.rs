//! HTTP handlers for the caller's cart

use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::cart::{CartService, CartView, SetCartItemInput};
use crate::AppState;

/// Get the cart grouped by shop
pub async fn get_cart(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<CartView>> {
    let service = CartService::new(state.db);
    let cart = service.view(&current_user.0.actor()).await?;
    Ok(Json(cart))
}

/// Set the quantity of one cart line
pub async fn set_cart_item(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<SetCartItemInput>,
) -> AppResult<Json<CartView>> {
    let service = CartService::new(state.db);
    let cart = service.set_item(&current_user.0.actor(), input).await?;
    Ok(Json(cart))
}
