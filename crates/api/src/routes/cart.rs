//! Cart endpoints. All of them act on the caller's own cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::CartLineId;
use domain::{CartLine, CartSummary, QuantityChange};
use serde::{Deserialize, Serialize};
use services::AddToCart;
use store::Store;

use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

#[derive(Serialize)]
pub struct ClearedResponse {
    pub removed: u64,
}

/// GET /cart
pub async fn summary<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
) -> Result<Json<CartSummary>, ApiError> {
    Ok(Json(state.cart.get_summary(caller.user_id()).await?))
}

/// POST /cart
pub async fn add<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Json(req): Json<AddToCart>,
) -> Result<(StatusCode, Json<CartLine>), ApiError> {
    let line = state.cart.add_or_increment(caller.user_id(), req).await?;
    Ok((StatusCode::CREATED, Json(line)))
}

/// PATCH /cart/{line_id}
pub async fn set_quantity<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(line_id): Path<CartLineId>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<QuantityChange>, ApiError> {
    let change = state
        .cart
        .set_quantity(caller.user_id(), line_id, req.quantity)
        .await?;
    Ok(Json(change))
}

/// DELETE /cart/{line_id}
pub async fn remove<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(line_id): Path<CartLineId>,
) -> Result<StatusCode, ApiError> {
    state.cart.remove(caller.user_id(), line_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart
pub async fn clear<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
) -> Result<Json<ClearedResponse>, ApiError> {
    let removed = state.cart.clear(caller.user_id()).await?;
    Ok(Json(ClearedResponse { removed }))
}
