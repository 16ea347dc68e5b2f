//! Checkout, payment and order tracking endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{AddressId, OrderId};
use domain::{Order, OrderStatus, PaymentType};
use gateways::PaymentSession;
use serde::Deserialize;
use services::{OrderTracking, VerificationOutcome};
use store::Store;

use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub address_id: AddressId,
    pub payment_type: PaymentType,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /orders: turns the caller's cart into a pending order.
#[tracing::instrument(skip(state, req), fields(user_id = %caller.user_id()))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .orders
        .create_from_cart(caller.user_id(), req.address_id, req.payment_type)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders
pub async fn list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.list_for_user(caller.user_id()).await?))
}

/// GET /orders/{id}
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.get_order(id, caller.user_id()).await?))
}

/// GET /orders/{id}/tracking
pub async fn tracking<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderTracking>, ApiError> {
    Ok(Json(state.orders.tracking(id, caller.user_id()).await?))
}

/// POST /orders/{id}/pay: opens a provider payment session.
pub async fn pay<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<OrderId>,
) -> Result<Json<PaymentSession>, ApiError> {
    Ok(Json(state.orders.initiate_payment(id, caller.user_id()).await?))
}

/// POST /orders/{id}/verify: asks the provider and confirms if paid.
pub async fn verify<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<OrderId>,
) -> Result<Json<VerificationOutcome>, ApiError> {
    Ok(Json(
        state.orders.verify_and_complete(id, caller.user_id()).await?,
    ))
}

/// PATCH /admin/orders/{id}/status
pub async fn update_status<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<OrderId>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orders
        .update_status(&caller.0, id, req.status, req.description)
        .await?;
    Ok(Json(order))
}
