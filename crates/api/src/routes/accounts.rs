//! Registration, code login, addresses and favorites.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{AddressId, ProductId};
use domain::{Address, FavoriteToggle, NewAddress, NewUser, Page, Product, User};
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendCodeRequest {
    pub phone: String,
}

#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    pub phone: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "PageQuery::default_page")]
    pub page: u32,
    #[serde(default = "PageQuery::default_limit")]
    pub limit: u32,
}

impl PageQuery {
    fn default_page() -> u32 {
        1
    }

    fn default_limit() -> u32 {
        10
    }
}

#[derive(Serialize)]
pub struct ToggleResponse {
    pub result: FavoriteToggle,
}

#[derive(Serialize)]
pub struct FavoriteStatus {
    pub is_favorite: bool,
}

/// POST /auth/register
pub async fn register<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.accounts.register(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /auth/otp
pub async fn send_code<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<SendCodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.accounts.send_code(&req.phone).await?;
    Ok(Json(MessageResponse {
        message: "OTP sent successfully",
    }))
}

/// POST /auth/otp/verify
pub async fn verify_code<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(
        state.accounts.login_with_code(&req.phone, &req.code).await?,
    ))
}

/// GET /me
pub async fn me<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.accounts.get_user(caller.user_id()).await?))
}

/// GET /addresses
pub async fn list_addresses<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
) -> Result<Json<Vec<Address>>, ApiError> {
    Ok(Json(state.addresses.list(caller.user_id()).await?))
}

/// POST /addresses
pub async fn create_address<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Json(req): Json<NewAddress>,
) -> Result<(StatusCode, Json<Address>), ApiError> {
    let address = state.addresses.create(caller.user_id(), req).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

/// POST /addresses/{id}/default
pub async fn set_default_address<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<AddressId>,
) -> Result<Json<Address>, ApiError> {
    Ok(Json(state.addresses.set_default(id, caller.user_id()).await?))
}

/// DELETE /addresses/{id}
pub async fn delete_address<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<AddressId>,
) -> Result<StatusCode, ApiError> {
    state.addresses.delete(id, caller.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /favorites
pub async fn list_favorites<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Product>>, ApiError> {
    let page = state
        .favorites
        .list(caller.user_id(), query.page, query.limit)
        .await?;
    Ok(Json(page))
}

/// POST /favorites/{product_id}
pub async fn toggle_favorite<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(product_id): Path<ProductId>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let result = state.favorites.toggle(caller.user_id(), product_id).await?;
    Ok(Json(ToggleResponse { result }))
}

/// GET /favorites/{product_id}
pub async fn favorite_status<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(product_id): Path<ProductId>,
) -> Result<Json<FavoriteStatus>, ApiError> {
    let is_favorite = state
        .favorites
        .is_favorite(caller.user_id(), product_id)
        .await?;
    Ok(Json(FavoriteStatus { is_favorite }))
}
