//! Public catalog reads and admin catalog writes.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{ProductId, VariantId};
use domain::{
    NewProduct, NewVariant, Page, Product, ProductFilter, ProductUpdate, VariantUpdate,
};
use serde::Deserialize;
use services::ProductDetail;
use store::Store;

use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Deserialize)]
pub struct CreateProductRequest {
    #[serde(flatten)]
    pub product: NewProduct,
    #[serde(default)]
    pub variants: Vec<NewVariant>,
}

/// GET /products
pub async fn list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<Page<Product>>, ApiError> {
    Ok(Json(state.catalog.list_products(&filter).await?))
}

/// GET /products/search?q=
pub async fn search<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.catalog.search(&query.q).await?))
}

/// GET /products/trending
pub async fn trending<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.catalog.trending().await?))
}

/// GET /products/categories
pub async fn categories<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.catalog.categories().await?))
}

/// GET /products/brands
pub async fn brands<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.catalog.brands().await?))
}

/// GET /products/{id}
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ProductId>,
) -> Result<Json<ProductDetail>, ApiError> {
    Ok(Json(state.catalog.get_product(id).await?))
}

/// POST /admin/products
#[tracing::instrument(skip(state, req), fields(user_id = %caller.user_id()))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = state
        .catalog
        .create_product(&caller.0, req.product, req.variants)
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// PATCH /admin/products/{id}
pub async fn update<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<ProductId>,
    Json(patch): Json<ProductUpdate>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.catalog.update_product(&caller.0, id, patch).await?))
}

/// DELETE /admin/products/{id}: archives the product.
pub async fn archive<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<ProductId>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.catalog.archive_product(&caller.0, id).await?))
}

/// POST /admin/products/{id}/variants
pub async fn add_variant<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<ProductId>,
    Json(data): Json<NewVariant>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = state.catalog.add_variant(&caller.0, id, data).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// PATCH /admin/variants/{id}
pub async fn update_variant<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<VariantId>,
    Json(patch): Json<VariantUpdate>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.catalog.update_variant(&caller.0, id, patch).await?))
}

/// DELETE /admin/variants/{id}
pub async fn remove_variant<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<VariantId>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.catalog.remove_variant(&caller.0, id).await?))
}
