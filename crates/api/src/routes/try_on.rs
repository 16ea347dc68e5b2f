//! Virtual try-on endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::TryOnId;
use domain::{TryOnKind, TryOnRecord};
use serde::Deserialize;
use services::SubmitTryOn;
use store::Store;

use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SaveUploadsRequest {
    pub urls: Vec<String>,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    #[serde(default = "DeleteQuery::default_kind")]
    pub kind: TryOnKind,
}

impl DeleteQuery {
    fn default_kind() -> TryOnKind {
        TryOnKind::Generated
    }
}

/// POST /try-on: submits a generation job; answers before it finishes.
#[tracing::instrument(skip(state, req), fields(user_id = %caller.user_id()))]
pub async fn submit<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Json(req): Json<SubmitTryOn>,
) -> Result<(StatusCode, Json<TryOnRecord>), ApiError> {
    let record = state.try_on.submit(caller.user_id(), req).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// GET /try-on/history
pub async fn history<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
) -> Result<Json<Vec<TryOnRecord>>, ApiError> {
    Ok(Json(state.try_on.generated_history(caller.user_id()).await?))
}

/// GET /try-on/uploads
pub async fn uploads<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
) -> Result<Json<Vec<TryOnRecord>>, ApiError> {
    Ok(Json(state.try_on.uploads(caller.user_id()).await?))
}

/// POST /try-on/uploads: records already-stored reference images.
pub async fn save_uploads<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Json(req): Json<SaveUploadsRequest>,
) -> Result<(StatusCode, Json<TryOnRecord>), ApiError> {
    let record = state.try_on.save_uploads(caller.user_id(), req.urls).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// DELETE /try-on/{id}?kind=GENERATED|REFERENCE
pub async fn delete<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Identity,
    Path(id): Path<TryOnId>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    state.try_on.delete(id, caller.user_id(), query.kind).await?;
    Ok(StatusCode::NO_CONTENT)
}
