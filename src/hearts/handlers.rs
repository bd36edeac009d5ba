use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use super::services;
use crate::{auth::jwt::AuthUser, catalog::Store, error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/stores/:id/heart", post(toggle_heart))
        .route("/hearts", get(hearted_stores))
}

#[derive(Debug, Serialize)]
pub struct HeartsResponse {
    pub hearts: Vec<Uuid>,
}

#[instrument(skip(state))]
pub async fn toggle_heart(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(store_id): Path<Uuid>,
) -> Result<Json<HeartsResponse>, AppError> {
    let hearts = services::toggle_heart(state.catalog.as_ref(), user_id, store_id).await?;
    Ok(Json(HeartsResponse { hearts }))
}

#[instrument(skip(state))]
pub async fn hearted_stores(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Store>>, AppError> {
    Ok(Json(
        services::hearted_stores(state.catalog.as_ref(), user_id).await?,
    ))
}
