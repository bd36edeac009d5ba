use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{dto::ReviewRequest, services};
use crate::{auth::jwt::AuthUser, catalog::Review, error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/reviews/:id", post(add_review))
}

#[instrument(skip(state, payload))]
pub async fn add_review(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(store_id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    let review = services::add_review(state.catalog.as_ref(), user_id, store_id, payload).await?;
    Ok((StatusCode::CREATED, Json(review)))
}
