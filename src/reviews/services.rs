use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::ReviewRequest;
use crate::{
    catalog::{Catalog, Review, ReviewDraft},
    error::AppError,
};

/// Adds a review by `author` to an existing store.
#[instrument(skip(catalog, request))]
pub async fn add_review(
    catalog: &dyn Catalog,
    author: Uuid,
    store_id: Uuid,
    request: ReviewRequest,
) -> Result<Review, AppError> {
    let rating = request.rating.ok_or(AppError::required("rating"))?;
    if !(1..=5).contains(&rating) {
        return Err(AppError::Validation {
            field: "rating",
            reason: "must be between 1 and 5",
        });
    }
    let text = request.text.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Err(AppError::required("text"));
    }

    if catalog.find_store(store_id).await?.is_none() {
        return Err(AppError::NotFound("store"));
    }

    let review = catalog
        .insert_review(ReviewDraft {
            author,
            store: store_id,
            rating,
            text,
        })
        .await?;
    info!(review_id = %review.id, store_id = %store_id, rating, "review added");
    Ok(review)
}
