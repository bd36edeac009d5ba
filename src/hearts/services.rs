use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    catalog::{Catalog, Store},
    error::AppError,
};

/// Adds the store to the user's hearts if absent, removes it if present, and
/// returns the updated set. The store id is not checked against the catalog.
#[instrument(skip(catalog))]
pub async fn toggle_heart(
    catalog: &dyn Catalog,
    user_id: Uuid,
    store_id: Uuid,
) -> Result<Vec<Uuid>, AppError> {
    let hearts = catalog
        .toggle_heart(user_id, store_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    debug!(hearted = hearts.contains(&store_id), total = hearts.len(), "heart toggled");
    Ok(hearts)
}

/// Stores the user has hearted.
pub async fn hearted_stores(catalog: &dyn Catalog, user_id: Uuid) -> Result<Vec<Store>, AppError> {
    let user = catalog
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    if user.hearts.is_empty() {
        return Ok(Vec::new());
    }
    Ok(catalog.find_stores_by_ids(&user.hearts).await?)
}
