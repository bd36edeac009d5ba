use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    photos::{try_store_photo, PhotoUpload},
    slug::allocate_slug,
};
use crate::{
    catalog::{Catalog, Location, Point, Review, Store, StoreDraft},
    error::AppError,
    state::AppState,
};

/// Store fields as submitted; anything required may be missing.
#[derive(Debug, Default, Clone)]
pub struct StoreInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub lng: Option<f64>,
    pub lat: Option<f64>,
    pub address: Option<String>,
}

/// Validated fields, before a slug and photo are attached.
struct ValidStore {
    name: String,
    description: String,
    tags: Vec<String>,
    location: Location,
}

/// A store with its reviews joined in.
#[derive(Debug, Serialize)]
pub struct StoreDetails {
    #[serde(flatten)]
    pub store: Store,
    pub reviews: Vec<Review>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trimmed, non-empty, first occurrence wins.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn validate(input: StoreInput) -> Result<ValidStore, AppError> {
    let name = non_blank(input.name).ok_or(AppError::required("name"))?;
    let (Some(lng), Some(lat)) = (input.lng, input.lat) else {
        return Err(AppError::required("location.coordinates"));
    };
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        return Err(AppError::Validation {
            field: "location.coordinates",
            reason: "are out of range",
        });
    }
    let address = non_blank(input.address).ok_or(AppError::required("location.address"))?;
    Ok(ValidStore {
        name,
        description: input.description.unwrap_or_default().trim().to_string(),
        tags: normalize_tags(input.tags),
        location: Location {
            coordinates: Point { lng, lat },
            address,
        },
    })
}

/// Fails unless `user_id` authored the store.
pub fn confirm_owner(store: &Store, user_id: Uuid) -> Result<(), AppError> {
    if store.author == user_id {
        Ok(())
    } else {
        Err(AppError::OwnershipViolation)
    }
}

#[instrument(skip(state, input, photo))]
pub async fn create_store(
    state: &AppState,
    author: Uuid,
    input: StoreInput,
    photo: Option<PhotoUpload>,
) -> Result<Store, AppError> {
    let valid = validate(input)?;
    let slug = allocate_slug(state.catalog.as_ref(), &valid.name).await?;
    let photo = try_store_photo(state.storage.as_ref(), photo).await;

    let store = state
        .catalog
        .insert_store(StoreDraft {
            name: valid.name,
            slug,
            description: valid.description,
            tags: valid.tags,
            location: valid.location,
            photo,
            author,
        })
        .await?;
    info!(store_id = %store.id, slug = %store.slug, "store created");
    Ok(store)
}

/// The store, provided `user_id` may edit it.
pub async fn store_for_edit(
    catalog: &dyn Catalog,
    user_id: Uuid,
    store_id: Uuid,
) -> Result<Store, AppError> {
    let store = catalog
        .find_store(store_id)
        .await?
        .ok_or(AppError::NotFound("store"))?;
    confirm_owner(&store, user_id)?;
    Ok(store)
}

#[instrument(skip(state, input, photo))]
pub async fn update_store(
    state: &AppState,
    user_id: Uuid,
    store_id: Uuid,
    input: StoreInput,
    photo: Option<PhotoUpload>,
) -> Result<Store, AppError> {
    let current = store_for_edit(state.catalog.as_ref(), user_id, store_id).await?;
    let valid = validate(input)?;

    let slug = if valid.name != current.name {
        allocate_slug(state.catalog.as_ref(), &valid.name).await?
    } else {
        current.slug.clone()
    };
    let new_photo = try_store_photo(state.storage.as_ref(), photo).await;

    let updated = state
        .catalog
        .update_store(
            store_id,
            StoreDraft {
                name: valid.name,
                slug,
                description: valid.description,
                tags: valid.tags,
                location: valid.location,
                photo: new_photo.clone().or_else(|| current.photo.clone()),
                author: current.author,
            },
        )
        .await?
        .ok_or(AppError::NotFound("store"))?;

    if let (Some(_), Some(old)) = (&new_photo, &current.photo) {
        if let Err(e) = state.storage.delete_object(old).await {
            warn!(error = %e, key = %old, "old photo not deleted");
        }
    }

    info!(store_id = %updated.id, slug = %updated.slug, "store updated");
    Ok(updated)
}

/// Store by slug with its reviews.
pub async fn store_by_slug(catalog: &dyn Catalog, slug: &str) -> Result<StoreDetails, AppError> {
    let store = catalog
        .find_store_by_slug(slug)
        .await?
        .ok_or(AppError::NotFound("store"))?;
    let reviews = catalog.reviews_for_store(store.id).await?;
    Ok(StoreDetails { store, reviews })
}
