use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{NearQuery, SearchQuery, StoreForm},
    photos::{presign_photo, PhotoUpload},
    search::{self, MapStore, PageOutcome, TagOverview},
    services::{self, StoreDetails, StoreInput},
};
use crate::{
    auth::jwt::AuthUser,
    catalog::{Point, ScoredStore, Store, TagCount, TopStore},
    error::AppError,
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/stores", get(list_first_page))
        .route("/stores/page/:page", get(list_page))
        .route("/store/:slug", get(get_store))
        .route("/store/:slug/photo", get(get_store_photo)) // 307 to a presigned url
        .route("/tags", get(all_tags))
        .route("/tags/:tag", get(stores_with_tag))
        .route("/top", get(top_stores))
        .route("/api/tags", get(tag_facets))
        .route("/api/search", get(search_stores))
        .route("/api/stores/near", get(stores_near))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/stores", post(create_store))
        .route("/stores/:id", post(update_store))
        .route("/stores/:id/edit", get(edit_store))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

fn malformed(e: MultipartError) -> AppError {
    warn!(error = %e, "malformed store form");
    AppError::Validation {
        field: "form",
        reason: "is not valid multipart",
    }
}

async fn read_store_form(mut mp: Multipart) -> Result<(StoreInput, Option<PhotoUpload>), AppError> {
    let mut form = StoreForm::default();
    while let Some(field) = mp.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "photo" {
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field.bytes().await.map_err(malformed)?;
            form.set_photo(PhotoUpload { body, content_type });
        } else {
            let value = field.text().await.map_err(malformed)?;
            form.set_text(&name, value)?;
        }
    }
    Ok(form.into_parts())
}

async fn render_page(state: &AppState, page: i64) -> Result<Response, AppError> {
    match search::list_stores(state.catalog.as_ref(), page).await? {
        PageOutcome::Page(page) => Ok(Json(page).into_response()),
        PageOutcome::OutOfRange {
            requested,
            last_page,
        } => {
            info!(requested, last_page, "page out of range, redirecting");
            Ok(Redirect::to(&format!("/stores/page/{}", last_page)).into_response())
        }
    }
}

#[instrument(skip(state))]
pub async fn list_first_page(State(state): State<AppState>) -> Result<Response, AppError> {
    render_page(&state, 1).await
}

#[instrument(skip(state))]
pub async fn list_page(
    State(state): State<AppState>,
    Path(page): Path<i64>,
) -> Result<Response, AppError> {
    render_page(&state, page).await
}

/// POST /stores (multipart): name, description, tags[], lng, lat, address, photo
#[instrument(skip(state, mp))]
pub async fn create_store(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let (input, photo) = read_store_form(mp).await?;
    let store = services::create_store(&state, user_id, input, photo).await?;
    let location = format!("/store/{}", store.slug);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(store)))
}

#[instrument(skip(state))]
pub async fn edit_store(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Store>, AppError> {
    let store = services::store_for_edit(state.catalog.as_ref(), user_id, id).await?;
    Ok(Json(store))
}

#[instrument(skip(state, mp))]
pub async fn update_store(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    mp: Multipart,
) -> Result<Json<Store>, AppError> {
    let (input, photo) = read_store_form(mp).await?;
    let store = services::update_store(&state, user_id, id, input, photo).await?;
    Ok(Json(store))
}

#[instrument(skip(state))]
pub async fn get_store(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<StoreDetails>, AppError> {
    Ok(Json(services::store_by_slug(state.catalog.as_ref(), &slug).await?))
}

#[instrument(skip(state))]
pub async fn get_store_photo(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Redirect, AppError> {
    let store = state
        .catalog
        .find_store_by_slug(&slug)
        .await?
        .ok_or(AppError::NotFound("store"))?;
    let key = store.photo.ok_or(AppError::NotFound("photo"))?;
    let url = presign_photo(state.storage.as_ref(), &key).await?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip(state))]
pub async fn all_tags(State(state): State<AppState>) -> Result<Json<TagOverview>, AppError> {
    Ok(Json(search::stores_by_tag(state.catalog.as_ref(), None).await?))
}

#[instrument(skip(state))]
pub async fn stores_with_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<TagOverview>, AppError> {
    Ok(Json(
        search::stores_by_tag(state.catalog.as_ref(), Some(&tag)).await?,
    ))
}

#[instrument(skip(state))]
pub async fn tag_facets(State(state): State<AppState>) -> Result<Json<Vec<TagCount>>, AppError> {
    Ok(Json(search::tag_list(state.catalog.as_ref()).await?))
}

#[instrument(skip(state))]
pub async fn top_stores(State(state): State<AppState>) -> Result<Json<Vec<TopStore>>, AppError> {
    Ok(Json(search::top_stores(state.catalog.as_ref()).await?))
}

#[instrument(skip(state))]
pub async fn search_stores(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ScoredStore>>, AppError> {
    Ok(Json(
        search::search_stores(state.catalog.as_ref(), &query.q).await?,
    ))
}

#[instrument(skip(state))]
pub async fn stores_near(
    State(state): State<AppState>,
    Query(query): Query<NearQuery>,
) -> Result<Json<Vec<MapStore>>, AppError> {
    let point = Point {
        lng: query.lng,
        lat: query.lat,
    };
    Ok(Json(search::stores_near(state.catalog.as_ref(), point).await?))
}
