//! Persistence for stores, reviews and users.
//!
//! `Catalog` is the seam between the discovery engine and whatever holds the
//! documents. `PgCatalog` pushes every query down to Postgres; `MemoryCatalog`
//! evaluates the same queries in process with the stages in [`pipeline`].

pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod types;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;
pub use types::*;

/// `insert_user` failed because the email is already registered.
#[derive(Debug, thiserror::Error)]
#[error("email already registered: {0}")]
pub struct DuplicateEmail(pub String);

#[async_trait]
pub trait Catalog: Send + Sync {
    // ---- stores ----

    async fn insert_store(&self, draft: StoreDraft) -> anyhow::Result<Store>;

    /// Replaces every mutable field of the store. `None` when the id is unknown.
    async fn update_store(&self, id: Uuid, draft: StoreDraft) -> anyhow::Result<Option<Store>>;

    async fn find_store(&self, id: Uuid) -> anyhow::Result<Option<Store>>;

    async fn find_store_by_slug(&self, slug: &str) -> anyhow::Result<Option<Store>>;

    /// Every slug matching `pattern`, compared case-insensitively.
    async fn slugs_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    /// Newest first.
    async fn list_stores(&self, skip: i64, limit: i64) -> anyhow::Result<Vec<Store>>;

    async fn count_stores(&self) -> anyhow::Result<i64>;

    async fn find_stores_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Store>>;

    /// Stores carrying `tag`, or every store when `tag` is `None`.
    async fn find_stores_by_tag(&self, tag: Option<&str>) -> anyhow::Result<Vec<Store>>;

    /// Tag facet table, count descending.
    async fn tag_counts(&self) -> anyhow::Result<Vec<TagCount>>;

    /// Stores whose name or description contains any of `terms`, best score first.
    async fn search_text(&self, terms: &[String], limit: i64) -> anyhow::Result<Vec<ScoredStore>>;

    /// Stores within `max_distance_m` metres of `point`, nearest first.
    async fn find_near(
        &self,
        point: Point,
        max_distance_m: f64,
        limit: i64,
    ) -> anyhow::Result<Vec<Store>>;

    /// Stores with at least `min_reviews` reviews, best average rating first.
    async fn top_stores(&self, min_reviews: i64, limit: i64) -> anyhow::Result<Vec<TopStore>>;

    // ---- reviews ----

    async fn insert_review(&self, draft: ReviewDraft) -> anyhow::Result<Review>;

    /// Oldest first.
    async fn reviews_for_store(&self, store_id: Uuid) -> anyhow::Result<Vec<Review>>;

    // ---- users ----

    /// Fails with [`DuplicateEmail`] when the email is taken.
    async fn insert_user(&self, email: &str, password_hash: &str) -> anyhow::Result<User>;

    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Adds `store_id` to the user's hearts if absent, removes it otherwise, in
    /// one atomic update. Returns the new heart set, `None` for an unknown user.
    async fn toggle_heart(&self, user_id: Uuid, store_id: Uuid)
        -> anyhow::Result<Option<Vec<Uuid>>>;

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// User holding `token` with an expiry strictly after `now`.
    async fn find_user_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    /// Stores the new hash and clears both reset fields, provided the user still
    /// holds `token`.
    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>>;
}
