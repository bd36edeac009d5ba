use anyhow::Context;
use async_trait::async_trait;
use regex::RegexBuilder;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::pipeline;
use super::types::*;
use super::{Catalog, DuplicateEmail};

#[derive(Default)]
struct Documents {
    stores: Vec<Store>,
    reviews: Vec<Review>,
    users: Vec<User>,
}

/// In-process catalog. Every operation holds the lock for its whole duration,
/// which gives the same single-document atomicity the Postgres backend has.
#[derive(Default)]
pub struct MemoryCatalog {
    docs: RwLock<Documents>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(stores: &mut [Store]) {
    stores.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn insert_store(&self, draft: StoreDraft) -> anyhow::Result<Store> {
        let store = Store {
            id: Uuid::new_v4(),
            name: draft.name,
            slug: draft.slug,
            description: draft.description,
            tags: draft.tags,
            created_at: OffsetDateTime::now_utc(),
            location: draft.location,
            photo: draft.photo,
            author: draft.author,
        };
        self.docs.write().await.stores.push(store.clone());
        Ok(store)
    }

    async fn update_store(&self, id: Uuid, draft: StoreDraft) -> anyhow::Result<Option<Store>> {
        let mut docs = self.docs.write().await;
        let Some(store) = docs.stores.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        store.name = draft.name;
        store.slug = draft.slug;
        store.description = draft.description;
        store.tags = draft.tags;
        store.location = draft.location;
        store.photo = draft.photo;
        Ok(Some(store.clone()))
    }

    async fn find_store(&self, id: Uuid) -> anyhow::Result<Option<Store>> {
        let docs = self.docs.read().await;
        Ok(docs.stores.iter().find(|s| s.id == id).cloned())
    }

    async fn find_store_by_slug(&self, slug: &str) -> anyhow::Result<Option<Store>> {
        let docs = self.docs.read().await;
        Ok(docs.stores.iter().find(|s| s.slug == slug).cloned())
    }

    async fn slugs_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("compile slug pattern {pattern}"))?;
        let docs = self.docs.read().await;
        Ok(docs
            .stores
            .iter()
            .filter(|s| re.is_match(&s.slug))
            .map(|s| s.slug.clone())
            .collect())
    }

    async fn list_stores(&self, skip: i64, limit: i64) -> anyhow::Result<Vec<Store>> {
        let mut stores = self.docs.read().await.stores.clone();
        newest_first(&mut stores);
        Ok(stores
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn count_stores(&self) -> anyhow::Result<i64> {
        Ok(self.docs.read().await.stores.len() as i64)
    }

    async fn find_stores_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Store>> {
        let docs = self.docs.read().await;
        Ok(docs
            .stores
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn find_stores_by_tag(&self, tag: Option<&str>) -> anyhow::Result<Vec<Store>> {
        let docs = self.docs.read().await;
        Ok(docs
            .stores
            .iter()
            .filter(|s| tag.map_or(true, |t| s.tags.iter().any(|x| x == t)))
            .cloned()
            .collect())
    }

    async fn tag_counts(&self) -> anyhow::Result<Vec<TagCount>> {
        let docs = self.docs.read().await;
        let facets = pipeline::unwind_tags(docs.stores.iter());
        let facets = pipeline::group_count(facets);
        Ok(pipeline::sort_by_count_desc(facets))
    }

    async fn search_text(&self, terms: &[String], limit: i64) -> anyhow::Result<Vec<ScoredStore>> {
        let docs = self.docs.read().await;
        let mut hits: Vec<ScoredStore> = docs
            .stores
            .iter()
            .map(|s| ScoredStore {
                score: pipeline::text_score(s, terms),
                store: s.clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(pipeline::limit(hits, usize::try_from(limit).unwrap_or(0)))
    }

    async fn find_near(
        &self,
        point: Point,
        max_distance_m: f64,
        limit: i64,
    ) -> anyhow::Result<Vec<Store>> {
        let docs = self.docs.read().await;
        let mut near: Vec<(f64, &Store)> = docs
            .stores
            .iter()
            .map(|s| (pipeline::distance_m(point, s.location.coordinates), s))
            .filter(|(d, _)| *d <= max_distance_m)
            .collect();
        near.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(near
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn top_stores(&self, min_reviews: i64, limit: i64) -> anyhow::Result<Vec<TopStore>> {
        let docs = self.docs.read().await;
        let joined = pipeline::lookup_reviews(docs.stores.iter(), &docs.reviews);
        let rated = pipeline::match_min_reviews(joined, usize::try_from(min_reviews).unwrap_or(0));
        let projected = pipeline::project_average(rated);
        let sorted = pipeline::sort_by_average_desc(projected);
        Ok(pipeline::limit(sorted, usize::try_from(limit).unwrap_or(0)))
    }

    async fn insert_review(&self, draft: ReviewDraft) -> anyhow::Result<Review> {
        let review = Review {
            id: Uuid::new_v4(),
            author: draft.author,
            store: draft.store,
            rating: draft.rating,
            text: draft.text,
            created_at: OffsetDateTime::now_utc(),
        };
        self.docs.write().await.reviews.push(review.clone());
        Ok(review)
    }

    async fn reviews_for_store(&self, store_id: Uuid) -> anyhow::Result<Vec<Review>> {
        let docs = self.docs.read().await;
        Ok(docs
            .reviews
            .iter()
            .filter(|r| r.store == store_id)
            .cloned()
            .collect())
    }

    async fn insert_user(&self, email: &str, password_hash: &str) -> anyhow::Result<User> {
        let mut docs = self.docs.write().await;
        if docs.users.iter().any(|u| u.email == email) {
            return Err(DuplicateEmail(email.to_string()).into());
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            hearts: Vec::new(),
            reset_password_token: None,
            reset_password_expires: None,
            created_at: OffsetDateTime::now_utc(),
        };
        docs.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let docs = self.docs.read().await;
        Ok(docs.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let docs = self.docs.read().await;
        Ok(docs.users.iter().find(|u| u.email == email).cloned())
    }

    async fn toggle_heart(
        &self,
        user_id: Uuid,
        store_id: Uuid,
    ) -> anyhow::Result<Option<Vec<Uuid>>> {
        let mut docs = self.docs.write().await;
        let Some(user) = docs.users.iter_mut().find(|u| u.id == user_id) else {
            return Ok(None);
        };
        if user.hearts.contains(&store_id) {
            user.hearts.retain(|id| *id != store_id);
        } else {
            user.hearts.push(store_id);
        }
        Ok(Some(user.hearts.clone()))
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut docs = self.docs.write().await;
        let user = docs
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .with_context(|| format!("user {user_id} not found"))?;
        user.reset_password_token = Some(token.to_string());
        user.reset_password_expires = Some(expires);
        Ok(())
    }

    async fn find_user_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let docs = self.docs.read().await;
        Ok(docs
            .users
            .iter()
            .find(|u| {
                u.reset_password_token.as_deref() == Some(token)
                    && u.reset_password_expires.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut docs = self.docs.write().await;
        let Some(user) = docs
            .users
            .iter_mut()
            .find(|u| u.id == user_id && u.reset_password_token.as_deref() == Some(token))
        else {
            return Ok(None);
        };
        user.password_hash = password_hash.to_string();
        user.reset_password_token = None;
        user.reset_password_expires = None;
        Ok(Some(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, slug: &str, lng: f64, lat: f64) -> StoreDraft {
        StoreDraft {
            name: name.into(),
            slug: slug.into(),
            description: String::new(),
            tags: Vec::new(),
            location: Location {
                coordinates: Point { lng, lat },
                address: "1 Main St".into(),
            },
            photo: None,
            author: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn slugs_matching_is_case_insensitive() {
        let catalog = MemoryCatalog::new();
        catalog.insert_store(draft("A", "Cafe", 0.0, 0.0)).await.unwrap();
        catalog.insert_store(draft("B", "cafe-2", 0.0, 0.0)).await.unwrap();
        catalog.insert_store(draft("C", "cafe-bar", 0.0, 0.0)).await.unwrap();
        let slugs = catalog.slugs_matching(r"^(cafe)(-[0-9]+)?$").await.unwrap();
        assert_eq!(slugs, vec!["Cafe".to_string(), "cafe-2".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let catalog = MemoryCatalog::new();
        catalog.insert_user("a@b.co", "h").await.unwrap();
        let err = catalog.insert_user("a@b.co", "h").await.unwrap_err();
        assert!(err.is::<DuplicateEmail>());
    }

    #[tokio::test]
    async fn reset_token_for_unknown_user_fails() {
        let catalog = MemoryCatalog::new();
        assert!(catalog
            .set_reset_token(Uuid::new_v4(), "tok", OffsetDateTime::now_utc())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn complete_reset_requires_current_token() {
        let catalog = MemoryCatalog::new();
        let user = catalog.insert_user("a@b.co", "old").await.unwrap();
        let expires = OffsetDateTime::now_utc() + time::Duration::hours(1);
        catalog.set_reset_token(user.id, "tok", expires).await.unwrap();

        assert!(catalog
            .complete_password_reset(user.id, "other", "new")
            .await
            .unwrap()
            .is_none());
        let done = catalog
            .complete_password_reset(user.id, "tok", "new")
            .await
            .unwrap()
            .expect("token matches");
        assert_eq!(done.password_hash, "new");
        assert!(done.reset_password_token.is_none());
        assert!(done.reset_password_expires.is_none());
    }

    #[tokio::test]
    async fn update_of_unknown_store_is_none() {
        let catalog = MemoryCatalog::new();
        let res = catalog
            .update_store(Uuid::new_v4(), draft("A", "a", 0.0, 0.0))
            .await
            .unwrap();
        assert!(res.is_none());
    }
}
