use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::*;
use super::{Catalog, DuplicateEmail};

const STORE_COLUMNS: &str =
    "id, name, slug, description, tags, created_at, lng, lat, address, photo, author";

const USER_COLUMNS: &str = "id, email, password_hash, hearts, reset_password_token, \
                            reset_password_expires, created_at";

const REVIEW_COLUMNS: &str = "id, author, store, rating, text, created_at";

/// Store row as laid out in the `stores` table.
#[derive(Debug, FromRow)]
struct StoreRow {
    id: Uuid,
    name: String,
    slug: String,
    description: String,
    tags: Vec<String>,
    created_at: OffsetDateTime,
    lng: f64,
    lat: f64,
    address: String,
    photo: Option<String>,
    author: Uuid,
}

impl From<StoreRow> for Store {
    fn from(r: StoreRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            slug: r.slug,
            description: r.description,
            tags: r.tags,
            created_at: r.created_at,
            location: Location {
                coordinates: Point {
                    lng: r.lng,
                    lat: r.lat,
                },
                address: r.address,
            },
            photo: r.photo,
            author: r.author,
        }
    }
}

#[derive(Debug, FromRow)]
struct ScoredStoreRow {
    #[sqlx(flatten)]
    store: StoreRow,
    score: f32,
}

#[derive(Debug, FromRow)]
struct TopStoreRow {
    id: Uuid,
    slug: String,
    name: String,
    photo: Option<String>,
    average_rating: f64,
}

#[derive(Debug, FromRow)]
struct ReviewRow {
    id: Uuid,
    author: Uuid,
    store: Uuid,
    rating: i16,
    text: String,
    created_at: OffsetDateTime,
}

impl From<ReviewRow> for Review {
    fn from(r: ReviewRow) -> Self {
        Self {
            id: r.id,
            author: r.author,
            store: r.store,
            rating: r.rating,
            text: r.text,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    hearts: Vec<Uuid>,
    reset_password_token: Option<String>,
    reset_password_expires: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            hearts: r.hearts,
            reset_password_token: r.reset_password_token,
            reset_password_expires: r.reset_password_expires,
            created_at: r.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgCatalog {
    db: PgPool,
}

impl PgCatalog {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn insert_store(&self, draft: StoreDraft) -> anyhow::Result<Store> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            r#"
            INSERT INTO stores (name, slug, description, tags, lng, lat, address, photo, author)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {STORE_COLUMNS}
            "#
        ))
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(&draft.description)
        .bind(&draft.tags)
        .bind(draft.location.coordinates.lng)
        .bind(draft.location.coordinates.lat)
        .bind(&draft.location.address)
        .bind(&draft.photo)
        .bind(draft.author)
        .fetch_one(&self.db)
        .await
        .context("insert store")?;
        Ok(row.into())
    }

    async fn update_store(&self, id: Uuid, draft: StoreDraft) -> anyhow::Result<Option<Store>> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            r#"
            UPDATE stores
               SET name = $2, slug = $3, description = $4, tags = $5,
                   lng = $6, lat = $7, address = $8, photo = $9
             WHERE id = $1
            RETURNING {STORE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(&draft.description)
        .bind(&draft.tags)
        .bind(draft.location.coordinates.lng)
        .bind(draft.location.coordinates.lat)
        .bind(&draft.location.address)
        .bind(&draft.photo)
        .fetch_optional(&self.db)
        .await
        .context("update store")?;
        Ok(row.map(Store::from))
    }

    async fn find_store(&self, id: Uuid) -> anyhow::Result<Option<Store>> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find store")?;
        Ok(row.map(Store::from))
    }

    async fn find_store_by_slug(&self, slug: &str) -> anyhow::Result<Option<Store>> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.db)
        .await
        .context("find store by slug")?;
        Ok(row.map(Store::from))
    }

    async fn slugs_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let slugs = sqlx::query_scalar::<_, String>("SELECT slug FROM stores WHERE slug ~* $1")
            .bind(pattern)
            .fetch_all(&self.db)
            .await
            .context("match slugs")?;
        Ok(slugs)
    }

    async fn list_stores(&self, skip: i64, limit: i64) -> anyhow::Result<Vec<Store>> {
        let rows = sqlx::query_as::<_, StoreRow>(&format!(
            r#"
            SELECT {STORE_COLUMNS}
              FROM stores
             ORDER BY created_at DESC
             LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.db)
        .await
        .context("list stores")?;
        Ok(rows.into_iter().map(Store::from).collect())
    }

    async fn count_stores(&self) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stores")
            .fetch_one(&self.db)
            .await
            .context("count stores")?;
        Ok(count)
    }

    async fn find_stores_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Store>> {
        let rows = sqlx::query_as::<_, StoreRow>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE id = ANY($1) ORDER BY created_at"
        ))
        .bind(ids)
        .fetch_all(&self.db)
        .await
        .context("find stores by ids")?;
        Ok(rows.into_iter().map(Store::from).collect())
    }

    async fn find_stores_by_tag(&self, tag: Option<&str>) -> anyhow::Result<Vec<Store>> {
        let rows = sqlx::query_as::<_, StoreRow>(&format!(
            r#"
            SELECT {STORE_COLUMNS}
              FROM stores
             WHERE $1::text IS NULL OR $1 = ANY(tags)
             ORDER BY created_at
            "#
        ))
        .bind(tag)
        .fetch_all(&self.db)
        .await
        .context("find stores by tag")?;
        Ok(rows.into_iter().map(Store::from).collect())
    }

    async fn tag_counts(&self) -> anyhow::Result<Vec<TagCount>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT tag, COUNT(*) AS count
              FROM stores, unnest(tags) AS tag
             GROUP BY tag
             ORDER BY count DESC, tag ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("tag counts")?;
        Ok(rows
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect())
    }

    async fn search_text(&self, terms: &[String], limit: i64) -> anyhow::Result<Vec<ScoredStore>> {
        // Terms are alphanumeric, so joining with `|` yields a valid OR tsquery.
        let query = terms.join(" | ");
        let rows = sqlx::query_as::<_, ScoredStoreRow>(&format!(
            r#"
            SELECT {STORE_COLUMNS},
                   ts_rank(search_vector, to_tsquery('english', $1)) AS score
              FROM stores
             WHERE search_vector @@ to_tsquery('english', $1)
             ORDER BY score DESC
             LIMIT $2
            "#
        ))
        .bind(&query)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("text search")?;
        Ok(rows
            .into_iter()
            .map(|r| ScoredStore {
                store: r.store.into(),
                score: f64::from(r.score),
            })
            .collect())
    }

    async fn find_near(
        &self,
        point: Point,
        max_distance_m: f64,
        limit: i64,
    ) -> anyhow::Result<Vec<Store>> {
        // earth_box is the indexable prefilter; earth_distance trims its corners.
        let rows = sqlx::query_as::<_, StoreRow>(&format!(
            r#"
            SELECT {STORE_COLUMNS}
              FROM stores
             WHERE earth_box(ll_to_earth($2, $1), $3) @> ll_to_earth(lat, lng)
               AND earth_distance(ll_to_earth($2, $1), ll_to_earth(lat, lng)) <= $3
             ORDER BY earth_distance(ll_to_earth($2, $1), ll_to_earth(lat, lng))
             LIMIT $4
            "#
        ))
        .bind(point.lng)
        .bind(point.lat)
        .bind(max_distance_m)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("proximity search")?;
        Ok(rows.into_iter().map(Store::from).collect())
    }

    async fn top_stores(&self, min_reviews: i64, limit: i64) -> anyhow::Result<Vec<TopStore>> {
        let rows = sqlx::query_as::<_, TopStoreRow>(
            r#"
            SELECT s.id, s.slug, s.name, s.photo, AVG(r.rating)::float8 AS average_rating
              FROM stores s
              JOIN reviews r ON r.store = s.id
             GROUP BY s.id
            HAVING COUNT(r.id) >= $1
             ORDER BY average_rating DESC
             LIMIT $2
            "#,
        )
        .bind(min_reviews)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("top stores")?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let reviews: Vec<Review> = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE store = ANY($1) ORDER BY created_at"
        ))
        .bind(&ids)
        .fetch_all(&self.db)
        .await
        .context("top store reviews")?
        .into_iter()
        .map(Review::from)
        .collect();

        Ok(rows
            .into_iter()
            .map(|r| TopStore {
                reviews: reviews.iter().filter(|rv| rv.store == r.id).cloned().collect(),
                id: r.id,
                slug: r.slug,
                name: r.name,
                photo: r.photo,
                average_rating: r.average_rating,
            })
            .collect())
    }

    async fn insert_review(&self, draft: ReviewDraft) -> anyhow::Result<Review> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            r#"
            INSERT INTO reviews (author, store, rating, text)
            VALUES ($1, $2, $3, $4)
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(draft.author)
        .bind(draft.store)
        .bind(draft.rating)
        .bind(&draft.text)
        .fetch_one(&self.db)
        .await
        .context("insert review")?;
        Ok(row.into())
    }

    async fn reviews_for_store(&self, store_id: Uuid) -> anyhow::Result<Vec<Review>> {
        let rows = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE store = $1 ORDER BY created_at"
        ))
        .bind(store_id)
        .fetch_all(&self.db)
        .await
        .context("reviews for store")?;
        Ok(rows.into_iter().map(Review::from).collect())
    }

    async fn insert_user(&self, email: &str, password_hash: &str) -> anyhow::Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                anyhow::Error::new(DuplicateEmail(email.to_string()))
            }
            e => anyhow::Error::new(e).context("insert user"),
        })?;
        Ok(row.into())
    }

    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user")?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(row.map(User::from))
    }

    async fn toggle_heart(
        &self,
        user_id: Uuid,
        store_id: Uuid,
    ) -> anyhow::Result<Option<Vec<Uuid>>> {
        let hearts = sqlx::query_scalar::<_, Vec<Uuid>>(
            r#"
            UPDATE users
               SET hearts = CASE
                       WHEN $2 = ANY(hearts) THEN array_remove(hearts, $2)
                       ELSE array_append(hearts, $2)
                   END
             WHERE id = $1
            RETURNING hearts
            "#,
        )
        .bind(user_id)
        .bind(store_id)
        .fetch_optional(&self.db)
        .await
        .context("toggle heart")?;
        Ok(hearts)
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE users
               SET reset_password_token = $2, reset_password_expires = $3
             WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires)
        .execute(&self.db)
        .await
        .context("set reset token")?;
        if done.rows_affected() != 1 {
            anyhow::bail!("user {user_id} not found");
        }
        Ok(())
    }

    async fn find_user_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE reset_password_token = $1
               AND reset_password_expires > $2
            "#
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("find user by reset token")?;
        Ok(row.map(User::from))
    }

    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET password_hash = $3,
                   reset_password_token = NULL,
                   reset_password_expires = NULL
             WHERE id = $1 AND reset_password_token = $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(token)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await
        .context("complete password reset")?;
        Ok(row.map(User::from))
    }
}

/// These run against a scratch database per test and need `DATABASE_URL` to
/// point at a Postgres server with the cube and earthdistance extensions:
/// `cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;

    const TORONTO: Point = Point {
        lng: -79.3832,
        lat: 43.6532,
    };

    fn north_of(p: Point, km: f64) -> Point {
        Point {
            lng: p.lng,
            lat: p.lat + km / 111.32,
        }
    }

    fn draft(name: &str, description: &str, tags: &[&str], at: Point) -> StoreDraft {
        StoreDraft {
            name: name.into(),
            slug: name.to_lowercase().replace(' ', "-"),
            description: description.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            location: Location {
                coordinates: at,
                address: "1 Queen St".into(),
            },
            photo: None,
            author: Uuid::new_v4(),
        }
    }

    async fn rate(catalog: &PgCatalog, store: Uuid, ratings: &[i16]) {
        for &rating in ratings {
            catalog
                .insert_review(ReviewDraft {
                    author: Uuid::new_v4(),
                    store,
                    rating,
                    text: "ok".into(),
                })
                .await
                .unwrap();
        }
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn toggle_heart_round_trips(db: PgPool) {
        let catalog = PgCatalog { db };
        let user = catalog.insert_user("a@example.com", "hash").await.unwrap();
        let store = Uuid::new_v4();

        assert_eq!(catalog.toggle_heart(user.id, store).await.unwrap(), Some(vec![store]));
        assert_eq!(catalog.toggle_heart(user.id, store).await.unwrap(), Some(vec![]));
        assert_eq!(catalog.toggle_heart(Uuid::new_v4(), store).await.unwrap(), None);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn find_near_keeps_radius_and_order(db: PgPool) {
        let catalog = PgCatalog { db };
        catalog.insert_store(draft("Far", "", &[], north_of(TORONTO, 15.0))).await.unwrap();
        catalog.insert_store(draft("Mid", "", &[], north_of(TORONTO, 5.0))).await.unwrap();
        catalog.insert_store(draft("Here", "", &[], TORONTO)).await.unwrap();

        let near = catalog.find_near(TORONTO, 10_000.0, 10).await.unwrap();
        let names: Vec<_> = near.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Here", "Mid"]);

        let capped = catalog.find_near(TORONTO, 10_000.0, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn top_stores_needs_two_reviews_and_sorts_by_average(db: PgPool) {
        let catalog = PgCatalog { db };
        let good = catalog.insert_store(draft("Good", "", &[], TORONTO)).await.unwrap();
        let okay = catalog.insert_store(draft("Okay", "", &[], TORONTO)).await.unwrap();
        let lone = catalog.insert_store(draft("Lone", "", &[], TORONTO)).await.unwrap();
        rate(&catalog, good.id, &[5, 4]).await;
        rate(&catalog, okay.id, &[3, 3, 3]).await;
        rate(&catalog, lone.id, &[5]).await;

        let top = catalog.top_stores(2, 10).await.unwrap();
        let names: Vec<_> = top.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Good", "Okay"]);
        assert!((top[0].average_rating - 4.5).abs() < 1e-9);
        assert_eq!(top[1].reviews.len(), 3);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn tag_counts_and_text_search(db: PgPool) {
        let catalog = PgCatalog { db };
        catalog
            .insert_store(draft("Coffee Corner", "espresso bar", &["wifi", "vegan"], TORONTO))
            .await
            .unwrap();
        catalog
            .insert_store(draft("Bagel Barn", "bagels and coffee", &["wifi"], TORONTO))
            .await
            .unwrap();

        let facets = catalog.tag_counts().await.unwrap();
        assert_eq!(
            facets,
            vec![
                TagCount { tag: "wifi".into(), count: 2 },
                TagCount { tag: "vegan".into(), count: 1 },
            ]
        );

        let hits = catalog.search_text(&["espresso".into()], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].store.name, "Coffee Corner");
        let hits = catalog
            .search_text(&["coffee".into(), "bagel".into()], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn slugs_match_case_insensitively(db: PgPool) {
        let catalog = PgCatalog { db };
        catalog.insert_store(draft("Coffee", "", &[], TORONTO)).await.unwrap();
        catalog.insert_store(draft("Coffee House", "", &[], TORONTO)).await.unwrap();
        let mut second = draft("Coffee", "", &[], TORONTO);
        second.slug = "COFFEE-2".into();
        catalog.insert_store(second).await.unwrap();

        let slugs = catalog.slugs_matching("^(coffee)(-[0-9]+)?$").await.unwrap();
        assert_eq!(slugs.len(), 2);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn users_email_and_reset_token(db: PgPool) {
        let catalog = PgCatalog { db };
        let user = catalog.insert_user("a@example.com", "old").await.unwrap();
        let err = catalog.insert_user("a@example.com", "x").await.unwrap_err();
        assert!(err.is::<DuplicateEmail>());

        let now = OffsetDateTime::now_utc();
        assert!(catalog
            .set_reset_token(Uuid::new_v4(), "tok", now)
            .await
            .is_err());

        catalog
            .set_reset_token(user.id, "tok", now + time::Duration::hours(1))
            .await
            .unwrap();
        assert!(catalog.find_user_by_reset_token("tok", now).await.unwrap().is_some());
        assert!(catalog
            .find_user_by_reset_token("tok", now + time::Duration::hours(2))
            .await
            .unwrap()
            .is_none());

        assert!(catalog
            .complete_password_reset(user.id, "other", "new")
            .await
            .unwrap()
            .is_none());
        let done = catalog
            .complete_password_reset(user.id, "tok", "new")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.password_hash, "new");
        assert!(done.reset_password_token.is_none());
        assert!(catalog
            .complete_password_reset(user.id, "tok", "again")
            .await
            .unwrap()
            .is_none());
    }
}
