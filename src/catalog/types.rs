use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// WGS84 point, longitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lng: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coordinates: Point,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub location: Location,
    pub photo: Option<String>,
    pub author: Uuid,
}

/// Validated store fields ready to be written. The slug is allocated beforehand.
#[derive(Debug, Clone)]
pub struct StoreDraft {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub tags: Vec<String>,
    pub location: Location,
    pub photo: Option<String>,
    pub author: Uuid,
}

/// Store as returned by text search, with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredStore {
    #[serde(flatten)]
    pub store: Store,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub author: Uuid,
    pub store: Uuid,
    pub rating: i16,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ReviewDraft {
    pub author: Uuid,
    pub store: Uuid,
    pub rating: i16,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

/// Output of the top-rated aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct TopStore {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub photo: Option<String>,
    pub reviews: Vec<Review>,
    pub average_rating: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub hearts: Vec<Uuid>,
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_expires: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
