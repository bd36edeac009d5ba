//! Aggregation stages evaluated in process.
//!
//! Each stage is a pure transformation over a sequence of documents, so an
//! aggregation reads as the chain of stages it is made of:
//!
//! ```text
//! top stores:  lookup(reviews) -> match(reviews >= 2) -> project(avg) -> sort(avg desc) -> limit(10)
//! tag facets:  unwind(tags) -> group(count) -> sort(count desc)
//! ```

use std::collections::HashMap;

use super::types::{Point, Review, Store, TagCount, TopStore};

/// Earth radius in metres, the value Postgres' earthdistance `earth()` uses,
/// so both catalogs agree on what lies within a radius.
pub const EARTH_RADIUS_M: f64 = 6_378_168.0;

/// A store joined with its reviews.
#[derive(Debug, Clone)]
pub struct StoreWithReviews {
    pub store: Store,
    pub reviews: Vec<Review>,
}

/// `$lookup`: attach every review whose `store` field references the store.
pub fn lookup_reviews<'a, I>(stores: I, reviews: &[Review]) -> Vec<StoreWithReviews>
where
    I: IntoIterator<Item = &'a Store>,
{
    let mut by_store: HashMap<_, Vec<Review>> = HashMap::new();
    for review in reviews {
        by_store.entry(review.store).or_default().push(review.clone());
    }
    stores
        .into_iter()
        .map(|store| StoreWithReviews {
            reviews: by_store.remove(&store.id).unwrap_or_default(),
            store: store.clone(),
        })
        .collect()
}

/// `$match`: keep documents with at least `min` joined reviews.
pub fn match_min_reviews(docs: Vec<StoreWithReviews>, min: usize) -> Vec<StoreWithReviews> {
    docs.into_iter().filter(|d| d.reviews.len() >= min).collect()
}

/// `$project`: reduce to the listing fields plus the mean rating.
pub fn project_average(docs: Vec<StoreWithReviews>) -> Vec<TopStore> {
    docs.into_iter()
        .map(|d| {
            let average_rating = average(d.reviews.iter().map(|r| f64::from(r.rating)));
            TopStore {
                id: d.store.id,
                slug: d.store.slug,
                name: d.store.name,
                photo: d.store.photo,
                reviews: d.reviews,
                average_rating,
            }
        })
        .collect()
}

/// `$sort` on `average_rating`, descending. Stable, so ties keep input order.
pub fn sort_by_average_desc(mut docs: Vec<TopStore>) -> Vec<TopStore> {
    docs.sort_by(|a, b| b.average_rating.total_cmp(&a.average_rating));
    docs
}

/// `$limit`.
pub fn limit<T>(mut docs: Vec<T>, n: usize) -> Vec<T> {
    docs.truncate(n);
    docs
}

/// `$unwind` on `tags`: one entry per (store, tag) pair.
pub fn unwind_tags<'a, I>(stores: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a Store>,
{
    stores
        .into_iter()
        .flat_map(|s| s.tags.iter().map(String::as_str))
        .collect()
}

/// `$group` by tag with `$sum: 1`. Output keeps first-seen order.
pub fn group_count(tags: Vec<&str>) -> Vec<TagCount> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<TagCount> = Vec::new();
    for tag in tags {
        match index.get(tag) {
            Some(&i) => out[i].count += 1,
            None => {
                index.insert(tag, out.len());
                out.push(TagCount {
                    tag: tag.to_string(),
                    count: 1,
                });
            }
        }
    }
    out
}

/// `$sort` on `count` descending, then tag name ascending.
pub fn sort_by_count_desc(mut facets: Vec<TagCount>) -> Vec<TagCount> {
    facets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    facets
}

/// Great-circle distance between two points in metres (haversine).
pub fn distance_m(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Relevance of a store for a set of lowercase query terms: one point per
/// occurrence of a term among the words of the name and the description.
/// Zero means no match.
pub fn text_score(store: &Store, terms: &[String]) -> f64 {
    let count = |field: &str| {
        field
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .filter(|w| terms.iter().any(|t| t == w))
            .count()
    };
    (count(&store.name) + count(&store.description)) as f64
}

fn average<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
