//! Discovery queries over the catalog: text search, proximity, tag facets,
//! top-rated stores and the paged listing.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::catalog::{Catalog, Location, Point, ScoredStore, Store, TagCount, TopStore};

pub const SEARCH_LIMIT: i64 = 5;
pub const NEAR_RADIUS_M: f64 = 10_000.0;
pub const NEAR_LIMIT: i64 = 10;
pub const TOP_MIN_REVIEWS: i64 = 2;
pub const TOP_LIMIT: i64 = 10;
pub const PAGE_SIZE: i64 = 4;

/// Reduced projection used by the map.
#[derive(Debug, Clone, Serialize)]
pub struct MapStore {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub location: Location,
    pub photo: Option<String>,
}

impl From<Store> for MapStore {
    fn from(s: Store) -> Self {
        Self {
            slug: s.slug,
            name: s.name,
            description: s.description,
            location: s.location,
            photo: s.photo,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TagOverview {
    pub tag: Option<String>,
    pub tags: Vec<TagCount>,
    pub stores: Vec<Store>,
}

#[derive(Debug, Serialize)]
pub struct StorePage {
    pub stores: Vec<Store>,
    pub page: i64,
    pub pages: i64,
    pub count: i64,
}

/// Result of a paged listing. Asking past the last page is not an error: the
/// caller is told which page to go to instead.
#[derive(Debug)]
pub enum PageOutcome {
    Page(StorePage),
    OutOfRange { requested: i64, last_page: i64 },
}

/// Lowercase alphanumeric words of `q`, deduplicated in order.
pub fn query_terms(q: &str) -> Vec<String> {
    lazy_static! {
        static ref WORD_RE: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();
    }
    let lowered = q.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for m in WORD_RE.find_iter(&lowered) {
        if !terms.iter().any(|t| t == m.as_str()) {
            terms.push(m.as_str().to_string());
        }
    }
    terms
}

/// Stores whose name or description match any word of `q`, most relevant
/// first. An empty query matches nothing.
pub async fn search_stores(catalog: &dyn Catalog, q: &str) -> anyhow::Result<Vec<ScoredStore>> {
    let terms = query_terms(q);
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    catalog.search_text(&terms, SEARCH_LIMIT).await
}

/// Up to ten stores within 10 km of the point, nearest first.
pub async fn stores_near(catalog: &dyn Catalog, point: Point) -> anyhow::Result<Vec<MapStore>> {
    let stores = catalog.find_near(point, NEAR_RADIUS_M, NEAR_LIMIT).await?;
    Ok(stores.into_iter().map(MapStore::from).collect())
}

pub async fn tag_list(catalog: &dyn Catalog) -> anyhow::Result<Vec<TagCount>> {
    catalog.tag_counts().await
}

/// Stores carrying `tag` (all stores when `None`) together with the facet table.
pub async fn stores_by_tag(
    catalog: &dyn Catalog,
    tag: Option<&str>,
) -> anyhow::Result<TagOverview> {
    let (tags, stores) = tokio::try_join!(catalog.tag_counts(), catalog.find_stores_by_tag(tag))?;
    Ok(TagOverview {
        tag: tag.map(str::to_string),
        tags,
        stores,
    })
}

/// Stores with at least two reviews, best average rating first, at most ten.
/// Order among equal averages is stable but unspecified.
pub async fn top_stores(catalog: &dyn Catalog) -> anyhow::Result<Vec<TopStore>> {
    catalog.top_stores(TOP_MIN_REVIEWS, TOP_LIMIT).await
}

/// 1-based page of stores, newest first. Pages below 1 are read as page 1.
pub async fn list_stores(catalog: &dyn Catalog, page: i64) -> anyhow::Result<PageOutcome> {
    let page = page.max(1);
    let count = catalog.count_stores().await?;
    let pages = (count + PAGE_SIZE - 1) / PAGE_SIZE;
    let last_page = pages.max(1);

    // Checked before the offset is computed: `page` comes from the URL.
    if page > last_page {
        return Ok(PageOutcome::OutOfRange {
            requested: page,
            last_page,
        });
    }
    let stores = catalog.list_stores((page - 1) * PAGE_SIZE, PAGE_SIZE).await?;
    Ok(PageOutcome::Page(StorePage {
        stores,
        page,
        pages,
        count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, ReviewDraft, StoreDraft};
    use uuid::Uuid;

    const TORONTO: Point = Point {
        lng: -79.3832,
        lat: 43.6532,
    };

    fn draft(name: &str, description: &str, tags: &[&str], at: Point) -> StoreDraft {
        StoreDraft {
            name: name.into(),
            slug: crate::stores::slug::slugify(name),
            description: description.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            location: Location {
                coordinates: at,
                address: "somewhere".into(),
            },
            photo: None,
            author: Uuid::new_v4(),
        }
    }

    /// Point `km` kilometres north of `p`.
    fn north_of(p: Point, km: f64) -> Point {
        Point {
            lng: p.lng,
            lat: p.lat + km / 111.32,
        }
    }

    async fn rate(catalog: &MemoryCatalog, store: &Store, ratings: &[i16]) {
        for &rating in ratings {
            catalog
                .insert_review(ReviewDraft {
                    author: Uuid::new_v4(),
                    store: store.id,
                    rating,
                    text: String::new(),
                })
                .await
                .unwrap();
        }
    }

    #[test]
    fn query_terms_split_and_dedupe() {
        assert_eq!(query_terms("  Coffee, COFFEE & bagels "), vec!["coffee", "bagels"]);
        assert!(query_terms("  !! ").is_empty());
    }

    #[tokio::test]
    async fn text_search_empty_or_unmatched_is_empty() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert_store(draft("Coffee Corner", "espresso", &[], TORONTO))
            .await
            .unwrap();
        assert!(search_stores(&catalog, "").await.unwrap().is_empty());
        assert!(search_stores(&catalog, "   ").await.unwrap().is_empty());
        assert!(search_stores(&catalog, "sushi").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_search_ranks_and_caps_at_five() {
        let catalog = MemoryCatalog::new();
        for i in 0..7 {
            catalog
                .insert_store(draft(&format!("Shop {i}"), "we sell coffee", &[], TORONTO))
                .await
                .unwrap();
        }
        let best = catalog
            .insert_store(draft("Coffee Coffee", "coffee roasters", &[], TORONTO))
            .await
            .unwrap();
        catalog
            .insert_store(draft("Tea Room", "loose leaf", &[], TORONTO))
            .await
            .unwrap();

        let hits = search_stores(&catalog, "coffee").await.unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].store.id, best.id);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.store.name != "Tea Room"));
    }

    #[tokio::test]
    async fn text_search_matches_any_term() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert_store(draft("Tea Room", "loose leaf", &[], TORONTO))
            .await
            .unwrap();
        let hits = search_stores(&catalog, "coffee tea").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn proximity_includes_point_and_excludes_15_km() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert_store(draft("Far", "", &[], north_of(TORONTO, 15.0)))
            .await
            .unwrap();
        catalog
            .insert_store(draft("Mid", "", &[], north_of(TORONTO, 5.0)))
            .await
            .unwrap();
        catalog
            .insert_store(draft("Here", "", &[], TORONTO))
            .await
            .unwrap();

        let near = stores_near(&catalog, TORONTO).await.unwrap();
        let names: Vec<&str> = near.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Here", "Mid"]);
        assert_eq!(near[0].slug, "here");
    }

    #[tokio::test]
    async fn proximity_caps_at_ten() {
        let catalog = MemoryCatalog::new();
        for i in 0..12 {
            catalog
                .insert_store(draft(&format!("S{i}"), "", &[], north_of(TORONTO, i as f64 * 0.5)))
                .await
                .unwrap();
        }
        let near = stores_near(&catalog, TORONTO).await.unwrap();
        assert_eq!(near.len(), 10);
        assert_eq!(near[0].name, "S0");
        assert_eq!(near[9].name, "S9");
    }

    #[tokio::test]
    async fn facets_sum_to_memberships_and_sort_descending() {
        let catalog = MemoryCatalog::new();
        let stores = [
            draft("A", "", &["wifi", "vegan"], TORONTO),
            draft("B", "", &["wifi"], TORONTO),
            draft("C", "", &["wifi", "family", "vegan"], TORONTO),
            draft("D", "", &[], TORONTO),
        ];
        let memberships: usize = stores.iter().map(|d| d.tags.len()).sum();
        for d in stores {
            catalog.insert_store(d).await.unwrap();
        }

        let facets = tag_list(&catalog).await.unwrap();
        assert_eq!(facets.iter().map(|f| f.count).sum::<i64>(), memberships as i64);
        assert!(facets.windows(2).all(|w| w[0].count >= w[1].count));
        assert_eq!(facets[0].tag, "wifi");
    }

    #[tokio::test]
    async fn stores_by_tag_filters_and_returns_facets() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert_store(draft("A", "", &["wifi", "vegan"], TORONTO))
            .await
            .unwrap();
        catalog
            .insert_store(draft("B", "", &["wifi"], TORONTO))
            .await
            .unwrap();
        catalog
            .insert_store(draft("C", "", &[], TORONTO))
            .await
            .unwrap();

        let vegan = stores_by_tag(&catalog, Some("vegan")).await.unwrap();
        assert_eq!(vegan.stores.len(), 1);
        assert_eq!(vegan.tags.len(), 2);
        assert_eq!(vegan.tag.as_deref(), Some("vegan"));

        let all = stores_by_tag(&catalog, None).await.unwrap();
        assert_eq!(all.stores.len(), 3);
    }

    #[tokio::test]
    async fn top_stores_needs_two_reviews_and_sorts_by_average() {
        let catalog = MemoryCatalog::new();
        let single = catalog.insert_store(draft("Single", "", &[], TORONTO)).await.unwrap();
        let even = catalog.insert_store(draft("Even", "", &[], TORONTO)).await.unwrap();
        let best = catalog.insert_store(draft("Best", "", &[], TORONTO)).await.unwrap();
        catalog.insert_store(draft("Unrated", "", &[], TORONTO)).await.unwrap();
        rate(&catalog, &single, &[5]).await;
        rate(&catalog, &even, &[3, 5]).await;
        rate(&catalog, &best, &[5, 5, 4]).await;

        let top = top_stores(&catalog).await.unwrap();
        let names: Vec<&str> = top.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Best", "Even"]);
        assert_eq!(top[1].average_rating, 4.0);
        assert_eq!(top[1].reviews.len(), 2);
    }

    #[tokio::test]
    async fn top_stores_caps_at_ten() {
        let catalog = MemoryCatalog::new();
        for i in 0..12 {
            let s = catalog
                .insert_store(draft(&format!("S{i}"), "", &[], TORONTO))
                .await
                .unwrap();
            rate(&catalog, &s, &[4, 4]).await;
        }
        let top = top_stores(&catalog).await.unwrap();
        // Ties: stable but unspecified order, so only the size is asserted.
        assert_eq!(top.len(), 10);
    }

    #[tokio::test]
    async fn pagination_pages_and_redirects() {
        let catalog = MemoryCatalog::new();
        for i in 0..10 {
            catalog
                .insert_store(draft(&format!("S{i}"), "", &[], TORONTO))
                .await
                .unwrap();
        }

        let PageOutcome::Page(first) = list_stores(&catalog, 1).await.unwrap() else {
            panic!("page 1 exists");
        };
        assert_eq!(first.stores.len(), 4);
        assert_eq!(first.pages, 3);
        assert_eq!(first.count, 10);
        assert_eq!(first.stores[0].name, "S9");

        let PageOutcome::Page(last) = list_stores(&catalog, 3).await.unwrap() else {
            panic!("page 3 exists");
        };
        assert_eq!(last.stores.len(), 2);

        match list_stores(&catalog, 5).await.unwrap() {
            PageOutcome::OutOfRange {
                requested,
                last_page,
            } => {
                assert_eq!(requested, 5);
                assert_eq!(last_page, 3);
            }
            PageOutcome::Page(_) => panic!("page 5 should be out of range"),
        }
    }

    #[tokio::test]
    async fn huge_page_number_is_out_of_range() {
        let catalog = MemoryCatalog::new();
        for i in 0..5 {
            catalog
                .insert_store(draft(&format!("S{i}"), "", &[], TORONTO))
                .await
                .unwrap();
        }
        match list_stores(&catalog, i64::MAX).await.unwrap() {
            PageOutcome::OutOfRange {
                requested,
                last_page,
            } => {
                assert_eq!(requested, i64::MAX);
                assert_eq!(last_page, 2);
            }
            PageOutcome::Page(_) => panic!("i64::MAX should be out of range"),
        }

        let empty = MemoryCatalog::new();
        assert!(matches!(
            list_stores(&empty, i64::MAX).await.unwrap(),
            PageOutcome::OutOfRange { last_page: 1, .. }
        ));
    }

    #[tokio::test]
    async fn first_page_of_empty_catalog_is_a_page() {
        let catalog = MemoryCatalog::new();
        let PageOutcome::Page(page) = list_stores(&catalog, 0).await.unwrap() else {
            panic!("page 1 always renders");
        };
        assert_eq!(page.page, 1);
        assert_eq!(page.pages, 0);
        assert!(page.stores.is_empty());
    }
}
