//! URL slugs for stores.

use tracing::debug;

use crate::catalog::Catalog;

const FALLBACK_SLUG: &str = "store";

/// Lowercases `name` and collapses every run of characters other than ASCII
/// letters and digits into a single `-`, without leading or trailing `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Pattern matching `base` and `base-<digits>`.
pub fn conflict_pattern(base: &str) -> String {
    format!("^({})(-[0-9]+)?$", regex::escape(base))
}

/// Slug for a store called `name`: the slugified base, or `base-(N+1)` when N
/// existing slugs already match the base pattern.
///
/// The suffix comes from the number of matches, not from the highest suffix
/// in use, so gaps left by renames or a concurrent insert can still yield a
/// slug that is already taken.
pub async fn allocate_slug(catalog: &dyn Catalog, name: &str) -> anyhow::Result<String> {
    let base = slugify(name);
    let taken = catalog.slugs_matching(&conflict_pattern(&base)).await?;
    let slug = if taken.is_empty() {
        base
    } else {
        format!("{}-{}", base, taken.len() + 1)
    };
    debug!(%slug, conflicts = taken.len(), "slug allocated");
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Location, MemoryCatalog, Point, StoreDraft};
    use uuid::Uuid;

    async fn seed(catalog: &MemoryCatalog, slug: &str) {
        catalog
            .insert_store(StoreDraft {
                name: slug.into(),
                slug: slug.into(),
                description: String::new(),
                tags: Vec::new(),
                location: Location {
                    coordinates: Point { lng: 0.0, lat: 0.0 },
                    address: "1 Main St".into(),
                },
                photo: None,
                author: Uuid::new_v4(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn slugify_normalizes() {
        assert_eq!(slugify("Tim Hortons"), "tim-hortons");
        assert_eq!(slugify("  Joe's   Coffee & Bagels!! "), "joe-s-coffee-bagels");
        assert_eq!(slugify("--Cafe--"), "cafe");
        assert_eq!(slugify("Café Olé"), "caf-ol");
        assert_eq!(slugify("Route 66"), "route-66");
    }

    #[test]
    fn slugify_falls_back_when_nothing_is_left() {
        assert_eq!(slugify("!!!"), "store");
        assert_eq!(slugify("寿司"), "store");
    }

    #[tokio::test]
    async fn fresh_name_gets_the_base() {
        let catalog = MemoryCatalog::new();
        seed(&catalog, "coffee-house").await;
        assert_eq!(allocate_slug(&catalog, "Coffee").await.unwrap(), "coffee");
    }

    #[tokio::test]
    async fn conflicts_add_a_count_suffix() {
        let catalog = MemoryCatalog::new();
        seed(&catalog, "coffee").await;
        assert_eq!(allocate_slug(&catalog, "Coffee").await.unwrap(), "coffee-2");
        seed(&catalog, "coffee-2").await;
        assert_eq!(allocate_slug(&catalog, "COFFEE!").await.unwrap(), "coffee-3");
    }

    #[tokio::test]
    async fn matching_ignores_case() {
        let catalog = MemoryCatalog::new();
        seed(&catalog, "Coffee").await;
        assert_eq!(allocate_slug(&catalog, "coffee").await.unwrap(), "coffee-2");
    }

    #[tokio::test]
    async fn suffix_counts_matches_rather_than_reading_them() {
        // Out-of-order suffixes: only the number of matches matters, so the
        // result collides with the existing "coffee-3".
        let catalog = MemoryCatalog::new();
        seed(&catalog, "coffee-7").await;
        seed(&catalog, "coffee-3").await;
        assert_eq!(allocate_slug(&catalog, "Coffee").await.unwrap(), "coffee-3");
    }
}
