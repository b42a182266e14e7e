//! Product kind registry and catalog queries.
//!
//! Product kinds are resolved through a static registry table so that one set
//! of routes serves every kind; registering a new kind is a new `KindDef` row
//! plus its table, with no handler changes.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{Category, Product};
use crate::{Result, ShopError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Notebook,
    Smartphone,
}

/// One registered product kind: the URL discriminator, its backing table and
/// the marker the per-kind admin editors dispatch on.
#[derive(Debug)]
pub struct KindDef {
    pub discriminator: &'static str,
    pub table: &'static str,
    pub kind: ProductKind,
}

pub const KINDS: &[KindDef] = &[
    KindDef {
        discriminator: "notebook",
        table: "notebooks",
        kind: ProductKind::Notebook,
    },
    KindDef {
        discriminator: "smartphone",
        table: "smartphones",
        kind: ProductKind::Smartphone,
    },
];

/// Kind listed first on the home page.
pub const FEATURED_KIND: &str = "smartphone";

const HOME_PAGE_LIMIT: i64 = 5;

pub fn resolve(discriminator: &str) -> Option<&'static KindDef> {
    KINDS.iter().find(|k| k.discriminator == discriminator)
}

/// Base product view tagged with its kind discriminator.
#[derive(Debug, Serialize)]
pub struct ProductCard {
    pub kind: &'static str,
    #[serde(flatten)]
    pub product: Product,
}

#[derive(Debug, Serialize)]
pub struct CategorySummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub counts: BTreeMap<&'static str, i64>,
    pub total: i64,
}

// Table names below always come from the static registry, never from request
// input.

pub async fn product_by_slug<'e, E>(exec: E, kind: &KindDef, slug: &str) -> Result<Product>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT id, title, slug, image, description, price, category_id FROM {} WHERE slug = $1",
        kind.table
    );
    sqlx::query_as::<_, Product>(&sql)
        .bind(slug)
        .fetch_optional(exec)
        .await?
        .ok_or(ShopError::NotFound)
}

/// Full per-kind record (base plus kind-specific columns) as a JSON document,
/// tagged with the discriminator.
pub async fn detail_by_slug<'e, E>(exec: E, kind: &KindDef, slug: &str) -> Result<serde_json::Value>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT row_to_json(t) FROM {} t WHERE t.slug = $1", kind.table);
    let row: Option<serde_json::Value> = sqlx::query_scalar(&sql)
        .bind(slug)
        .fetch_optional(exec)
        .await?;
    let mut detail = row.ok_or(ShopError::NotFound)?;
    if let serde_json::Value::Object(map) = &mut detail {
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(kind.discriminator.to_string()),
        );
    }
    Ok(detail)
}

pub async fn category_by_slug(pool: &PgPool, slug: &str) -> Result<Category> {
    sqlx::query_as::<_, Category>("SELECT id, name, slug FROM categories WHERE slug = $1")
        .bind(slug)
        .fetch_optional(pool)
        .await?
        .ok_or(ShopError::NotFound)
}

/// Latest products across every kind, five per kind, featured kind first.
pub async fn latest_products(pool: &PgPool) -> Result<Vec<ProductCard>> {
    let mut cards = Vec::new();
    for kind in kinds_featured_first() {
        let sql = format!(
            "SELECT id, title, slug, image, description, price, category_id FROM {} ORDER BY created_at DESC LIMIT {}",
            kind.table, HOME_PAGE_LIMIT
        );
        let rows = sqlx::query_as::<_, Product>(&sql).fetch_all(pool).await?;
        cards.extend(rows.into_iter().map(|product| ProductCard {
            kind: kind.discriminator,
            product,
        }));
    }
    Ok(cards)
}

pub async fn products_in_category(pool: &PgPool, category_id: Uuid) -> Result<Vec<ProductCard>> {
    let mut cards = Vec::new();
    for kind in KINDS {
        let sql = format!(
            "SELECT id, title, slug, image, description, price, category_id FROM {} WHERE category_id = $1 ORDER BY created_at DESC",
            kind.table
        );
        let rows = sqlx::query_as::<_, Product>(&sql)
            .bind(category_id)
            .fetch_all(pool)
            .await?;
        cards.extend(rows.into_iter().map(|product| ProductCard {
            kind: kind.discriminator,
            product,
        }));
    }
    Ok(cards)
}

/// Every category with its per-kind product counts.
pub async fn categories_with_counts(pool: &PgPool) -> Result<Vec<CategorySummary>> {
    let categories =
        sqlx::query_as::<_, Category>("SELECT id, name, slug FROM categories ORDER BY name")
            .fetch_all(pool)
            .await?;
    let mut summaries: Vec<CategorySummary> = categories
        .into_iter()
        .map(|c| CategorySummary {
            id: c.id,
            name: c.name,
            slug: c.slug,
            counts: BTreeMap::new(),
            total: 0,
        })
        .collect();
    for kind in KINDS {
        let sql = format!(
            "SELECT category_id, COUNT(*) FROM {} GROUP BY category_id",
            kind.table
        );
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(&sql).fetch_all(pool).await?;
        let by_category: HashMap<Uuid, i64> = rows.into_iter().collect();
        for summary in &mut summaries {
            let count = by_category.get(&summary.id).copied().unwrap_or(0);
            summary.counts.insert(kind.discriminator, count);
            summary.total += count;
        }
    }
    Ok(summaries)
}

pub(crate) fn kinds_featured_first() -> Vec<&'static KindDef> {
    let mut kinds: Vec<_> = KINDS.iter().collect();
    kinds.sort_by_key(|k| k.discriminator != FEATURED_KIND);
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_kinds() {
        assert_eq!(resolve("notebook").map(|k| k.table), Some("notebooks"));
        assert_eq!(resolve("smartphone").map(|k| k.table), Some("smartphones"));
        assert!(resolve("piano").is_none());
        assert!(resolve("").is_none());
    }

    #[test]
    fn test_featured_kind_listed_first() {
        let kinds = kinds_featured_first();
        assert_eq!(kinds.len(), KINDS.len());
        assert_eq!(kinds[0].discriminator, FEATURED_KIND);
    }

    #[test]
    fn test_registry_discriminators_unique() {
        for (i, a) in KINDS.iter().enumerate() {
            for b in &KINDS[i + 1..] {
                assert_ne!(a.discriminator, b.discriminator);
                assert_ne!(a.table, b.table);
            }
        }
    }
}
