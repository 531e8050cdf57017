//! Catalog facade: product listings for the storefront and the admin area,
//! plus single-record CRUD.

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client_provider::BackendHandle;
use crate::{
    backend::{Filter, Query, Rows},
    config::BackendConfig,
    errors::{BackendError, CatalogError},
    models::product::{NewProduct, Page, Product, ProductFilters, ProductPatch},
};

pub const PUBLIC_PAGE_SIZE: u64 = 12;
pub const ADMIN_PAGE_SIZE: u64 = 20;

/// Columns stamped by the backend or by this service, never by callers.
const BACKEND_OWNED: [&str; 3] = ["id", "created_at", "created_by"];

/// Typed fields; passthrough attributes may not shadow them.
const TYPED_COLUMNS: [&str; 3] = ["name", "colors", "is_public"];

/// Zero-based inclusive row window for a one-based page.
///
/// A page or page size of zero falls back to page 1 / `default_size`. A
/// window past `u64::MAX` is a validation error.
pub fn page_window(
    page: Option<u64>,
    page_size: Option<u64>,
    default_size: u64,
) -> Result<(u64, u64), CatalogError> {
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    let size = page_size.filter(|s| *s > 0).unwrap_or(default_size).max(1);
    (page - 1)
        .checked_mul(size)
        .and_then(|from| from.checked_add(size - 1).map(|to| (from, to)))
        .ok_or_else(|| {
            CatalogError::Validation(format!("page {page} of size {size} is out of range"))
        })
}

#[derive(Clone)]
pub struct CatalogService {
    backend: BackendHandle,
    table: String,
}

impl CatalogService {
    pub fn new(backend: BackendHandle, config: &BackendConfig) -> Self {
        Self {
            backend,
            table: config.products_table.clone(),
        }
    }

    /// Public products, newest first, optionally narrowed by color and name.
    pub async fn list_public_products(
        &self,
        filters: &ProductFilters,
    ) -> Result<Page<Product>, CatalogError> {
        let mut query = Query::new().eq("is_public", true);
        if let Some(color) = filters.color.as_deref().filter(|c| !c.is_empty()) {
            query = query.contains("colors", vec![Value::from(color)]);
        }
        if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.ilike("name", format!("%{search}%"));
        }
        self.page(query, filters, PUBLIC_PAGE_SIZE).await
    }

    /// Every product regardless of visibility, for the admin area.
    pub async fn list_all_products(
        &self,
        filters: &ProductFilters,
    ) -> Result<Page<Product>, CatalogError> {
        self.page(Query::new(), filters, ADMIN_PAGE_SIZE).await
    }

    async fn page(
        &self,
        query: Query,
        filters: &ProductFilters,
        default_size: u64,
    ) -> Result<Page<Product>, CatalogError> {
        let (from, to) = page_window(filters.page, filters.page_size, default_size)?;
        let query = query.order("created_at", false).range(from, to).with_count();
        debug!(table = %self.table, from, to, "listing products");

        let Rows { rows, total } = self.backend.select(&self.table, &query).await?;
        let items = decode_rows(rows)?;
        let total_count = total.unwrap_or(from.saturating_add(items.len() as u64));
        Ok(Page { items, total_count })
    }

    /// Exactly one product with `id`; zero or several matches is `NotFound`.
    pub async fn get_product(&self, id: Uuid) -> Result<Product, CatalogError> {
        let query = Query::new().eq("id", id.to_string());
        let Rows { rows, .. } = self.backend.select(&self.table, &query).await?;
        single(id, rows)
    }

    /// Insert a product stamped with the signed-in user's id.
    pub async fn create_product(&self, mut product: NewProduct) -> Result<Product, CatalogError> {
        if product.name.trim().is_empty() {
            return Err(CatalogError::Validation("name must not be empty".into()));
        }
        reject_reserved(&product.extra)?;

        product.created_by = self.backend.user().await?.map(|user| user.id);
        if product.created_by.is_none() {
            warn!("creating product without a signed-in user");
        }

        let row = serde_json::to_value(&product).map_err(BackendError::from)?;
        let stored = self.backend.insert(&self.table, row).await?;
        let created: Product = serde_json::from_value(stored).map_err(BackendError::from)?;
        info!(product_id = %created.id, "product created");
        Ok(created)
    }

    /// Change only the fields set in `patch`.
    pub async fn update_product(
        &self,
        id: Uuid,
        patch: ProductPatch,
    ) -> Result<Product, CatalogError> {
        if patch.is_empty() {
            return Err(CatalogError::Validation("nothing to update".into()));
        }
        if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(CatalogError::Validation("name must not be empty".into()));
        }
        reject_reserved(&patch.extra)?;

        let body = serde_json::to_value(&patch).map_err(BackendError::from)?;
        let rows = self
            .backend
            .update(&self.table, &[id_filter(id)], body)
            .await?;
        let updated = single(id, rows)?;
        info!(product_id = %id, "product updated");
        Ok(updated)
    }

    /// Delete by id. Deleting an unknown id is not an error.
    pub async fn delete_product(&self, id: Uuid) -> Result<(), CatalogError> {
        self.backend.delete(&self.table, &[id_filter(id)]).await?;
        info!(product_id = %id, "product deleted");
        Ok(())
    }
}

fn id_filter(id: Uuid) -> Filter {
    Filter::Eq("id".into(), Value::String(id.to_string()))
}

/// Passthrough attributes are serialized after the typed fields and would
/// overwrite them, so neither backend-owned nor typed columns may appear.
fn reject_reserved(extra: &serde_json::Map<String, Value>) -> Result<(), CatalogError> {
    if let Some(column) = BACKEND_OWNED.iter().find(|column| extra.contains_key(**column)) {
        return Err(CatalogError::Validation(format!(
            "`{column}` cannot be set by the caller"
        )));
    }
    if let Some(column) = TYPED_COLUMNS.iter().find(|column| extra.contains_key(**column)) {
        return Err(CatalogError::Validation(format!(
            "`{column}` must be set through its own field"
        )));
    }
    Ok(())
}

fn decode_rows(rows: Vec<Value>) -> Result<Vec<Product>, CatalogError> {
    rows.into_iter()
        .map(|row| -> Result<Product, CatalogError> {
            Ok(serde_json::from_value(row).map_err(BackendError::from)?)
        })
        .collect()
}

fn single(id: Uuid, rows: Vec<Value>) -> Result<Product, CatalogError> {
    if rows.len() != 1 {
        return Err(CatalogError::NotFound {
            id: id.to_string(),
            matched: rows.len(),
        });
    }
    let mut products = decode_rows(rows)?;
    Ok(products.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn service(backend: Arc<MemoryBackend>) -> CatalogService {
        CatalogService::new(backend, &BackendConfig::new("https://x.example.com", "anon"))
    }

    fn product_row(name: &str, colors: &[&str], public: bool, created_at: &str) -> Value {
        json!({
            "id": Uuid::new_v4().to_string(),
            "name": name,
            "colors": colors,
            "is_public": public,
            "created_at": created_at,
        })
    }

    #[test]
    fn page_windows() {
        assert_eq!(page_window(Some(2), Some(10), ADMIN_PAGE_SIZE).unwrap(), (10, 19));
        assert_eq!(page_window(Some(1), Some(12), PUBLIC_PAGE_SIZE).unwrap(), (0, 11));
        assert_eq!(page_window(None, None, PUBLIC_PAGE_SIZE).unwrap(), (0, 11));
        assert_eq!(page_window(Some(0), Some(0), ADMIN_PAGE_SIZE).unwrap(), (0, 19));
        assert_eq!(page_window(Some(3), None, ADMIN_PAGE_SIZE).unwrap(), (40, 59));
    }

    #[test]
    fn oversized_pages_are_rejected() {
        assert!(matches!(
            page_window(Some(u64::MAX), Some(20), ADMIN_PAGE_SIZE),
            Err(CatalogError::Validation(_))
        ));
        assert!(matches!(
            page_window(Some(2), Some(u64::MAX), ADMIN_PAGE_SIZE),
            Err(CatalogError::Validation(_))
        ));
        assert_eq!(
            page_window(Some(1), Some(u64::MAX), ADMIN_PAGE_SIZE).unwrap(),
            (0, u64::MAX - 1)
        );
    }

    #[tokio::test]
    async fn huge_page_numbers_fail_without_querying() {
        let backend = Arc::new(MemoryBackend::new());
        let catalog = service(backend.clone());

        let err = catalog
            .list_public_products(&ProductFilters {
                page: Some(u64::MAX / 2),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn listings_request_the_expected_windows() {
        let backend = Arc::new(MemoryBackend::new());
        let catalog = service(backend.clone());

        catalog
            .list_all_products(&ProductFilters {
                page: Some(2),
                page_size: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        catalog
            .list_public_products(&ProductFilters {
                page: Some(1),
                page_size: Some(12),
                ..Default::default()
            })
            .await
            .unwrap();

        let queries = backend.queries();
        assert_eq!(queries[0].1.range, Some(10..=19));
        assert_eq!(queries[1].1.range, Some(0..=11));
        assert!(queries[1]
            .1
            .filters
            .contains(&Filter::Eq("is_public".into(), json!(true))));
        assert!(queries.iter().all(|(_, q)| q.count));
    }

    #[tokio::test]
    async fn public_listing_filters_and_orders() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(
            "products",
            [
                product_row("Red Scarf", &["#f00"], true, "2025-01-01T00:00:00Z"),
                product_row("Red Hat", &["#f00", "#000"], true, "2025-01-03T00:00:00Z"),
                product_row("Hidden Red", &["#f00"], false, "2025-01-04T00:00:00Z"),
                product_row("Blue Hat", &["#00f"], true, "2025-01-02T00:00:00Z"),
            ],
        );
        let catalog = service(backend);

        let reds = catalog
            .list_public_products(&ProductFilters {
                color: Some("#f00".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let names: Vec<_> = reds.items.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Red Hat", "Red Scarf"]);
        assert_eq!(reds.total_count, 2);

        let hats = catalog
            .list_public_products(&ProductFilters {
                search: Some("HAT".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let names: Vec<_> = hats.items.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Red Hat", "Blue Hat"]);
    }

    #[tokio::test]
    async fn admin_listing_includes_hidden_and_counts_all() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(
            "products",
            (0..25).map(|i| {
                product_row(&format!("p{i:02}"), &[], i % 2 == 0, &format!("2025-01-01T00:00:{i:02}Z"))
            }),
        );
        let catalog = service(backend);

        let page = catalog
            .list_all_products(&ProductFilters {
                page: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 25);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].name, "p04");
    }

    #[tokio::test]
    async fn get_product_requires_exactly_one_match() {
        let backend = Arc::new(MemoryBackend::new());
        let id = Uuid::new_v4();
        let row = json!({"id": id.to_string(), "name": "Twin", "created_at": "2025-01-01T00:00:00Z"});
        backend.seed("products", [row.clone()]);
        let catalog = service(backend.clone());

        assert_eq!(catalog.get_product(id).await.unwrap().name, "Twin");

        let missing = catalog.get_product(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, CatalogError::NotFound { matched: 0, .. }));

        backend.seed("products", [row]);
        let dup = catalog.get_product(id).await.unwrap_err();
        assert!(matches!(dup, CatalogError::NotFound { matched: 2, .. }));
    }

    #[tokio::test]
    async fn create_stamps_creator_and_update_is_partial() {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend.add_user("admin@example.com", "pw");
        crate::backend::AuthApi::sign_in_with_password(&*backend, "admin@example.com", "pw")
            .await
            .unwrap();
        let catalog = service(backend);

        let created = catalog
            .create_product(
                NewProduct::new("Canvas Bag")
                    .colors(["#fff"])
                    .public(true)
                    .attr("price", 25.0),
            )
            .await
            .unwrap();
        assert_eq!(created.created_by, Some(user.id));
        assert_eq!(created.extra.get("price"), Some(&json!(25.0)));

        let updated = catalog
            .update_product(
                created.id,
                ProductPatch {
                    is_public: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_public);
        assert_eq!(updated.name, "Canvas Bag");
        assert_eq!(updated.colors, vec!["#fff".to_string()]);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn client_cannot_choose_ids_or_blank_names() {
        let catalog = service(Arc::new(MemoryBackend::new()));

        let err = catalog
            .create_product(NewProduct::new("x").attr("id", "mine"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let err = catalog.create_product(NewProduct::new("  ")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn attributes_cannot_shadow_stamped_or_typed_columns() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("admin@example.com", "pw");
        crate::backend::AuthApi::sign_in_with_password(&*backend, "admin@example.com", "pw")
            .await
            .unwrap();
        let catalog = service(backend.clone());

        let forged = catalog
            .create_product(
                NewProduct::new("Bag").attr("created_by", "11111111-1111-1111-1111-111111111111"),
            )
            .await
            .unwrap_err();
        assert!(matches!(forged, CatalogError::Validation(_)));

        let blank = catalog
            .create_product(NewProduct::new("ok").attr("name", ""))
            .await
            .unwrap_err();
        assert!(matches!(blank, CatalogError::Validation(_)));

        for column in ["colors", "is_public"] {
            let err = catalog
                .create_product(NewProduct::new("ok").attr(column, json!(null)))
                .await
                .unwrap_err();
            assert!(matches!(err, CatalogError::Validation(_)), "{column}");
        }
        assert!(backend.rows("products").is_empty());

        let created = catalog.create_product(NewProduct::new("Bag")).await.unwrap();
        let mut patch = ProductPatch::default();
        patch.extra.insert("created_by".into(), json!(Uuid::new_v4()));
        let err = catalog.update_product(created.id, patch).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let mut patch = ProductPatch::default();
        patch.extra.insert("name".into(), json!(""));
        let err = catalog.update_product(created.id, patch).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert_eq!(catalog.get_product(created.id).await.unwrap().name, "Bag");
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found_and_delete_is_idempotent() {
        let catalog = service(Arc::new(MemoryBackend::new()));
        let id = Uuid::new_v4();

        let err = catalog
            .update_product(
                id,
                ProductPatch {
                    name: Some("New".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { matched: 0, .. }));

        catalog.delete_product(id).await.unwrap();
        catalog.delete_product(id).await.unwrap();
    }
}
