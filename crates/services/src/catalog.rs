//! Catalog writes and public catalog reads.

use std::sync::Arc;

use chrono::Utc;
use common::{ProductId, VariantId};
use domain::{
    NewProduct, NewVariant, Page, Product, ProductFilter, ProductUpdate, Variant, VariantUpdate,
};
use serde::Serialize;
use store::{CatalogStore, StoreError};

use crate::auth::{CATALOG_MANAGERS, Caller};
use crate::error::{Result, ServiceError};

const SEARCH_LIMIT: u32 = 20;
const TRENDING_LIMIT: u32 = 10;

/// A product together with its purchasable variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub variants: Vec<Variant>,
}

/// Products and variants.
///
/// Variant writes go through the store, which recomputes the parent's stock
/// and color aggregates in the same write.
pub struct CatalogService<S> {
    store: Arc<S>,
}

impl<S: CatalogStore> CatalogService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Creates a product with its initial variants.
    ///
    /// A SKU that is already registered is a validation failure here, not a
    /// conflict: the whole payload is rejected.
    #[tracing::instrument(skip(self, data, variants), fields(name = %data.name))]
    pub async fn create_product(
        &self,
        caller: &Caller,
        data: NewProduct,
        variants: Vec<NewVariant>,
    ) -> Result<Product> {
        caller.require_any(CATALOG_MANAGERS)?;
        data.validate()?;
        for variant in &variants {
            variant.validate()?;
        }

        let product = Product::from_new(ProductId::new(), data, Utc::now());
        let variants = variants
            .into_iter()
            .map(|v| Variant::from_new(VariantId::new(), product.id, v))
            .collect();

        let product = self
            .store
            .insert_product(product, variants)
            .await
            .map_err(|e| match e {
                StoreError::DuplicateSku(sku) => {
                    ServiceError::BadRequest(format!("SKU {sku} is already registered"))
                }
                other => other.into(),
            })?;

        tracing::info!(product_id = %product.id, stock = product.stock, "Product created");
        Ok(product)
    }

    /// Adds a variant to an existing product.
    #[tracing::instrument(skip(self, data), fields(sku = %data.sku))]
    pub async fn add_variant(
        &self,
        caller: &Caller,
        product_id: ProductId,
        data: NewVariant,
    ) -> Result<Product> {
        caller.require_any(CATALOG_MANAGERS)?;
        data.validate()?;
        self.load_product(product_id).await?;

        let variant = Variant::from_new(VariantId::new(), product_id, data);
        Ok(self.store.insert_variant(variant).await?)
    }

    #[tracing::instrument(skip(self, patch))]
    pub async fn update_variant(
        &self,
        caller: &Caller,
        variant_id: VariantId,
        patch: VariantUpdate,
    ) -> Result<Product> {
        caller.require_any(CATALOG_MANAGERS)?;
        patch.validate()?;

        let mut variant = self
            .store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Variant not found".to_string()))?;
        patch.apply(&mut variant);
        Ok(self.store.save_variant(&variant).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_variant(&self, caller: &Caller, variant_id: VariantId) -> Result<Product> {
        caller.require_any(CATALOG_MANAGERS)?;
        Ok(self.store.delete_variant(variant_id).await?)
    }

    #[tracing::instrument(skip(self, patch))]
    pub async fn update_product(
        &self,
        caller: &Caller,
        product_id: ProductId,
        patch: ProductUpdate,
    ) -> Result<Product> {
        caller.require_any(CATALOG_MANAGERS)?;
        patch.validate()?;

        let mut product = self.load_product(product_id).await?;
        patch.apply(&mut product, Utc::now());
        self.store.save_product(&product).await?;
        Ok(product)
    }

    /// Soft-deletes a product; it disappears from every public read.
    #[tracing::instrument(skip(self))]
    pub async fn archive_product(&self, caller: &Caller, product_id: ProductId) -> Result<Product> {
        caller.require_any(CATALOG_MANAGERS)?;

        let mut product = self.load_product(product_id).await?;
        product.is_archived = true;
        product.updated_at = Utc::now();
        self.store.save_product(&product).await?;
        tracing::info!(product_id = %product.id, "Product archived");
        Ok(product)
    }

    /// Public product page. Archived products read as missing.
    pub async fn get_product(&self, product_id: ProductId) -> Result<ProductDetail> {
        let product = self.load_product(product_id).await?;
        if product.is_archived {
            return Err(ServiceError::NotFound("Product not found".to_string()));
        }
        let variants = self.store.list_variants(product_id).await?;
        Ok(ProductDetail { product, variants })
    }

    pub async fn list_products(&self, filter: &ProductFilter) -> Result<Page<Product>> {
        Ok(self.store.list_products(filter).await?)
    }

    /// Case-insensitive keyword search over name, description and brand.
    pub async fn search(&self, keyword: &str) -> Result<Vec<Product>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.search_products(keyword, SEARCH_LIMIT).await?)
    }

    pub async fn trending(&self) -> Result<Vec<Product>> {
        Ok(self.store.trending_products(TRENDING_LIMIT).await?)
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        Ok(self.store.categories().await?)
    }

    pub async fn brands(&self) -> Result<Vec<String>> {
        Ok(self.store.brands().await?)
    }

    async fn load_product(&self, product_id: ProductId) -> Result<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))
    }
}
