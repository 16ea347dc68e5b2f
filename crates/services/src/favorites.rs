//! Favorite products.

use std::sync::Arc;

use chrono::Utc;
use common::{ProductId, UserId};
use domain::{Favorite, FavoriteToggle, Page, Product};
use store::{CatalogStore, FavoriteStore};

use crate::error::{Result, ServiceError};

pub struct FavoriteService<S> {
    store: Arc<S>,
}

impl<S: CatalogStore + FavoriteStore> FavoriteService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Adds the product to the user's favorites, or removes it if present.
    #[tracing::instrument(skip(self))]
    pub async fn toggle(&self, user_id: UserId, product_id: ProductId) -> Result<FavoriteToggle> {
        self.store
            .get_product(product_id)
            .await?
            .filter(|product| !product.is_archived)
            .ok_or_else(|| ServiceError::NotFound("Product not found or unavailable".to_string()))?;

        match self.store.find_favorite(user_id, product_id).await? {
            Some(existing) => {
                self.store.delete_favorite(existing.id).await?;
                Ok(FavoriteToggle::Removed)
            }
            None => {
                let favorite = Favorite::new(user_id, product_id, Utc::now());
                self.store.insert_favorite(&favorite).await?;
                Ok(FavoriteToggle::Added)
            }
        }
    }

    pub async fn is_favorite(&self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        Ok(self
            .store
            .find_favorite(user_id, product_id)
            .await?
            .is_some())
    }

    /// Favorite products, newest first. Archived products are left out.
    pub async fn list(&self, user_id: UserId, page: u32, limit: u32) -> Result<Page<Product>> {
        Ok(self
            .store
            .list_favorites(user_id, page.max(1), limit.clamp(1, 100))
            .await?)
    }
}
