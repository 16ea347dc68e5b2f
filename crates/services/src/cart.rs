//! Per-user carts.

use std::sync::Arc;

use chrono::Utc;
use common::{CartLineId, ProductId, UserId};
use domain::{CartItemView, CartLine, CartSummary, Product, QuantityChange, Variant};
use serde::Deserialize;
use store::{CartStore, CatalogStore, StoreError};

use crate::error::{Result, ServiceError};

/// Request to put a product variant in the cart.
#[derive(Debug, Clone, Deserialize)]
pub struct AddToCart {
    pub product_id: ProductId,
    pub quantity: u32,
    pub size: String,
    pub color: String,
}

/// Cart lines keyed by (user, product, size, color).
pub struct CartService<S> {
    store: Arc<S>,
}

impl<S: CatalogStore + CartStore> CartService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Adds `quantity` of a variant, merging with an existing line.
    ///
    /// Fails with `OutOfStock` when the merged quantity exceeds the
    /// variant's stock, checked by the store in the same write. Stock itself
    /// is only committed at payment.
    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn add_or_increment(&self, user_id: UserId, request: AddToCart) -> Result<CartLine> {
        if request.quantity == 0 {
            return Err(ServiceError::BadRequest(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let product = self.visible_product(request.product_id).await?;
        let variant = self
            .resolve_variant(&product, &request.size, &request.color)
            .await?;

        let line = CartLine {
            id: CartLineId::new(),
            user_id,
            product_id: product.id,
            size: request.size,
            color: request.color,
            quantity: request.quantity,
            created_at: Utc::now(),
        };
        match self.store.add_cart_line(line, variant.id).await {
            Ok(line) => Ok(line),
            Err(StoreError::InsufficientStock { .. }) => Err(ServiceError::OutOfStock(format!(
                "Not enough stock. Only {} left.",
                variant.stock
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Priced view of the cart, newest line first.
    ///
    /// Lines of archived products stay listed but are left out of
    /// `total_amount`.
    pub async fn get_summary(&self, user_id: UserId) -> Result<CartSummary> {
        let lines = self.store.list_cart(user_id).await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines.iter().rev() {
            let Some(product) = self.store.get_product(line.product_id).await? else {
                continue;
            };
            let variant = self
                .store
                .find_variant(product.id, &line.size, &line.color)
                .await?;
            items.push(CartItemView::new(line, &product, variant.as_ref()));
        }

        Ok(CartSummary::compute(items))
    }

    /// Sets a line's quantity. Zero or less removes the line.
    #[tracing::instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        user_id: UserId,
        line_id: CartLineId,
        quantity: i64,
    ) -> Result<QuantityChange> {
        let line = self.owned_line(user_id, line_id).await?;

        if quantity <= 0 {
            self.store.delete_cart_line(line.id).await?;
            return Ok(QuantityChange::Removed { line_id: line.id });
        }

        let quantity = u32::try_from(quantity)
            .map_err(|_| ServiceError::BadRequest(format!("Quantity {quantity} is too large")))?;
        let product = self.visible_product(line.product_id).await?;
        let variant = self
            .resolve_variant(&product, &line.size, &line.color)
            .await?;
        if !variant.can_cover(quantity) {
            return Err(ServiceError::OutOfStock(
                "Not enough stock available".to_string(),
            ));
        }

        let line = self.store.set_cart_quantity(line.id, quantity).await?;
        Ok(QuantityChange::Updated(line))
    }

    pub async fn remove(&self, user_id: UserId, line_id: CartLineId) -> Result<()> {
        let line = self.owned_line(user_id, line_id).await?;
        self.store.delete_cart_line(line.id).await?;
        Ok(())
    }

    /// Empties the cart and returns how many lines were removed.
    pub async fn clear(&self, user_id: UserId) -> Result<u64> {
        Ok(self.store.clear_cart(user_id).await?)
    }

    async fn owned_line(&self, user_id: UserId, line_id: CartLineId) -> Result<CartLine> {
        self.store
            .get_cart_line(line_id)
            .await?
            .filter(|line| line.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("Cart item not found".to_string()))
    }

    async fn visible_product(&self, product_id: ProductId) -> Result<Product> {
        self.store
            .get_product(product_id)
            .await?
            .filter(|product| !product.is_archived)
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))
    }

    async fn resolve_variant(&self, product: &Product, size: &str, color: &str) -> Result<Variant> {
        self.store
            .find_variant(product.id, size, color)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "{} is not available in size {size} and color {color}",
                    product.name
                ))
            })
    }
}
