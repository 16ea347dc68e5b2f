//! Per-user cart lines and priced summaries.

use chrono::{DateTime, Utc};
use common::{CartLineId, Money, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Product, Variant};

/// One (product, size, color) entry of a user's cart.
///
/// At most one line exists per (user, product, size, color); quantity is
/// always positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub size: String,
    pub color: String,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl CartLine {
    /// Returns true if this line holds the given product/size/color.
    pub fn matches(&self, product_id: ProductId, size: &str, color: &str) -> bool {
        self.product_id == product_id && self.size == size && self.color == color
    }
}

/// Result of changing a line's quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QuantityChange {
    Updated(CartLine),
    /// The quantity was zero or less and the line is gone.
    Removed { line_id: CartLineId },
}

/// A cart line joined with its product for display and pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemView {
    pub line_id: CartLineId,
    pub product_id: ProductId,
    pub product_name: String,
    pub size: String,
    pub color: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
    pub is_archived: bool,
    pub image: Option<String>,
}

impl CartItemView {
    /// Joins `line` with its product and, when it still exists, its variant.
    pub fn new(line: &CartLine, product: &Product, variant: Option<&Variant>) -> Self {
        let unit_price = variant
            .map(|v| v.effective_price(product.price))
            .unwrap_or(product.price);
        Self {
            line_id: line.id,
            product_id: line.product_id,
            product_name: product.name.clone(),
            size: line.size.clone(),
            color: line.color.clone(),
            quantity: line.quantity,
            unit_price,
            line_total: unit_price.multiply(line.quantity),
            is_archived: product.is_archived,
            image: product.main_image().map(str::to_string),
        }
    }
}

/// All lines of a cart with totals.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartSummary {
    pub items: Vec<CartItemView>,
    /// Sum of line totals, archived products excluded.
    pub total_amount: Money,
    /// Sum of quantities over every line, archived products included.
    pub total_items: u32,
}

impl CartSummary {
    pub fn compute(items: Vec<CartItemView>) -> Self {
        let total_amount = items
            .iter()
            .filter(|item| !item.is_archived)
            .map(|item| item.line_total)
            .sum();
        let total_items = items.iter().map(|item| item.quantity).sum();
        Self {
            items,
            total_amount,
            total_items,
        }
    }
}
