//! Catalog products and their size/color variants.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{Money, ProductId, VariantId};
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Target audience tag of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Men,
    Women,
    #[default]
    Unisex,
    Kids,
}

impl Gender {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Men => "MEN",
            Gender::Women => "WOMEN",
            Gender::Unisex => "UNISEX",
            Gender::Kids => "KIDS",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Gender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MEN" => Ok(Gender::Men),
            "WOMEN" => Ok(Gender::Women),
            "UNISEX" => Ok(Gender::Unisex),
            "KIDS" => Ok(Gender::Kids),
            other => Err(DomainError::UnknownVariant {
                kind: "gender",
                value: other.to_string(),
            }),
        }
    }
}

/// A catalog product.
///
/// `stock` and `colors` are derived from the product's variants and are only
/// ever written through [`StockAggregate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub gender: Gender,
    pub category: String,
    pub brand: String,
    pub stock: i64,
    pub colors: Vec<String>,
    pub images: Vec<String>,
    pub is_trending: bool,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Builds a product from creation data with empty aggregates.
    pub fn from_new(id: ProductId, data: NewProduct, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: data.name,
            description: data.description,
            price: data.price,
            gender: data.gender,
            category: data.category,
            brand: data.brand,
            stock: 0,
            colors: Vec::new(),
            images: data.images,
            is_trending: data.is_trending,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the derived stock and color set.
    pub fn apply_aggregate(&mut self, aggregate: StockAggregate) {
        self.stock = aggregate.stock;
        self.colors = aggregate.colors;
    }

    /// Returns the first image, used as the thumbnail in order listings.
    pub fn main_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }

    /// Case-insensitive substring match on name, description and brand.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.name.to_lowercase().contains(&keyword)
            || self.description.to_lowercase().contains(&keyword)
            || self.brand.to_lowercase().contains(&keyword)
    }
}

/// Data required to create a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    #[serde(default)]
    pub gender: Gender,
    pub category: String,
    pub brand: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_trending: bool,
}

impl NewProduct {
    /// Checks field-level constraints.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::EmptyField { field: "name" });
        }
        if self.price.is_negative() {
            return Err(DomainError::InvalidPrice {
                price: self.price.minor(),
            });
        }
        Ok(())
    }
}

/// Partial update of a product's own (non-derived) fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub gender: Option<Gender>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub images: Option<Vec<String>>,
    pub is_trending: Option<bool>,
    pub is_archived: Option<bool>,
}

impl ProductUpdate {
    /// Checks field-level constraints of the fields being changed.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.as_ref().is_some_and(|name| name.trim().is_empty()) {
            return Err(DomainError::EmptyField { field: "name" });
        }
        if let Some(price) = self.price.filter(Money::is_negative) {
            return Err(DomainError::InvalidPrice {
                price: price.minor(),
            });
        }
        Ok(())
    }

    /// Applies the present fields to `product`.
    pub fn apply(self, product: &mut Product, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            product.name = name;
        }
        if let Some(description) = self.description {
            product.description = description;
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(gender) = self.gender {
            product.gender = gender;
        }
        if let Some(category) = self.category {
            product.category = category;
        }
        if let Some(brand) = self.brand {
            product.brand = brand;
        }
        if let Some(images) = self.images {
            product.images = images;
        }
        if let Some(is_trending) = self.is_trending {
            product.is_trending = is_trending;
        }
        if let Some(is_archived) = self.is_archived {
            product.is_archived = is_archived;
        }
        product.updated_at = now;
    }
}

/// A size/color SKU of a product; the unit of stock tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub size: String,
    pub color: String,
    pub sku: String,
    pub stock: i64,
    pub price_override: Option<Money>,
}

impl Variant {
    /// Builds a variant of `product_id` from creation data.
    pub fn from_new(id: VariantId, product_id: ProductId, data: NewVariant) -> Self {
        Self {
            id,
            product_id,
            size: data.size,
            color: data.color,
            sku: data.sku,
            stock: data.stock,
            price_override: data.price_override,
        }
    }

    /// Unit price of this variant: the override when set, else the product price.
    pub fn effective_price(&self, product_price: Money) -> Money {
        self.price_override.unwrap_or(product_price)
    }

    /// Returns true if this variant is the given size/color combination.
    pub fn is(&self, size: &str, color: &str) -> bool {
        self.size == size && self.color == color
    }

    /// Returns true if `quantity` units can be taken from stock.
    pub fn can_cover(&self, quantity: u32) -> bool {
        self.stock >= i64::from(quantity)
    }
}

/// Data required to create a variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVariant {
    pub size: String,
    pub color: String,
    pub sku: String,
    pub stock: i64,
    #[serde(default)]
    pub price_override: Option<Money>,
}

impl NewVariant {
    /// Checks field-level constraints.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::EmptyField { field: "sku" });
        }
        if self.size.trim().is_empty() {
            return Err(DomainError::EmptyField { field: "size" });
        }
        if self.color.trim().is_empty() {
            return Err(DomainError::EmptyField { field: "color" });
        }
        if self.stock < 0 {
            return Err(DomainError::InvalidStock { stock: self.stock });
        }
        if let Some(price) = self.price_override.filter(Money::is_negative) {
            return Err(DomainError::InvalidPrice {
                price: price.minor(),
            });
        }
        Ok(())
    }
}

/// Partial update of a variant. The SKU is immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantUpdate {
    pub size: Option<String>,
    pub color: Option<String>,
    pub stock: Option<i64>,
    /// `Some(None)` clears the override.
    pub price_override: Option<Option<Money>>,
}

impl VariantUpdate {
    /// Checks field-level constraints of the fields being changed.
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(stock) = self.stock.filter(|stock| *stock < 0) {
            return Err(DomainError::InvalidStock { stock });
        }
        Ok(())
    }

    /// Applies the present fields to `variant`.
    pub fn apply(self, variant: &mut Variant) {
        if let Some(size) = self.size {
            variant.size = size;
        }
        if let Some(color) = self.color {
            variant.color = color;
        }
        if let Some(stock) = self.stock {
            variant.stock = stock;
        }
        if let Some(price_override) = self.price_override {
            variant.price_override = price_override;
        }
    }
}

/// Stock and color set of a product, derived from its variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAggregate {
    /// Sum of all variant stock.
    pub stock: i64,
    /// Distinct variant colors, sorted.
    pub colors: Vec<String>,
}

impl StockAggregate {
    /// Recomputes the aggregate from the full variant set of one product.
    pub fn from_variants<'a>(variants: impl IntoIterator<Item = &'a Variant>) -> Self {
        let mut stock = 0;
        let mut colors = BTreeSet::new();
        for variant in variants {
            stock += variant.stock;
            colors.insert(variant.color.clone());
        }
        StockAggregate {
            stock,
            colors: colors.into_iter().collect(),
        }
    }
}

/// Sort order for public product listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    /// Alphabetical by name.
    #[default]
    Name,
    Newest,
    PriceAsc,
    PriceDesc,
}

/// Filters and pagination for public product listings.
///
/// Archived products never match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductFilter {
    pub gender: Option<Gender>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    #[serde(default)]
    pub sort: ProductSort,
    #[serde(default = "ProductFilter::default_page")]
    pub page: u32,
    #[serde(default = "ProductFilter::default_limit")]
    pub limit: u32,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            gender: None,
            category: None,
            brand: None,
            min_price: None,
            max_price: None,
            sort: ProductSort::default(),
            page: Self::default_page(),
            limit: Self::default_limit(),
        }
    }
}

impl ProductFilter {
    fn default_page() -> u32 {
        1
    }

    fn default_limit() -> u32 {
        10
    }

    /// Number of rows to skip for the requested page (pages are 1-based).
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }

    /// Returns true if `product` is visible under this filter.
    pub fn matches(&self, product: &Product) -> bool {
        if product.is_archived {
            return false;
        }
        self.gender.is_none_or(|gender| product.gender == gender)
            && self.category.as_ref().is_none_or(|c| &product.category == c)
            && self.brand.as_ref().is_none_or(|b| &product.brand == b)
            && self.min_price.is_none_or(|min| product.price >= min)
            && self.max_price.is_none_or(|max| product.price <= max)
    }

    /// Sorts `products` in place according to `self.sort`.
    pub fn sort(&self, products: &mut [Product]) {
        match self.sort {
            ProductSort::Name => products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
            ProductSort::Newest => products.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            ProductSort::PriceAsc => products.sort_by(|a, b| a.price.cmp(&b.price)),
            ProductSort::PriceDesc => products.sort_by(|a, b| b.price.cmp(&a.price)),
        }
    }
}

/// One page of results plus the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}
