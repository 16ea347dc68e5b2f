//! Shared identifiers and value types used by every layer of the storefront.

pub mod ids;
pub mod money;

pub use ids::{
    AddressId, CartLineId, FavoriteId, OrderId, ProductId, TryOnId, UserId, VariantId,
};
pub use money::Money;
