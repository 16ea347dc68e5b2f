//! Domain layer for the storefront backend.
//!
//! This crate holds the data model and the business rules that do not need
//! persistence or I/O:
//! - Catalog products, variants and their derived stock aggregates
//! - Cart lines and priced cart summaries
//! - Orders, the order status machine, pricing breakdown and timeline
//! - Try-on records and the staleness rule for in-flight jobs
//! - Accounts, roles, addresses, favorites and one-time login codes

pub mod account;
pub mod cart;
pub mod catalog;
pub mod error;
pub mod favorite;
pub mod order;
pub mod try_on;

pub use account::{
    Address, AddressSnapshot, MAX_OTP_ATTEMPTS, NewAddress, NewUser, OtpCode, Role, User,
};
pub use cart::{CartItemView, CartLine, CartSummary, QuantityChange};
pub use catalog::{
    Gender, NewProduct, NewVariant, Page, Product, ProductFilter, ProductSort, ProductUpdate,
    StockAggregate, Variant, VariantUpdate,
};
pub use error::DomainError;
pub use favorite::{Favorite, FavoriteToggle};
pub use order::{
    Order, OrderItem, OrderStatus, PaymentType, PriceBreakdown, PricingRules, TimelineEntry,
};
pub use try_on::{TryOnKind, TryOnRecord, TryOnStatus};
