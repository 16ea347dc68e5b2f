//! Application services for the storefront backend.
//!
//! Each service owns one workflow and talks to persistence through the
//! `store` ports and to providers through the `gateways` traits:
//! - [`CatalogService`]: products, variants and public catalog reads
//! - [`CartService`]: per-user cart lines and priced summaries
//! - [`OrderService`]: order creation, payment and status timeline
//! - [`TryOnTracker`]: image-generation jobs and their poll loops
//! - [`AccountService`], [`AddressService`], [`FavoriteService`]
//!
//! Authorization is explicit: operations that need staff rights take a
//! [`Caller`] and check its role before touching anything.

pub mod accounts;
pub mod addresses;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod error;
pub mod favorites;
pub mod orders;
pub mod try_on;

pub use accounts::{AccountService, OTP_TTL_MINUTES};
pub use addresses::AddressService;
pub use auth::{CATALOG_MANAGERS, Caller, ORDER_MANAGERS};
pub use cart::{AddToCart, CartService};
pub use catalog::{CatalogService, ProductDetail};
pub use error::{Result, ServiceError};
pub use favorites::FavoriteService;
pub use orders::{OrderService, OrderTracking, TrackingEntry, VerificationOutcome};
pub use try_on::{PollOutcome, SubmitTryOn, TrackerConfig, TryOnTracker, classify_poll};
