//! Persistence for the storefront backend.
//!
//! The ports are async traits split by concern and bundled by [`Store`].
//! [`InMemoryStore`] keeps all tables behind one lock and is used by tests
//! and local runs; [`PostgresStore`] is the production implementation.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    AccountStore, AddressStore, CartStore, CatalogStore, FavoriteStore, OrderStore, PaymentCommit,
    Store, TryOnStore,
};
