//! HTTP route handlers, one module per area.

pub mod accounts;
pub mod cart;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod products;
pub mod try_on;
