//! Domain error types.

use thiserror::Error;

/// Violations of business rules that can be detected without I/O.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// A quantity was zero where a positive amount is required.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A stock value would become negative.
    #[error("Invalid stock: {stock} (must not be negative)")]
    InvalidStock { stock: i64 },

    /// A price was negative.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: i64 },

    /// A required text field was empty.
    #[error("Field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    /// An order was built with no items.
    #[error("Order has no items")]
    EmptyOrder,

    /// A wire value did not name a known enum variant.
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
