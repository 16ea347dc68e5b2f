use common::{UserId, VariantId};
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when reading or writing storefront data.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity to update or delete does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A variant SKU is already registered.
    #[error("SKU already exists: {0}")]
    DuplicateSku(String),

    /// An account with the same email or phone exists.
    #[error("An account with this {field} already exists")]
    DuplicateAccount { field: &'static str },

    /// A conditional stock decrement did not hold.
    #[error("Insufficient stock for variant {variant_id}: requested {requested}")]
    InsufficientStock { variant_id: VariantId, requested: u32 },

    /// The user already has a generation job in progress.
    #[error("User {0} already has a try-on in progress")]
    ActiveTryOnJob(UserId),

    /// A stored value could not be mapped back to a domain type.
    #[error("Invalid stored value: {0}")]
    InvalidValue(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
