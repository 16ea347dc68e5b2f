//! Service error taxonomy.

use domain::DomainError;
use gateways::GatewayError;
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by the application services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    OutOfStock(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// An external provider was unreachable or refused the call.
    #[error("{0}")]
    Gateway(String),

    /// Persistence failed for a reason the caller cannot fix.
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StoreError::DuplicateSku(_)
            | StoreError::DuplicateAccount { .. }
            | StoreError::ActiveTryOnJob(_) => ServiceError::Conflict(err.to_string()),
            StoreError::InsufficientStock { .. } => ServiceError::OutOfStock(err.to_string()),
            StoreError::InvalidValue(domain) => ServiceError::BadRequest(domain.to_string()),
            other => ServiceError::Store(other),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        ServiceError::BadRequest(err.to_string())
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::Gateway(err.to_string())
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::{UserId, VariantId};

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let stock: ServiceError = StoreError::InsufficientStock {
            variant_id: VariantId::new(),
            requested: 2,
        }
        .into();
        assert!(matches!(stock, ServiceError::OutOfStock(_)));

        let job: ServiceError = StoreError::ActiveTryOnJob(UserId::new()).into();
        assert!(matches!(job, ServiceError::Conflict(_)));

        let missing: ServiceError = StoreError::NotFound {
            entity: "order",
            id: "x".to_string(),
        }
        .into();
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_gateway_errors_map_to_gateway() {
        let err: ServiceError = GatewayError::Unavailable("down".to_string()).into();
        assert!(matches!(err, ServiceError::Gateway(_)));
    }
}
