//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use services::ServiceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Caller identity is missing or malformed.
    Unauthorized(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Service-layer error.
    Service(ServiceError),
}

impl ApiError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(err) => service_error_to_response(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn service_error_to_response(err: ServiceError) -> (StatusCode, String) {
    match &err {
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        ServiceError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
        ServiceError::OutOfStock(_) | ServiceError::BadRequest(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        ServiceError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, err.to_string()),
        ServiceError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
        ServiceError::Gateway(msg) => {
            tracing::warn!(error = %msg, "upstream provider error");
            (StatusCode::BAD_GATEWAY, err.to_string())
        }
        ServiceError::Store(source) => {
            tracing::error!(error = %source, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (ServiceError::OutOfStock("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ServiceError::Gateway("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            let (status, message) = ApiError::from(err).status_and_message();
            assert_eq!(status, expected);
            assert_eq!(message, "x");
        }
    }
}
