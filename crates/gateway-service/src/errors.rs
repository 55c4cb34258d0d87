//! Gateway error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse`
//! impl. Error messages returned to clients are intentionally generic to
//! avoid leaking internal details. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Gateway error type.
///
/// Maps to appropriate HTTP status codes:
/// - Unauthenticated, InvalidToken, Revoked: 401 Unauthorized
/// - AccountDisabled, Forbidden: 403 Forbidden
/// - BadRequest: 400 Bad Request
/// - Database, Internal: 500 Internal Server Error
/// - ServiceUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has been revoked")]
    Revoked,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated
            | GatewayError::InvalidToken(_)
            | GatewayError::Revoked => 401,
            GatewayError::AccountDisabled | GatewayError::Forbidden(_) => 403,
            GatewayError::BadRequest(_) => 400,
            GatewayError::Database(_) | GatewayError::Internal => 500,
            GatewayError::ServiceUnavailable(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            GatewayError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            GatewayError::Revoked => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_REVOKED",
                "Token has been revoked".to_string(),
            ),
            GatewayError::AccountDisabled => (
                StatusCode::FORBIDDEN,
                "ACCOUNT_DISABLED",
                "Your account has been disabled. Please contact your administrator.".to_string(),
            ),
            GatewayError::Forbidden(reason) => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone())
            }
            GatewayError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            GatewayError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "gw.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            GatewayError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "gw.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            GatewayError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"millgate-api\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to GatewayError
impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::Unauthenticated.status_code(), 401);
        assert_eq!(
            GatewayError::InvalidToken("bad".to_string()).status_code(),
            401
        );
        assert_eq!(GatewayError::Revoked.status_code(), 401);
        assert_eq!(GatewayError::AccountDisabled.status_code(), 403);
        assert_eq!(
            GatewayError::Forbidden("nope".to_string()).status_code(),
            403
        );
        assert_eq!(
            GatewayError::BadRequest("missing".to_string()).status_code(),
            400
        );
        assert_eq!(
            GatewayError::Database("down".to_string()).status_code(),
            500
        );
        assert_eq!(
            GatewayError::ServiceUnavailable("idp".to_string()).status_code(),
            503
        );
        assert_eq!(GatewayError::Internal.status_code(), 500);
    }

    #[test]
    fn test_unauthorized_has_www_authenticate_header() {
        let response = GatewayError::Revoked.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }

    #[test]
    fn test_forbidden_has_no_www_authenticate_header() {
        let response = GatewayError::AccountDisabled.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!response.headers().contains_key("WWW-Authenticate"));
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: GatewayError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, GatewayError::Database(_)));
    }
}
