//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Bad credentials, missing or expired sessions
/// - **Authorization Errors**: Caller lacks the role or ownership required
/// - **Resource Errors**: Requested resources not found
/// - **Business Logic Errors**: Conflicts and illegal state transitions
/// - **Upstream Errors**: Email, AI or Cloudinary calls that failed
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Email/password pair did not match an active account.
    ///
    /// Unknown email and wrong password share this variant so the response
    /// does not reveal which accounts exist.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Bearer token is missing, malformed, expired or revoked.
    #[error("Authentication required")]
    Unauthorized,

    /// Authenticated user is not allowed to perform this action.
    #[error("{0}")]
    Forbidden(String),

    /// Named resource does not exist (or is hidden from the caller).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Request conflicts with current state (duplicates, overlaps, transitions).
    #[error("{0}")]
    Conflict(String),

    /// Request body or parameters are invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// One-time code was rejected; the message explains why.
    #[error("{0}")]
    OtpRejected(String),

    /// Too many requests for this client in the current window.
    #[error("Too many requests, please try again later")]
    RateLimited { retry_after_secs: u64 },

    /// An integration needed for this request has not been configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// A call to an external service failed.
    #[error("Upstream service error: {0}")]
    Upstream(String),

    /// Unexpected failure that is not the client's fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Database and internal errors are logged and replaced by a generic message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                self.to_string(),
            ),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            AppError::Forbidden(ref msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::OtpRejected(ref msg) => (StatusCode::BAD_REQUEST, "otp_rejected", msg.clone()),
            AppError::RateLimited { retry_after_secs } => {
                let body = Json(json!({
                    "error": {
                        "code": "rate_limited",
                        "message": self.to_string(),
                        "retry_after_secs": retry_after_secs
                    }
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                return response;
            }
            AppError::NotConfigured(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                self.to_string(),
            ),
            AppError::Upstream(ref msg) => {
                tracing::error!("Upstream failure: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "An upstream service failed".to_string(),
                )
            }
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_names_the_resource() {
        let response = AppError::NotFound("Property").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "Property not found");
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = AppError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");

        let body = body_json(response).await;
        assert_eq!(body["error"]["retry_after_secs"], 42);
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let response = AppError::Internal("disk on fire".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (AppError::Conflict("taken".into()), StatusCode::CONFLICT),
            (AppError::OtpRejected("expired".into()), StatusCode::BAD_REQUEST),
            (AppError::NotConfigured("Cloudinary"), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Upstream("timeout".into()), StatusCode::BAD_GATEWAY),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
