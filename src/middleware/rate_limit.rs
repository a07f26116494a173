//! Per-client rate limiting middleware.
//!
//! Attach one layer per tier with
//! `from_fn_with_state((limiter, tier), rate_limit_middleware)`.

use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::{
    error::AppError,
    middleware::client_info::client_ip,
    services::rate_limiter::{retry_after_secs, RateDecision, RateLimitTier, RateLimiter},
};

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");

/// Key used when the caller's address cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

pub async fn rate_limit_middleware(
    State((limiter, tier)): State<(Arc<RateLimiter>, RateLimitTier)>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_ip(request.headers(), request.extensions())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    match limiter.check(tier, &key, Instant::now()) {
        RateDecision::Limited { retry_after, .. } => {
            let retry_after_secs = retry_after_secs(retry_after);
            tracing::warn!(
                action = "RATE_LIMIT_EXCEEDED",
                tier = tier.name(),
                client = %key,
                path = %request.uri().path(),
                "Rate limit exceeded, retry in {}s",
                retry_after_secs
            );
            Err(AppError::RateLimited { retry_after_secs })
        }
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;

            let remaining = if tier.refunds_success() && response.status().is_success() {
                limiter.refund(tier, &key);
                remaining + 1
            } else {
                remaining
            };

            let headers = response.headers_mut();
            headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
            Ok(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    fn limited_app(tier: RateLimitTier) -> Router {
        let limiter = Arc::new(RateLimiter::new());
        Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route(
                "/fail",
                post(|| async { (StatusCode::UNAUTHORIZED, "nope") }),
            )
            .layer(from_fn_with_state((limiter, tier), rate_limit_middleware))
    }

    fn request(method: &str, uri: &str, ip: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn sixth_failed_login_is_rejected() {
        let app = limited_app(RateLimitTier::Login);

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("POST", "/fail", "198.51.100.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = app
            .clone()
            .oneshot(request("POST", "/fail", "198.51.100.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        // Another client is unaffected
        let response = app
            .oneshot(request("POST", "/fail", "198.51.100.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn successful_logins_are_refunded() {
        let app = limited_app(RateLimitTier::Login);

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(request("GET", "/ok", "198.51.100.9"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["ratelimit-remaining"], "5");
        }
    }

    #[tokio::test]
    async fn headers_report_remaining_budget() {
        let app = limited_app(RateLimitTier::Register);

        let response = app
            .clone()
            .oneshot(request("GET", "/ok", "203.0.113.1"))
            .await
            .unwrap();
        assert_eq!(response.headers()["ratelimit-limit"], "3");
        assert_eq!(response.headers()["ratelimit-remaining"], "2");
    }
}
