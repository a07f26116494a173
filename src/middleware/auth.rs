//! Bearer session authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the session token from the Authorization header
//! 2. Hash it and look up a live session of an active user
//! 3. Inject authentication context into the request
//! 4. Reject unauthenticated requests with HTTP 401

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
    Extension,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::user::Role,
    services::token_service::hash_token,
};

/// Authentication context attached to authenticated requests.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know who made the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,

    /// Session the request was made with; logout revokes exactly this one
    pub session_id: Uuid,

    pub email: String,
    pub role: Role,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[derive(sqlx::FromRow)]
struct SessionLookup {
    session_id: Uuid,
    user_id: Uuid,
    email: String,
    role: String,
}

/// The token from `Authorization: Bearer <token>`, if present and well formed.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn lookup_session(pool: &DbPool, token: &str) -> Result<Option<AuthContext>, AppError> {
    let row = sqlx::query_as::<_, SessionLookup>(
        r#"
        SELECT s.id AS session_id, u.id AS user_id, u.email, u.role
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = $1
          AND s.revoked_at IS NULL
          AND s.expires_at > NOW()
          AND u.is_active = TRUE
        "#,
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| AuthContext {
        session_id: row.session_id,
        user_id: row.user_id,
        email: row.email,
        role: row.role.parse().unwrap_or(Role::User),
    }))
}

/// Session authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Hash the `<token>` using SHA-256
/// 3. Find an unrevoked, unexpired session whose user is still active
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
///
/// # Returns
///
/// - `Ok(Response)` if authenticated successfully (calls next handler)
/// - `Err(AppError::Unauthorized)` if authentication fails (returns 401)
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;

    let auth_context = lookup_session(&pool, token)
        .await?
        .ok_or(AppError::Unauthorized)?;

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

/// Like [`auth_middleware`], but lets anonymous callers through.
///
/// A missing or stale token is not an error here; handlers see
/// `Option<Extension<AuthContext>>` as `None`.
pub async fn optional_auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = bearer_token(request.headers()) {
        if let Some(auth_context) = lookup_session(&pool, token).await? {
            request.extensions_mut().insert(auth_context);
        }
    }

    Ok(next.run(request).await)
}

/// Reject non-admin callers with 403. Must run after [`auth_middleware`].
pub async fn require_admin(
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !auth.is_admin() {
        tracing::warn!("User {} attempted an admin action", auth.user_id);
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::{
        body::Body,
        http::{HeaderValue, Request as HttpRequest, StatusCode},
        middleware::{from_fn, from_fn_with_state},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn protected_app() -> Router {
        let state = AppState::for_tests();
        Router::new()
            .route("/private", get(|| async { "secret" }))
            .route_layer(from_fn_with_state(state.pool.clone(), auth_middleware))
            .with_state(state)
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = protected_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/private")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_unauthorized() {
        let response = protected_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/private")
                    .header("Authorization", "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    async fn admin_gate(role: Role) -> StatusCode {
        let auth = AuthContext {
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            role,
        };

        let app = Router::new()
            .route("/admin", get(|| async { "ok" }))
            .route_layer(from_fn(require_admin))
            .layer(axum::Extension(auth));

        app.oneshot(
            HttpRequest::builder()
                .uri("/admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn admin_gate_checks_role() {
        assert_eq!(admin_gate(Role::User).await, StatusCode::FORBIDDEN);
        assert_eq!(admin_gate(Role::Landlord).await, StatusCode::FORBIDDEN);
        assert_eq!(admin_gate(Role::Admin).await, StatusCode::OK);
    }
}
