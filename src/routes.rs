//! HTTP router.
//!
//! Routes are grouped by the middleware they need. Layers added later run
//! first, so each group lists authentication before rate limiting: the
//! limiter is the outer layer and throttles callers before any session
//! lookup happens.

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::AppError,
    handlers::{
        agreements, auth, bookings, files, health, properties, reference, security, settings,
        signatures, uploads, users,
    },
    middleware::{
        auth::{auth_middleware, optional_auth_middleware, require_admin},
        rate_limit::rate_limit_middleware,
    },
    services::{rate_limiter::RateLimitTier, upload_service::MAX_FILES},
    state::AppState,
};

/// Multipart framing allowance on top of the file payloads.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

fn limited(router: Router<AppState>, state: &AppState, tier: RateLimitTier) -> Router<AppState> {
    router.route_layer(from_fn_with_state(
        (state.limiter.clone(), tier),
        rate_limit_middleware,
    ))
}

fn authenticated(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router.route_layer(from_fn_with_state(state.pool.clone(), auth_middleware))
}

fn admin_only(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    authenticated(router.route_layer(from_fn(require_admin)), state)
}

fn optionally_authenticated(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router.route_layer(from_fn_with_state(
        state.pool.clone(),
        optional_auth_middleware,
    ))
}

fn auth_routes(state: &AppState) -> Router<AppState> {
    let register = limited(
        Router::new().route("/api/auth/register", post(auth::register)),
        state,
        RateLimitTier::Register,
    );

    let login = limited(
        Router::new().route("/api/auth/login", post(auth::login)),
        state,
        RateLimitTier::Login,
    );

    let otp = limited(
        Router::new()
            .route("/api/auth/verify-otp", post(auth::verify_otp))
            .route("/api/auth/resend-otp", post(auth::resend_otp)),
        state,
        RateLimitTier::Otp,
    );

    let session = authenticated(
        Router::new()
            .route("/api/auth/me", get(auth::me))
            .route("/api/auth/logout", post(auth::logout))
            .route("/api/auth/mfa", post(auth::set_mfa))
            .route("/api/auth/activity", get(auth::my_activity)),
        state,
    );

    Router::new()
        .route("/api/auth/check-email", post(auth::check_email))
        .merge(register)
        .merge(login)
        .merge(otp)
        .merge(session)
}

fn user_routes(state: &AppState) -> Router<AppState> {
    let own = authenticated(
        Router::new()
            .route(
                "/api/users/profile",
                get(users::get_profile).patch(users::update_profile),
            )
            .route("/api/users/{id}", get(users::get_user)),
        state,
    );

    let managed = limited(
        admin_only(
            Router::new()
                .route("/api/users", get(users::list_users).post(users::create_user))
                .route(
                    "/api/users/{id}",
                    axum::routing::patch(users::update_user).delete(users::delete_user),
                ),
            state,
        ),
        state,
        RateLimitTier::Admin,
    );

    own.merge(managed)
}

fn property_routes(state: &AppState) -> Router<AppState> {
    let search = limited(
        Router::new()
            .route("/api/properties", get(properties::search))
            .route("/api/properties/featured", get(properties::featured))
            .route("/api/properties/geojson", get(properties::geojson)),
        state,
        RateLimitTier::Search,
    );

    let public = optionally_authenticated(
        Router::new()
            .route(
                "/api/properties/property/{code}",
                get(properties::get_by_code),
            )
            .route("/api/properties/{id}", get(properties::get_property))
            .route("/api/properties/{id}/view", post(properties::record_view)),
        state,
    );

    let owner = authenticated(
        Router::new()
            .route("/api/properties", post(properties::create_property))
            .route(
                "/api/properties/{id}",
                put(properties::update_property).delete(properties::delete_property),
            )
            .route("/api/properties/my-properties", get(properties::my_properties))
            .route("/api/properties/favorites", get(properties::favorites))
            .route(
                "/api/properties/{id}/favorite",
                post(properties::toggle_favorite),
            )
            .route(
                "/api/properties/{id}/favorite-status",
                get(properties::favorite_status),
            )
            .route(
                "/api/properties/{id}/approval-history",
                get(properties::approval_history),
            ),
        state,
    );

    let review = limited(
        admin_only(
            Router::new()
                .route(
                    "/api/properties/pending-approval",
                    get(properties::pending_approval),
                )
                .route(
                    "/api/properties/{id}/approve",
                    post(properties::approve_property),
                )
                .route(
                    "/api/properties/{id}/reject",
                    post(properties::reject_property),
                )
                .route(
                    "/api/properties/auto-approve/status",
                    get(properties::auto_approve_status),
                )
                .route(
                    "/api/properties/auto-approve/toggle",
                    post(properties::toggle_auto_approve),
                ),
            state,
        ),
        state,
        RateLimitTier::Admin,
    );

    Router::new()
        .route("/api/property-types", get(reference::property_types))
        .route("/api/amenities", get(reference::amenities))
        .merge(search)
        .merge(public)
        .merge(owner)
        .merge(review)
}

fn booking_routes(state: &AppState) -> Router<AppState> {
    let private = authenticated(
        Router::new()
            .route("/api/bookings", post(bookings::create_booking))
            .route("/api/bookings/my-bookings", get(bookings::my_bookings))
            .route("/api/bookings/owner-bookings", get(bookings::owner_bookings))
            .route("/api/bookings/{id}", get(bookings::get_booking))
            .route("/api/bookings/{id}/approve", post(bookings::approve_booking))
            .route("/api/bookings/{id}/reject", post(bookings::reject_booking))
            .route("/api/bookings/{id}/cancel", post(bookings::cancel_booking))
            .route(
                "/api/bookings/{id}/rental-agreement",
                get(agreements::get_agreement).post(agreements::generate_agreement),
            )
            .route(
                "/api/bookings/{id}/rental-agreement/verify",
                get(agreements::verify_agreement),
            ),
        state,
    );

    Router::new()
        .route(
            "/api/bookings/property/{id}/booked-periods",
            get(bookings::booked_periods),
        )
        .route("/api/files/pdfs/{file}", get(files::serve_pdf))
        .merge(private)
}

fn signature_routes(state: &AppState) -> Router<AppState> {
    let generate = limited(
        authenticated(
            Router::new().route(
                "/api/signatures/generate",
                post(signatures::generate_signature),
            ),
            state,
        ),
        state,
        RateLimitTier::Login,
    );

    let validate = limited(
        authenticated(
            Router::new().route(
                "/api/signatures/validate",
                post(signatures::validate_signature),
            ),
            state,
        ),
        state,
        RateLimitTier::Otp,
    );

    let history = authenticated(
        Router::new().route(
            "/api/signatures/history/{document_id}",
            get(signatures::signature_history),
        ),
        state,
    );

    generate.merge(validate).merge(history)
}

fn upload_routes(state: &AppState) -> Router<AppState> {
    let body_limit = state.config.max_upload_bytes * MAX_FILES + MULTIPART_OVERHEAD;

    let router = Router::new()
        .route("/api/upload/single", post(uploads::upload_single))
        .route("/api/upload/multiple", post(uploads::upload_multiple))
        .route(
            "/api/upload/property-images",
            post(uploads::upload_property_images),
        )
        .route(
            "/api/upload/delete/{public_id}",
            delete(uploads::delete_file),
        )
        .route(
            "/api/upload/delete-multiple",
            delete(uploads::delete_multiple),
        )
        .route_layer(DefaultBodyLimit::max(body_limit));

    limited(authenticated(router, state), state, RateLimitTier::Upload)
}

fn settings_routes(state: &AppState) -> Router<AppState> {
    let own = authenticated(
        Router::new().route(
            "/api/user-settings/me",
            get(settings::my_settings).put(settings::update_my_settings),
        ),
        state,
    );

    let managed = limited(
        admin_only(
            Router::new().route(
                "/api/user-settings/{user_id}",
                get(settings::get_user_settings).delete(settings::delete_user_settings),
            ),
            state,
        ),
        state,
        RateLimitTier::Admin,
    );

    own.merge(managed)
}

fn security_routes(state: &AppState) -> Router<AppState> {
    limited(
        admin_only(
            Router::new()
                .route(
                    "/api/security-monitoring/dashboard",
                    get(security::dashboard),
                )
                .route(
                    "/api/security-monitoring/anomalies",
                    get(security::anomalies),
                )
                .route(
                    "/api/security-monitoring/anomalies/{id}/resolve",
                    post(security::resolve_anomaly),
                )
                .route(
                    "/api/security-monitoring/activity",
                    get(security::activity),
                ),
            state,
        ),
        state,
        RateLimitTier::Admin,
    )
}

async fn route_not_found() -> AppError {
    AppError::NotFound("Route")
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api", get(health::api_index))
        .merge(auth_routes(&state))
        .merge(user_routes(&state))
        .merge(property_routes(&state))
        .merge(booking_routes(&state))
        .merge(signature_routes(&state))
        .merge(upload_routes(&state))
        .merge(settings_routes(&state))
        .merge(security_routes(&state));
    let api = limited(api, &state, RateLimitTier::General);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::RETRY_AFTER])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(health::service_info))
        .route("/health", get(health::health_check))
        .merge(api)
        .fallback(route_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn send(request: Request<Body>) -> Response {
        build_router(AppState::for_tests())
            .oneshot(request)
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_routes_use_error_format() {
        let response = send(
            Request::builder()
                .uri("/api/nothing-here")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "Route not found");
    }

    #[tokio::test]
    async fn service_info_is_public() {
        let response = send(Request::builder().uri("/").body(Body::empty()).unwrap()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], "Rentverse API");
        assert_eq!(body["health"], "/health");
        assert_eq!(body["docs"], "/api");

        let response = send(Request::builder().uri("/api").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["endpoints"]["bookings"], "/api/bookings");
    }

    #[tokio::test]
    async fn protected_routes_require_a_session() {
        for (method, uri) in [
            ("GET", "/api/auth/me"),
            ("GET", "/api/users/profile"),
            ("GET", "/api/bookings/my-bookings"),
            ("GET", "/api/security-monitoring/dashboard"),
            ("POST", "/api/upload/single"),
            ("GET", "/api/user-settings/me"),
        ] {
            let response = send(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn api_responses_carry_general_rate_headers() {
        let response = send(
            Request::builder()
                .uri("/api/auth/me")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["ratelimit-limit"], "100");
        assert_eq!(response.headers()["ratelimit-remaining"], "99");
    }

    #[tokio::test]
    async fn pdf_names_are_checked_before_disk_access() {
        let response = send(
            Request::builder()
                .uri("/api/files/pdfs/..%2Fsecret.pdf")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            Request::builder()
                .uri("/api/files/pdfs/missing-agreement.pdf")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
