//! Authentication HTTP handlers.
//!
//! This module implements the auth endpoints:
//! - POST /api/auth/register - Create an account and sign in
//! - POST /api/auth/login - Check the password, maybe ask for a one-time code
//! - POST /api/auth/verify-otp - Complete a login with the emailed code
//! - POST /api/auth/resend-otp - Replace an outstanding code
//! - POST /api/auth/check-email - Whether an account exists
//! - GET /api/auth/me, POST /api/auth/logout, POST /api/auth/mfa
//! - GET /api/auth/activity - The caller's own audit trail

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};

use crate::{
    db::DbPool,
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        activity::{ActivityAction, ActivityLog},
        pagination::{PageQuery, Paginated},
        user::{
            normalize_email, CheckEmailResponse, EmailRequest, LoginRequest, LoginResponse,
            MfaRequest, RegisterRequest, SessionResponse, UserResponse, VerifyOtpRequest,
        },
    },
    services::{activity_logger, auth_service, token_service},
    state::AppState,
};

/// Register a new account.
///
/// # Endpoint
///
/// `POST /api/auth/register`
///
/// # Response
///
/// - **Success (201 Created)**: session token and the new user
/// - **Error (400)**: invalid email, short password or blank name
/// - **Error (409)**: email already registered
pub async fn register(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let session = auth_service::register(&state, request, &client).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Start a login.
///
/// # Endpoint
///
/// `POST /api/auth/login`
///
/// # Response
///
/// Either a session, or when a code was emailed:
///
/// ```json
/// { "require_otp": true, "email": "aina@example.com", "expires_in_seconds": 300 }
/// ```
///
/// - **Error (401)**: unknown email, inactive account or wrong password
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    Ok(Json(auth_service::login(&state, request, &client).await?))
}

/// Complete a login with a one-time code.
///
/// # Endpoint
///
/// `POST /api/auth/verify-otp`
///
/// # Response
///
/// - **Success (200 OK)**: session token and user
/// - **Error (400)**: malformed, missing, expired, exhausted or wrong code;
///   the message says which and how many attempts remain
pub async fn verify_otp(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    Ok(Json(auth_service::verify_otp(&state, request, &client).await?))
}

/// `POST /api/auth/resend-otp`
pub async fn resend_otp(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<EmailRequest>,
) -> Result<Json<Value>, AppError> {
    auth_service::resend_otp(&state, &request.email, &client).await?;
    Ok(Json(json!({
        "message": "A new verification code has been sent",
        "expires_in_seconds": state.config.otp_ttl_seconds
    })))
}

/// `POST /api/auth/check-email`
pub async fn check_email(
    State(pool): State<DbPool>,
    Json(request): Json<EmailRequest>,
) -> Result<Json<CheckEmailResponse>, AppError> {
    let email = normalize_email(&request.email)?;

    let response = match auth_service::find_by_email(&pool, &email).await? {
        Some(user) => CheckEmailResponse {
            exists: true,
            is_active: Some(user.is_active),
            role: Some(user.role),
        },
        None => CheckEmailResponse {
            exists: false,
            is_active: None,
            role: None,
        },
    };

    Ok(Json(response))
}

/// `GET /api/auth/me`
pub async fn me(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth_service::find_by_id(&pool, auth.user_id).await?;
    Ok(Json(user.into()))
}

/// Revoke the session used for this request.
///
/// # Endpoint
///
/// `POST /api/auth/logout`
pub async fn logout(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
) -> Result<Json<Value>, AppError> {
    token_service::revoke_session(&pool, auth.session_id).await?;

    activity_logger::log(
        &pool,
        ActivityAction::Logout,
        Some(auth.user_id),
        json!({}),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(json!({ "message": "Logged out" })))
}

/// `POST /api/auth/mfa`
pub async fn set_mfa(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<MfaRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth_service::set_mfa(&pool, auth.user_id, request.enabled).await?;

    activity_logger::log(
        &pool,
        ActivityAction::MfaUpdated,
        Some(auth.user_id),
        json!({ "enabled": request.enabled }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(user.into()))
}

/// `GET /api/auth/activity?page=&limit=`
pub async fn my_activity(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paginated<ActivityLog>>, AppError> {
    Ok(Json(
        activity_logger::list_for_user(&pool, auth.user_id, page).await?,
    ))
}
