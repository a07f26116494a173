//! Registration and the two-step login flow.
//!
//! # Login
//!
//! 1. Email and password are checked; failures are logged and analysed
//! 2. If the account has MFA on, or the AI service flags the login, a
//!    one-time code is emailed and the client must call `verify_otp`
//! 3. Otherwise a session is issued straight away
//!
//! Unknown accounts and wrong passwords produce the same error.

use serde_json::json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::client_info::ClientInfo,
    models::{
        activity::ActivityAction,
        user::{
            normalize_email, required_name, validate_otp_format, validate_password,
            LoginRequest, LoginResponse, RegisterRequest, Role, SessionResponse, User,
            VerifyOtpRequest,
        },
    },
    services::{
        activity_logger,
        anomaly_service::{self, LoginEvent},
        otp_service::{self, OtpOutcome},
        password,
        token_service::{self, IssuedSession},
    },
    state::AppState,
};

/// Fields needed to create any account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<chrono::NaiveDate>,
    pub phone: Option<String>,
    pub role: Role,
}

impl NewUser {
    pub fn from_registration(request: RegisterRequest) -> Self {
        Self {
            email: request.email,
            password: request.password,
            first_name: request.first_name,
            last_name: request.last_name,
            date_of_birth: request.date_of_birth,
            phone: request.phone,
            role: Role::User,
        }
    }
}

pub async fn find_by_email(pool: &DbPool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

pub async fn find_by_id(pool: &DbPool, user_id: Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))
}

/// Validate and insert a new account.
///
/// # Errors
///
/// - `InvalidRequest` for a malformed email, short password or blank name
/// - `Conflict` when the email is already registered
pub async fn create_user(pool: &DbPool, new_user: NewUser) -> Result<User, AppError> {
    let email = normalize_email(&new_user.email)?;
    validate_password(&new_user.password)?;
    let first_name = required_name(&new_user.first_name, "first_name")?;
    let last_name = required_name(&new_user.last_name, "last_name")?;
    let name = format!("{first_name} {last_name}");
    let password_hash = password::hash_password(&new_user.password)?;
    let phone = new_user
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users
            (email, password_hash, first_name, last_name, name, date_of_birth, phone, role)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (email) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(&first_name)
    .bind(&last_name)
    .bind(&name)
    .bind(new_user.date_of_birth)
    .bind(phone)
    .bind(new_user.role.as_str())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::Conflict("Email is already registered".to_string()))?;

    tracing::info!("Created {} account {}", user.role, user.id);
    Ok(user)
}

fn session_response(user: User, session: IssuedSession) -> SessionResponse {
    SessionResponse {
        token: session.token,
        expires_at: session.expires_at,
        user: user.into(),
    }
}

async fn open_session(
    state: &AppState,
    user: &User,
    client: &ClientInfo,
) -> Result<IssuedSession, AppError> {
    token_service::create_session(
        &state.pool,
        user.id,
        state.config.session_ttl(),
        client.ip.as_deref(),
        client.user_agent.as_deref(),
    )
    .await
}

/// Run anomaly analysis off the request path.
fn spawn_analysis(state: &AppState, user: &User, event: LoginEvent, client: &ClientInfo) {
    let state = state.clone();
    let user = user.clone();
    let client = client.clone();
    tokio::spawn(async move {
        anomaly_service::analyze_login(&state, &user, event, &client).await;
    });
}

pub async fn register(
    state: &AppState,
    request: RegisterRequest,
    client: &ClientInfo,
) -> Result<SessionResponse, AppError> {
    let user = create_user(&state.pool, NewUser::from_registration(request)).await?;
    let session = open_session(state, &user, client).await?;

    activity_logger::log(
        &state.pool,
        ActivityAction::RegistrationSuccess,
        Some(user.id),
        json!({ "email": user.email }),
        client.ip.as_deref(),
    )
    .await;

    Ok(session_response(user, session))
}

async fn send_code(state: &AppState, user: &User, client: &ClientInfo) -> Result<(), AppError> {
    let code = otp_service::issue_challenge(
        &state.pool,
        &state.config.token_secret,
        user.id,
        state.config.otp_ttl(),
        state.config.otp_max_attempts,
    )
    .await?;

    let ttl_minutes = (state.config.otp_ttl_seconds + 59) / 60;
    if let Err(e) = state
        .mailer
        .send_otp(&user.email, &user.first_name, &code, ttl_minutes)
        .await
    {
        activity_logger::log(
            &state.pool,
            ActivityAction::EmailSendFailed,
            Some(user.id),
            json!({ "purpose": "otp" }),
            client.ip.as_deref(),
        )
        .await;
        return Err(e);
    }

    activity_logger::log(
        &state.pool,
        ActivityAction::OtpSent,
        Some(user.id),
        json!({ "expires_in_seconds": state.config.otp_ttl_seconds }),
        client.ip.as_deref(),
    )
    .await;

    Ok(())
}

pub async fn login(
    state: &AppState,
    request: LoginRequest,
    client: &ClientInfo,
) -> Result<LoginResponse, AppError> {
    let email = normalize_email(&request.email)?;

    let user = match find_by_email(&state.pool, &email).await? {
        Some(user) if user.is_active => user,
        other => {
            password::burn_verification(&request.password);
            activity_logger::log(
                &state.pool,
                ActivityAction::LoginFailed,
                other.as_ref().map(|u| u.id),
                json!({ "email": email, "reason": "unknown_or_inactive" }),
                client.ip.as_deref(),
            )
            .await;
            return Err(AppError::InvalidCredentials);
        }
    };

    if !password::verify_password(&request.password, &user.password_hash) {
        activity_logger::log(
            &state.pool,
            ActivityAction::LoginFailed,
            Some(user.id),
            json!({ "email": email, "reason": "wrong_password" }),
            client.ip.as_deref(),
        )
        .await;
        spawn_analysis(state, &user, LoginEvent::LoginFailed, client);
        return Err(AppError::InvalidCredentials);
    }

    let suspicious = state
        .ai
        .is_login_suspicious(user.id, client.ip.as_deref(), client.user_agent.as_deref())
        .await;

    if suspicious {
        activity_logger::log(
            &state.pool,
            ActivityAction::SuspiciousLogin,
            Some(user.id),
            json!({ "mfa_enabled": user.mfa_enabled }),
            client.ip.as_deref(),
        )
        .await;
    }

    if user.mfa_enabled || suspicious {
        send_code(state, &user, client).await?;
        return Ok(LoginResponse::OtpRequired {
            require_otp: true,
            email: user.email,
            expires_in_seconds: state.config.otp_ttl_seconds,
        });
    }

    let session = open_session(state, &user, client).await?;
    activity_logger::log(
        &state.pool,
        ActivityAction::LoginSuccess,
        Some(user.id),
        json!({ "method": "password" }),
        client.ip.as_deref(),
    )
    .await;
    spawn_analysis(state, &user, LoginEvent::LoginSucceeded, client);

    Ok(LoginResponse::Session(session_response(user, session)))
}

pub async fn verify_otp(
    state: &AppState,
    request: VerifyOtpRequest,
    client: &ClientInfo,
) -> Result<SessionResponse, AppError> {
    validate_otp_format(&request.otp)?;
    let email = normalize_email(&request.email)?;

    let Some(user) = find_by_email(&state.pool, &email)
        .await?
        .filter(|u| u.is_active)
    else {
        return Err(AppError::OtpRejected(OtpOutcome::NotFound.message()));
    };

    let outcome = otp_service::verify(
        &state.pool,
        &state.config.token_secret,
        user.id,
        &request.otp,
    )
    .await?;

    if outcome == OtpOutcome::Valid {
        let session = open_session(state, &user, client).await?;
        activity_logger::log(
            &state.pool,
            ActivityAction::LoginSuccess,
            Some(user.id),
            json!({ "method": "otp" }),
            client.ip.as_deref(),
        )
        .await;
        spawn_analysis(state, &user, LoginEvent::LoginSucceeded, client);
        return Ok(session_response(user, session));
    }

    let action = match outcome {
        OtpOutcome::Expired => ActivityAction::OtpFailedExpired,
        _ => ActivityAction::OtpFailedInvalid,
    };
    activity_logger::log(
        &state.pool,
        action,
        Some(user.id),
        json!({ "reason": outcome.reason() }),
        client.ip.as_deref(),
    )
    .await;
    spawn_analysis(state, &user, LoginEvent::OtpFailed, client);

    Err(AppError::OtpRejected(outcome.message()))
}

/// Replace an outstanding challenge with a new code.
pub async fn resend_otp(state: &AppState, email: &str, client: &ClientInfo) -> Result<(), AppError> {
    let email = normalize_email(email)?;

    let user = find_by_email(&state.pool, &email)
        .await?
        .filter(|u| u.is_active)
        .ok_or(AppError::NotFound("Verification request"))?;

    if !otp_service::has_challenge(&state.pool, user.id).await? {
        return Err(AppError::NotFound("Verification request"));
    }

    send_code(state, &user, client).await
}

pub async fn set_mfa(pool: &DbPool, user_id: Uuid, enabled: bool) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(
        "UPDATE users SET mfa_enabled = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(enabled)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("User"))
}
