//! User data models and API request/response types.
//!
//! This module defines:
//! - `User`: Database entity for an account
//! - `Role`: Authorization level of an account
//! - Request bodies for registration, login, OTP verification and profile edits
//! - `UserResponse`: What clients get back (never the password hash)

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Authorization level of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Landlord,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Landlord => "LANDLORD",
            Role::Admin => "ADMIN",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "LANDLORD" => Ok(Role::Landlord),
            "ADMIN" => Ok(Role::Admin),
            other => Err(AppError::InvalidRequest(format!("Unknown role: {other}"))),
        }
    }
}

/// Represents a user record from the database.
///
/// # Database Table
///
/// Maps to the `users` table. `role` is stored as text and parsed with
/// [`User::role`]. `password_hash` is an Argon2id PHC string.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub mfa_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Parsed role. Unknown values (only possible via manual edits) fall back to `USER`.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::User)
    }
}

/// Response body for user endpoints.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub mfa_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Strips the password hash.
impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            name: user.name,
            date_of_birth: user.date_of_birth,
            phone: user.phone,
            profile_picture: user.profile_picture,
            role: user.role,
            is_active: user.is_active,
            mfa_enabled: user.mfa_enabled,
            created_at: user.created_at,
        }
    }
}

/// Request body for `POST /api/auth/register`.
///
/// ```json
/// {
///   "email": "aina@example.com",
///   "password": "correct horse",
///   "first_name": "Aina",
///   "last_name": "Rahman",
///   "phone": "+60123456789"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
}

/// Request body for `POST /api/users` (admin).
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

/// Request body for `POST /api/auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for `POST /api/auth/verify-otp`.
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

/// Request body for endpoints that only need an email address.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

/// Request body for `POST /api/auth/mfa`.
#[derive(Debug, Deserialize)]
pub struct MfaRequest {
    pub enabled: bool,
}

/// Request body for `PATCH /api/users/profile`. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
}

/// Request body for `PATCH /api/users/{id}` (admin).
#[derive(Debug, Default, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Query parameters for `GET /api/users`.
#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub role: Option<Role>,
    pub search: Option<String>,
}

/// A session handed to the client after a completed login.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

/// Result of `POST /api/auth/login`: either a session, or a request for the
/// one-time code that was just emailed.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    Session(SessionResponse),
    OtpRequired {
        require_otp: bool,
        email: String,
        expires_in_seconds: i64,
    },
}

/// Response body for `POST /api/auth/check-email`.
#[derive(Debug, Serialize)]
pub struct CheckEmailResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Trim, lower-case and sanity check an email address.
pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
                && email.len() <= 254
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(AppError::InvalidRequest(
            "Valid email is required".to_string(),
        ))
    }
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Trimmed, non-empty name part.
pub fn required_name(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Profile pictures must be absolute http(s) URLs.
pub fn validate_http_url(value: &str, field: &str) -> Result<(), AppError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(AppError::InvalidRequest(format!(
            "{field} must be an http(s) URL"
        ))),
    }
}

/// Six ASCII digits.
pub fn validate_otp_format(otp: &str) -> Result<(), AppError> {
    if otp.len() == 6 && otp.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(
            "OTP must be 6 digits".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        assert_eq!(
            normalize_email("  Aina.Rahman@Example.COM ").unwrap(),
            "aina.rahman@example.com"
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "no-at-sign", "@example.com", "a@b", "a@.com", "a b@example.com"] {
            assert!(normalize_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
    }

    #[test]
    fn otp_must_be_six_digits() {
        assert!(validate_otp_format("123456").is_ok());
        assert!(validate_otp_format("12345").is_err());
        assert!(validate_otp_format("12345a").is_err());
        assert!(validate_otp_format("１２３４５６").is_err());
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in [Role::User, Role::Landlord, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("ROOT".parse::<Role>().is_err());
    }

    #[test]
    fn otp_prompt_serializes_flat() {
        let body = serde_json::to_value(LoginResponse::OtpRequired {
            require_otp: true,
            email: "a@example.com".to_string(),
            expires_in_seconds: 300,
        })
        .unwrap();
        assert_eq!(body["require_otp"], true);
        assert_eq!(body["email"], "a@example.com");
        assert!(body.get("token").is_none());
    }

    #[test]
    fn profile_picture_requires_http_scheme() {
        assert!(validate_http_url("https://cdn.example.com/a.png", "profile_picture").is_ok());
        assert!(validate_http_url("ftp://example.com/a.png", "profile_picture").is_err());
        assert!(validate_http_url("not a url", "profile_picture").is_err());
    }
}
