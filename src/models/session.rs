//! Login session and one-time code models.
//!
//! Session tokens are handed to the client once and stored only as SHA-256
//! hashes. One-time codes are stored as keyed hashes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents a login session record from the database.
///
/// # Database Table
///
/// Maps to the `sessions` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `user_id`: Owner of the session
/// - `token_hash`: SHA-256 hash of the bearer token
/// - `expires_at`: After this instant the token is rejected
/// - `revoked_at`: Set on logout or account deactivation
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,

    /// SHA-256 hash of the bearer token (64 hex characters)
    ///
    /// When a request comes in with "Bearer abc123", we:
    /// 1. Hash "abc123" with SHA-256
    /// 2. Look up this hash in the database
    /// 3. If found, unexpired and unrevoked, authenticate the request
    pub token_hash: String,

    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Outstanding one-time code for a user (at most one per user).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OtpChallenge {
    pub user_id: Uuid,
    pub code_hash: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
