//! Session token issuing and revocation.
//!
//! Tokens are 32 random bytes, hex encoded. The client sees the token once;
//! the database keeps only its SHA-256 hash.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{db::DbPool, error::AppError};

/// A freshly issued session: the plaintext token and when it stops working.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// 64 hex characters (32 random bytes).
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// SHA-256 of the token, hex encoded. This is what gets stored and looked up.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a session for a user and return the plaintext token.
pub async fn create_session(
    pool: &DbPool,
    user_id: Uuid,
    ttl: chrono::Duration,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<IssuedSession, AppError> {
    let token = generate_token();
    let expires_at = Utc::now() + ttl;

    let session_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO sessions (user_id, token_hash, ip_address, user_agent, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(ip_address)
    .bind(user_agent)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(IssuedSession {
        session_id,
        token,
        expires_at,
    })
}

/// Revoke one session (logout).
pub async fn revoke_session(pool: &DbPool, session_id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL")
        .bind(session_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Revoke every live session of a user (deactivation).
pub async fn revoke_all_sessions(pool: &DbPool, user_id: Uuid) -> Result<u64, AppError> {
    let result =
        sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL")
            .bind(user_id)
            .execute(pool)
            .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_64_hex_chars_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_sha256() {
        // SHA-256("abc")
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
