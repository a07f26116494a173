//! One-time code service for the second login step.
//!
//! This service handles:
//! - Generating 6-digit codes
//! - Storing them as keyed hashes with an expiry and attempt budget
//! - Evaluating submissions (expiry, attempt limit, constant-time match)
//!
//! # Concurrency
//!
//! Verification locks the user's challenge row (`FOR UPDATE`) so parallel
//! guesses cannot exceed the attempt budget.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use uuid::Uuid;

use crate::{db::DbPool, error::AppError, models::session::OtpChallenge};

type HmacSha256 = Hmac<Sha256>;

/// Result of checking a submitted code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpOutcome {
    Valid,
    NotFound,
    Expired,
    MaxAttemptsExceeded,
    Invalid { attempts: i32, remaining: i32 },
}

impl OtpOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            OtpOutcome::Valid => "SUCCESS",
            OtpOutcome::NotFound => "OTP_NOT_FOUND",
            OtpOutcome::Expired => "OTP_EXPIRED",
            OtpOutcome::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
            OtpOutcome::Invalid { .. } => "INVALID_OTP",
        }
    }

    /// Message shown to the user for a rejected code.
    pub fn message(&self) -> String {
        match self {
            OtpOutcome::Valid => "Verification successful".to_string(),
            OtpOutcome::NotFound => {
                "No verification code found. Please request a new code.".to_string()
            }
            OtpOutcome::Expired => "Verification code has expired. Please login again.".to_string(),
            OtpOutcome::MaxAttemptsExceeded => {
                "Too many failed attempts. Please request a new code.".to_string()
            }
            OtpOutcome::Invalid { remaining, .. } => {
                format!("Invalid verification code. {remaining} attempts remaining.")
            }
        }
    }

    /// Whether the stored challenge must be removed after this outcome.
    fn consumes_challenge(&self) -> bool {
        matches!(
            self,
            OtpOutcome::Valid | OtpOutcome::Expired | OtpOutcome::MaxAttemptsExceeded
        )
    }
}

/// Uniformly random code in `000000..=999999`.
pub fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{n:06}")
}

/// HMAC-SHA256 of the code keyed with the server secret, hex encoded.
pub fn hash_code(secret: &str, code: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(code.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a submitted code against the stored hash.
fn code_matches(secret: &str, submitted: &str, stored_hash: &str) -> bool {
    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(submitted.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Decide the outcome of a submission without touching storage.
///
/// Order: missing, expired, attempt budget exhausted, then the code itself.
pub fn evaluate(
    challenge: Option<&OtpChallenge>,
    secret: &str,
    submitted: &str,
    now: DateTime<Utc>,
) -> OtpOutcome {
    let Some(challenge) = challenge else {
        return OtpOutcome::NotFound;
    };

    if now > challenge.expires_at {
        return OtpOutcome::Expired;
    }

    if challenge.attempts >= challenge.max_attempts {
        return OtpOutcome::MaxAttemptsExceeded;
    }

    if code_matches(secret, submitted, &challenge.code_hash) {
        OtpOutcome::Valid
    } else {
        let attempts = challenge.attempts + 1;
        OtpOutcome::Invalid {
            attempts,
            remaining: (challenge.max_attempts - attempts).max(0),
        }
    }
}

/// Issue a new challenge for a user, replacing any outstanding one.
///
/// Returns the plaintext code so the caller can deliver it.
pub async fn issue_challenge(
    pool: &DbPool,
    secret: &str,
    user_id: Uuid,
    ttl: chrono::Duration,
    max_attempts: i32,
) -> Result<String, AppError> {
    let code = generate_code();
    let expires_at = Utc::now() + ttl;

    sqlx::query(
        r#"
        INSERT INTO otp_challenges (user_id, code_hash, attempts, max_attempts, expires_at)
        VALUES ($1, $2, 0, $3, $4)
        ON CONFLICT (user_id) DO UPDATE
        SET code_hash = EXCLUDED.code_hash,
            attempts = 0,
            max_attempts = EXCLUDED.max_attempts,
            created_at = NOW(),
            expires_at = EXCLUDED.expires_at
        "#,
    )
    .bind(user_id)
    .bind(hash_code(secret, &code))
    .bind(max_attempts)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(code)
}

/// Whether the user currently has a challenge on file (expired or not).
pub async fn has_challenge(pool: &DbPool, user_id: Uuid) -> Result<bool, AppError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM otp_challenges WHERE user_id = $1)")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

    Ok(exists)
}

/// Check a submitted code and apply the outcome to storage atomically.
pub async fn verify(
    pool: &DbPool,
    secret: &str,
    user_id: Uuid,
    submitted: &str,
) -> Result<OtpOutcome, AppError> {
    let mut tx = pool.begin().await?;

    let challenge = sqlx::query_as::<_, OtpChallenge>(
        "SELECT * FROM otp_challenges WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = evaluate(challenge.as_ref(), secret, submitted, Utc::now());

    if outcome.consumes_challenge() {
        sqlx::query("DELETE FROM otp_challenges WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    } else if let OtpOutcome::Invalid { attempts, .. } = outcome {
        sqlx::query("UPDATE otp_challenges SET attempts = $1 WHERE user_id = $2")
            .bind(attempts)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "otp-test-secret";

    fn challenge(code: &str, attempts: i32, expires_in: chrono::Duration) -> OtpChallenge {
        let now = Utc::now();
        OtpChallenge {
            user_id: Uuid::new_v4(),
            code_hash: hash_code(SECRET, code),
            attempts,
            max_attempts: 3,
            created_at: now,
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn correct_code_is_valid() {
        let c = challenge("123456", 0, chrono::Duration::minutes(5));
        assert_eq!(evaluate(Some(&c), SECRET, "123456", Utc::now()), OtpOutcome::Valid);
    }

    #[test]
    fn wrong_code_counts_an_attempt() {
        let c = challenge("123456", 1, chrono::Duration::minutes(5));
        assert_eq!(
            evaluate(Some(&c), SECRET, "654321", Utc::now()),
            OtpOutcome::Invalid {
                attempts: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn exhausted_budget_blocks_even_the_right_code() {
        let c = challenge("123456", 3, chrono::Duration::minutes(5));
        assert_eq!(
            evaluate(Some(&c), SECRET, "123456", Utc::now()),
            OtpOutcome::MaxAttemptsExceeded
        );
    }

    #[test]
    fn expiry_wins_over_everything_else() {
        let c = challenge("123456", 3, chrono::Duration::minutes(-1));
        assert_eq!(
            evaluate(Some(&c), SECRET, "123456", Utc::now()),
            OtpOutcome::Expired
        );
    }

    #[test]
    fn missing_challenge_is_not_found() {
        assert_eq!(
            evaluate(None, SECRET, "123456", Utc::now()),
            OtpOutcome::NotFound
        );
    }

    #[test]
    fn hash_depends_on_secret() {
        let c = challenge("123456", 0, chrono::Duration::minutes(5));
        assert_eq!(
            evaluate(Some(&c), "other-secret", "123456", Utc::now()),
            OtpOutcome::Invalid {
                attempts: 1,
                remaining: 2
            }
        );
    }

    #[test]
    fn remaining_attempts_appear_in_message() {
        let outcome = OtpOutcome::Invalid {
            attempts: 1,
            remaining: 2,
        };
        assert_eq!(outcome.reason(), "INVALID_OTP");
        assert!(outcome.message().contains("2 attempts remaining"));
    }
}
