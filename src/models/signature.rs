//! Digital signature tokens and records.
//!
//! # Token Format
//!
//! ```text
//! base64url(payload_json) "." hex(hmac_sha256(secret, base64url(payload_json)))
//! ```
//!
//! The payload commits to one agreement's hash, one user and one nonce. The
//! nonce is also stored with the `PENDING` signature record, so each token
//! can be used once.

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const ISSUER: &str = "rentverse-dsa";
pub const TOKEN_VERSION: &str = "1.0";
pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerRole {
    Tenant,
    Landlord,
}

impl SignerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerRole::Tenant => "TENANT",
            SignerRole::Landlord => "LANDLORD",
        }
    }
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Rejected,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Pending => "PENDING",
            SignatureStatus::Signed => "SIGNED",
            SignatureStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for SignatureStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SignatureStatus::Pending),
            "SIGNED" => Ok(SignatureStatus::Signed),
            "REJECTED" => Ok(SignatureStatus::Rejected),
            other => Err(AppError::InvalidRequest(format!(
                "Unknown signature status: {other}"
            ))),
        }
    }
}

/// What the holder of a token may do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureAction {
    Sign,
    Reject,
}

impl SignatureAction {
    pub fn resulting_status(&self) -> SignatureStatus {
        match self {
            SignatureAction::Sign => SignatureStatus::Signed,
            SignatureAction::Reject => SignatureStatus::Rejected,
        }
    }
}

/// Claims carried by a signature token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignaturePayload {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub role: SignerRole,
    pub document_hash: String,
    /// Issued-at, Unix seconds
    pub iat: i64,
    /// Expiry, Unix seconds
    pub exp: i64,
    pub nonce: String,
    pub version: String,
    pub iss: String,
}

impl SignaturePayload {
    pub fn new(
        document_id: Uuid,
        user_id: Uuid,
        role: SignerRole,
        document_hash: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let nonce: [u8; 16] = rand::random();
        Self {
            document_id,
            user_id,
            role,
            document_hash: document_hash.to_ascii_lowercase(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
            nonce: hex::encode(nonce),
            version: TOKEN_VERSION.to_string(),
            iss: ISSUER.to_string(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Signature is malformed")]
    Malformed,
    #[error("Signature does not verify")]
    BadMac,
    #[error("Signature was not issued by this service")]
    WrongIssuer,
    #[error("Signature has expired")]
    Expired,
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::InvalidRequest(e.to_string())
    }
}

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid")
}

/// Serialize and MAC a payload.
pub fn sign(payload: &SignaturePayload, secret: &str) -> String {
    let json = serde_json::to_vec(payload).unwrap_or_default();
    let encoded = URL_SAFE_NO_PAD.encode(json);

    let mut mac = mac(secret);
    mac.update(encoded.as_bytes());
    let tag = hex::encode(mac.finalize().into_bytes());

    format!("{encoded}.{tag}")
}

/// Check MAC (constant time), issuer and expiry, and return the claims.
pub fn verify(token: &str, secret: &str, now: DateTime<Utc>) -> Result<SignaturePayload, TokenError> {
    let (encoded, tag_hex) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
    let tag = hex::decode(tag_hex).map_err(|_| TokenError::Malformed)?;

    let mut mac = mac(secret);
    mac.update(encoded.as_bytes());
    mac.verify_slice(&tag).map_err(|_| TokenError::BadMac)?;

    let json = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| TokenError::Malformed)?;
    let payload: SignaturePayload =
        serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

    if payload.iss != ISSUER {
        return Err(TokenError::WrongIssuer);
    }
    if payload.exp <= now.timestamp() {
        return Err(TokenError::Expired);
    }

    Ok(payload)
}

/// A 64-character hex SHA-256, in any case.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Represents a row of the `digital_signatures` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DigitalSignature {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub signature_hash: String,
    pub nonce: String,
    pub status: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl DigitalSignature {
    pub fn status(&self) -> SignatureStatus {
        self.status.parse().unwrap_or(SignatureStatus::Pending)
    }
}

/// Request body for `POST /api/signatures/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateSignatureRequest {
    pub document_id: Uuid,
    pub document_hash: String,
}

#[derive(Debug, Serialize)]
pub struct GeneratedSignature {
    pub signature: String,
    pub role: SignerRole,
    pub expires_at: DateTime<Utc>,
}

/// Request body for `POST /api/signatures/validate`.
#[derive(Debug, Deserialize)]
pub struct ValidateSignatureRequest {
    pub signature: String,
    pub document_id: Uuid,
    pub action: SignatureAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn payload(now: DateTime<Utc>) -> SignaturePayload {
        SignaturePayload::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            SignerRole::Tenant,
            &"AB".repeat(32),
            now,
        )
    }

    #[test]
    fn token_verifies_and_round_trips_claims() {
        let now = Utc::now();
        let claims = payload(now);
        let token = sign(&claims, SECRET);

        let verified = verify(&token, SECRET, now).unwrap();
        assert_eq!(verified, claims);
        assert_eq!(verified.document_hash, "ab".repeat(32));
        assert_eq!(verified.nonce.len(), 32);
        assert_eq!(verified.exp - verified.iat, 24 * 3600);
    }

    #[test]
    fn tampering_is_detected() {
        let now = Utc::now();
        let token = sign(&payload(now), SECRET);

        assert_eq!(verify(&token, "other-secret", now), Err(TokenError::BadMac));

        let (encoded, tag) = token.split_once('.').unwrap();
        let mut forged = payload(now);
        forged.role = SignerRole::Landlord;
        let forged_encoded = sign(&forged, "attacker").split_once('.').unwrap().0.to_string();
        assert_eq!(
            verify(&format!("{forged_encoded}.{tag}"), SECRET, now),
            Err(TokenError::BadMac)
        );

        assert_eq!(verify(encoded, SECRET, now), Err(TokenError::Malformed));
        assert_eq!(verify(&format!("{encoded}.zz"), SECRET, now), Err(TokenError::Malformed));
    }

    #[test]
    fn expired_tokens_are_refused() {
        let issued = Utc::now() - Duration::hours(25);
        let token = sign(&payload(issued), SECRET);
        assert_eq!(verify(&token, SECRET, Utc::now()), Err(TokenError::Expired));
    }

    #[test]
    fn foreign_issuer_is_refused() {
        let now = Utc::now();
        let mut claims = payload(now);
        claims.iss = "someone-else".to_string();
        let token = sign(&claims, SECRET);
        assert_eq!(verify(&token, SECRET, now), Err(TokenError::WrongIssuer));
    }

    #[test]
    fn nonces_differ() {
        let now = Utc::now();
        assert_ne!(payload(now).nonce, payload(now).nonce);
    }

    #[test]
    fn hash_shape() {
        assert!(is_sha256_hex(&"a".repeat(64)));
        assert!(is_sha256_hex(&"F".repeat(64)));
        assert!(!is_sha256_hex(&"a".repeat(63)));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }
}
