//! Issuing and redeeming signature tokens for rental agreements.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        agreement::RentalAgreement,
        signature::{
            is_sha256_hex, sign, verify, DigitalSignature, GenerateSignatureRequest,
            GeneratedSignature, SignatureAction, SignaturePayload, SignatureStatus, SignerRole,
            ValidateSignatureRequest,
        },
    },
    services::token_service::hash_token,
};

#[derive(Debug, sqlx::FromRow)]
struct AgreementParties {
    #[sqlx(flatten)]
    agreement: RentalAgreement,
    tenant_id: Uuid,
    landlord_id: Uuid,
}

impl AgreementParties {
    fn role_of(&self, user_id: Uuid) -> Option<SignerRole> {
        if user_id == self.tenant_id {
            Some(SignerRole::Tenant)
        } else if user_id == self.landlord_id {
            Some(SignerRole::Landlord)
        } else {
            None
        }
    }

    fn signed_at(&self, role: SignerRole) -> Option<chrono::DateTime<Utc>> {
        match role {
            SignerRole::Tenant => self.agreement.tenant_signed_at,
            SignerRole::Landlord => self.agreement.landlord_signed_at,
        }
    }
}

async fn find_agreement(pool: &DbPool, document_id: Uuid) -> Result<AgreementParties, AppError> {
    sqlx::query_as::<_, AgreementParties>(
        r#"
        SELECT ra.*, b.tenant_id, b.landlord_id
        FROM rental_agreements ra
        JOIN bookings b ON b.id = ra.booking_id
        WHERE ra.id = $1
        "#,
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Document"))
}

/// Issue a single-use signature token for the caller's side of an agreement.
///
/// # Errors
///
/// - `InvalidRequest`: malformed hash, or it differs from the stored one
/// - `Forbidden`: caller is neither tenant nor landlord
/// - `Conflict`: caller's side is already signed
pub async fn generate(
    pool: &DbPool,
    secret: &str,
    auth: &AuthContext,
    request: GenerateSignatureRequest,
    client: &ClientInfo,
) -> Result<GeneratedSignature, AppError> {
    if !is_sha256_hex(&request.document_hash) {
        return Err(AppError::InvalidRequest(
            "document_hash must be 64 hex characters".to_string(),
        ));
    }

    let parties = find_agreement(pool, request.document_id).await?;
    let role = parties.role_of(auth.user_id).ok_or_else(|| {
        AppError::Forbidden("Only the tenant or landlord can sign this document".to_string())
    })?;

    if !parties
        .agreement
        .document_hash
        .eq_ignore_ascii_case(&request.document_hash)
    {
        return Err(AppError::InvalidRequest(
            "document_hash does not match the current document".to_string(),
        ));
    }
    if parties.signed_at(role).is_some() {
        return Err(AppError::Conflict(format!(
            "The {} has already signed this document",
            role.as_str().to_lowercase()
        )));
    }

    let payload = SignaturePayload::new(
        request.document_id,
        auth.user_id,
        role,
        &parties.agreement.document_hash,
        Utc::now(),
    );
    let token = sign(&payload, secret);

    sqlx::query(
        r#"
        INSERT INTO digital_signatures (
            document_id, user_id, signature_hash, nonce, status, ip_address, user_agent, metadata
        )
        VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $7)
        "#,
    )
    .bind(request.document_id)
    .bind(auth.user_id)
    .bind(hash_token(&token))
    .bind(&payload.nonce)
    .bind(client.ip.as_deref())
    .bind(client.user_agent.as_deref())
    .bind(json!({
        "role": role,
        "document_hash": payload.document_hash,
        "expires_at": payload.expires_at(),
        "version": payload.version,
    }))
    .execute(pool)
    .await?;

    tracing::info!(
        "Signature token issued to {} as {} for document {}",
        auth.user_id,
        role,
        request.document_id
    );

    Ok(GeneratedSignature {
        signature: token,
        role,
        expires_at: payload.expires_at(),
    })
}

#[derive(Debug, Serialize)]
pub struct ValidatedSignature {
    pub signature: DigitalSignature,
    pub role: SignerRole,
    pub agreement: RentalAgreement,
}

/// Redeem a token: sign or reject the document.
///
/// # Errors
///
/// - `InvalidRequest`: bad MAC, wrong issuer, expired, or for another document
/// - `Forbidden`: token belongs to another user
/// - `Conflict`: token already used, or the document changed since issue
pub async fn validate(
    pool: &DbPool,
    secret: &str,
    auth: &AuthContext,
    request: ValidateSignatureRequest,
) -> Result<ValidatedSignature, AppError> {
    let payload = verify(&request.signature, secret, Utc::now())?;

    if payload.document_id != request.document_id {
        return Err(AppError::InvalidRequest(
            "Signature was issued for a different document".to_string(),
        ));
    }
    if payload.user_id != auth.user_id {
        return Err(AppError::Forbidden(
            "Signature was issued to a different user".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let record = sqlx::query_as::<_, DigitalSignature>(
        "SELECT * FROM digital_signatures WHERE nonce = $1 FOR UPDATE",
    )
    .bind(&payload.nonce)
    .fetch_optional(&mut *tx)
    .await?
    .filter(|r| r.user_id == auth.user_id && r.document_id == payload.document_id)
    .ok_or_else(|| AppError::InvalidRequest("Signature is not recognised".to_string()))?;

    if record.signature_hash != hash_token(request.signature.trim()) {
        return Err(AppError::InvalidRequest(
            "Signature is not recognised".to_string(),
        ));
    }
    if record.status() != SignatureStatus::Pending {
        tracing::warn!(
            "Replayed signature nonce {} for document {} by {}",
            payload.nonce,
            payload.document_id,
            auth.user_id
        );
        return Err(AppError::Conflict(
            "Signature has already been used".to_string(),
        ));
    }

    let current_hash: String = sqlx::query_scalar(
        "SELECT document_hash FROM rental_agreements WHERE id = $1 FOR UPDATE",
    )
    .bind(payload.document_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Document"))?;

    if !current_hash.eq_ignore_ascii_case(&payload.document_hash) {
        return Err(AppError::Conflict(
            "Document has changed since this signature was issued".to_string(),
        ));
    }

    let status = request.action.resulting_status();
    let signature = sqlx::query_as::<_, DigitalSignature>(
        r#"
        UPDATE digital_signatures
        SET status = $1, signed_at = CASE WHEN $1 = 'SIGNED' THEN NOW() ELSE signed_at END
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(status.as_str())
    .bind(record.id)
    .fetch_one(&mut *tx)
    .await?;

    if request.action == SignatureAction::Sign {
        let column = match payload.role {
            SignerRole::Tenant => "tenant_signed_at",
            SignerRole::Landlord => "landlord_signed_at",
        };
        sqlx::query(&format!(
            "UPDATE rental_agreements SET {column} = NOW() WHERE id = $1"
        ))
        .bind(payload.document_id)
        .execute(&mut *tx)
        .await?;
    }

    let agreement = sqlx::query_as::<_, RentalAgreement>(
        "SELECT * FROM rental_agreements WHERE id = $1",
    )
    .bind(payload.document_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Document {} {} by {} as {}",
        payload.document_id,
        status.as_str(),
        auth.user_id,
        payload.role
    );

    Ok(ValidatedSignature {
        signature,
        role: payload.role,
        agreement,
    })
}

/// Signature records of a document, newest first.
pub async fn history(
    pool: &DbPool,
    auth: &AuthContext,
    document_id: Uuid,
) -> Result<Vec<DigitalSignature>, AppError> {
    let parties = find_agreement(pool, document_id).await?;
    if parties.role_of(auth.user_id).is_none() && !auth.is_admin() {
        return Err(AppError::Forbidden(
            "You cannot view this document's signatures".to_string(),
        ));
    }

    let signatures = sqlx::query_as::<_, DigitalSignature>(
        "SELECT * FROM digital_signatures WHERE document_id = $1 ORDER BY created_at DESC",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(signatures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;

    const SECRET: &str = "signature-test-secret";
    const TENANT: Uuid = Uuid::from_u128(0x0b);
    const AGREEMENT: Uuid = Uuid::from_u128(0x301);
    const DOCUMENT_HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn auth(user_id: Uuid, role: Role) -> AuthContext {
        AuthContext {
            user_id,
            session_id: Uuid::new_v4(),
            email: "test@rentverse.test".to_string(),
            role,
        }
    }

    fn client() -> ClientInfo {
        ClientInfo {
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("rentverse-tests".to_string()),
        }
    }

    async fn issue(pool: &DbPool, signer: &AuthContext) -> GeneratedSignature {
        let request = GenerateSignatureRequest {
            document_id: AGREEMENT,
            document_hash: DOCUMENT_HASH.to_string(),
        };
        generate(pool, SECRET, signer, request, &client())
            .await
            .unwrap()
    }

    fn redeem(token: &str, action: SignatureAction) -> ValidateSignatureRequest {
        ValidateSignatureRequest {
            signature: token.to_string(),
            document_id: AGREEMENT,
            action,
        }
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn token_signs_once_and_replay_conflicts(pool: DbPool) {
        let tenant = auth(TENANT, Role::User);
        let issued = issue(&pool, &tenant).await;
        assert_eq!(issued.role, SignerRole::Tenant);

        let signed = validate(&pool, SECRET, &tenant, redeem(&issued.signature, SignatureAction::Sign))
            .await
            .unwrap();
        assert_eq!(signed.signature.status(), SignatureStatus::Signed);
        assert!(signed.agreement.tenant_signed_at.is_some());
        assert!(signed.agreement.landlord_signed_at.is_none());

        let replay =
            validate(&pool, SECRET, &tenant, redeem(&issued.signature, SignatureAction::Sign)).await;
        assert!(matches!(replay, Err(AppError::Conflict(_))));
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn token_refused_after_document_changes(pool: DbPool) {
        let tenant = auth(TENANT, Role::User);
        let issued = issue(&pool, &tenant).await;

        sqlx::query("UPDATE rental_agreements SET document_hash = $1 WHERE id = $2")
            .bind("b".repeat(64))
            .bind(AGREEMENT)
            .execute(&pool)
            .await
            .unwrap();

        let result =
            validate(&pool, SECRET, &tenant, redeem(&issued.signature, SignatureAction::Sign)).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn only_parties_get_tokens(pool: DbPool) {
        let stranger = auth(Uuid::from_u128(0x0c), Role::User);
        let request = GenerateSignatureRequest {
            document_id: AGREEMENT,
            document_hash: DOCUMENT_HASH.to_string(),
        };

        let result = generate(&pool, SECRET, &stranger, request, &client()).await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn token_from_another_secret_is_rejected(pool: DbPool) {
        let tenant = auth(TENANT, Role::User);
        let issued = issue(&pool, &tenant).await;

        let result = validate(
            &pool,
            "some-other-secret",
            &tenant,
            redeem(&issued.signature, SignatureAction::Reject),
        )
        .await;

        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }
}
