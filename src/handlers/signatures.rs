//! Digital signature handlers.
//!
//! - POST /api/signatures/generate - Issue a single-use signature token
//! - POST /api/signatures/validate - Redeem it to sign or reject
//! - GET /api/signatures/history/{document_id}

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        activity::ActivityAction,
        signature::{
            DigitalSignature, GenerateSignatureRequest, GeneratedSignature, SignatureAction,
            ValidateSignatureRequest,
        },
    },
    services::{
        activity_logger,
        signature_service::{self, ValidatedSignature},
    },
    state::AppState,
};

/// Issue a signature token.
///
/// # Endpoint
///
/// `POST /api/signatures/generate`
///
/// # Request Body
///
/// ```json
/// { "document_id": "…", "document_hash": "<64 hex chars>" }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: `{ "signature", "role", "expires_at" }`, valid for 24 hours
/// - **Error (400)**: hash malformed or not the current document hash
/// - **Error (403)**: caller is not a party to the agreement
pub async fn generate_signature(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<GenerateSignatureRequest>,
) -> Result<Json<GeneratedSignature>, AppError> {
    let document_id = request.document_id;
    let generated =
        signature_service::generate(&state.pool, &state.config.token_secret, &auth, request, &client)
            .await?;

    activity_logger::log(
        &state.pool,
        ActivityAction::SignatureGenerated,
        Some(auth.user_id),
        json!({ "document_id": document_id, "role": generated.role }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(generated))
}

/// Redeem a signature token.
///
/// # Endpoint
///
/// `POST /api/signatures/validate`
///
/// # Response
///
/// - **Success (200 OK)**: updated signature record and agreement
/// - **Error (400)**: token invalid, expired or for another document
/// - **Error (409)**: token already used, or the document changed
pub async fn validate_signature(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<ValidateSignatureRequest>,
) -> Result<Json<ValidatedSignature>, AppError> {
    let action = request.action;
    let document_id = request.document_id;
    let validated =
        signature_service::validate(&state.pool, &state.config.token_secret, &auth, request)
            .await?;

    let logged = match action {
        SignatureAction::Sign => ActivityAction::DocumentSigned,
        SignatureAction::Reject => ActivityAction::DocumentRejected,
    };
    activity_logger::log(
        &state.pool,
        logged,
        Some(auth.user_id),
        json!({
            "document_id": document_id,
            "role": validated.role,
            "fully_signed": validated.agreement.is_fully_signed(),
        }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(validated))
}

/// `GET /api/signatures/history/{document_id}` (tenant, landlord or admin)
pub async fn signature_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Vec<DigitalSignature>>, AppError> {
    Ok(Json(
        signature_service::history(&state.pool, &auth, document_id).await?,
    ))
}
