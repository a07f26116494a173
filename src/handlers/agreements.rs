//! Rental agreement handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        activity::ActivityAction,
        agreement::{AgreementVerification, RentalAgreement},
    },
    services::{activity_logger, agreement_service},
    state::AppState,
};

/// Generate the agreement PDF for an approved booking.
///
/// # Endpoint
///
/// `POST /api/bookings/{id}/rental-agreement`
///
/// # Response
///
/// - **Success (201 Created)**: the agreement record with `pdf_url` and `document_hash`
/// - **Error (403)**: caller is not a party to the booking
/// - **Error (409)**: booking is not approved
pub async fn generate_agreement(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(booking_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RentalAgreement>), AppError> {
    let agreement = agreement_service::generate(&state, &auth, booking_id).await?;

    activity_logger::log(
        &state.pool,
        ActivityAction::AgreementGenerated,
        Some(auth.user_id),
        json!({
            "booking_id": booking_id,
            "agreement_number": agreement.agreement_number,
            "document_hash": agreement.document_hash,
        }),
        client.ip.as_deref(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(agreement)))
}

/// `GET /api/bookings/{id}/rental-agreement`
pub async fn get_agreement(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<RentalAgreement>, AppError> {
    Ok(Json(agreement_service::get(&state, &auth, booking_id).await?))
}

/// `GET /api/bookings/{id}/rental-agreement/verify`
pub async fn verify_agreement(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<AgreementVerification>, AppError> {
    Ok(Json(
        agreement_service::verify(&state, &auth, booking_id).await?,
    ))
}
