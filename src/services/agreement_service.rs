//! Rental agreement generation, storage and integrity checks.
//!
//! Agreements are rendered to PDF, hashed with SHA-256 and written under
//! `UPLOAD_DIR/pdfs/`. When the local write fails the file goes to
//! Cloudinary as a raw asset instead. The stored hash is what signature
//! tokens commit to.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        agreement::{agreement_number, format_money, AgreementVerification, RentalAgreement},
        booking::{BookingStatus, BookingView},
    },
    services::{booking_service, cloud_storage::ResourceType, pdf::PdfDocument},
    state::AppState,
};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn pdf_dir(upload_dir: &str) -> PathBuf {
    Path::new(upload_dir).join("pdfs")
}

/// Lay out the agreement for an approved booking.
pub fn render(view: &BookingView, number: &str, generated_at: DateTime<Utc>) -> Vec<u8> {
    let booking = &view.booking;
    let date = |d: DateTime<Utc>| d.format("%d %B %Y").to_string();

    let mut doc = PdfDocument::new();
    doc.title("RESIDENTIAL TENANCY AGREEMENT")
        .paragraph(format!("Agreement No: {number}"))
        .paragraph(format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M UTC")))
        .spacer()
        .heading("1. Parties")
        .paragraph(format!(
            "Landlord: {} ({})",
            view.landlord_name, view.landlord_email
        ))
        .paragraph(format!("Tenant: {} ({})", view.tenant_name, view.tenant_email))
        .spacer()
        .heading("2. Property")
        .paragraph(format!("{} [{}]", view.property_title, view.property_code))
        .paragraph(format!("{}, {}", view.property_address, view.property_city))
        .spacer()
        .heading("3. Term")
        .paragraph(format!(
            "The tenancy begins on {} and ends on {}.",
            date(booking.start_date),
            date(booking.end_date)
        ))
        .spacer()
        .heading("4. Rent and Deposit")
        .paragraph(format!(
            "Monthly rent: {}, payable in advance on the first day of each month.",
            format_money(&booking.currency_code, booking.rent_cents)
        ))
        .paragraph(format!(
            "Security deposit: {}, refundable at the end of the tenancy less any \
             deductions for damage beyond normal wear and tear.",
            format_money(&booking.currency_code, booking.security_deposit_cents)
        ))
        .spacer()
        .heading("5. Obligations")
        .paragraph(
            "The tenant shall keep the property in good condition, shall not sublet \
             without written consent, and shall allow the landlord access for repairs \
             with reasonable notice.",
        )
        .paragraph(
            "The landlord shall keep the structure and installations in repair and \
             shall not interfere with the tenant's quiet enjoyment of the property.",
        )
        .spacer()
        .heading("6. Termination")
        .paragraph(
            "Either party may terminate this agreement by giving one month's written \
             notice. Breach of any term entitles the other party to terminate with \
             immediate effect.",
        );

    if let Some(notes) = booking.notes.as_deref() {
        doc.spacer().heading("7. Additional Notes").paragraph(notes);
    }

    doc.spacer()
        .heading("Signatures")
        .paragraph("This agreement is signed electronically by both parties.")
        .paragraph(format!("Booking reference: {}", booking.id));

    doc.render()
}

/// Write the PDF locally, or upload it when the local write fails.
///
/// Returns `(pdf_url, public_id)`.
async fn store(
    state: &AppState,
    file_name: &str,
    bytes: &[u8],
) -> Result<(String, Option<String>), AppError> {
    let dir = pdf_dir(&state.config.upload_dir);

    let local = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(file_name), bytes).await
    };

    match local.await {
        Ok(()) => {
            let url = format!(
                "{}/api/files/pdfs/{}",
                state.config.base_url.trim_end_matches('/'),
                file_name
            );
            Ok((url, None))
        }
        Err(e) => {
            tracing::warn!(
                "Writing {} to {} failed, uploading instead: {}",
                file_name,
                dir.display(),
                e
            );

            let storage = state.storage()?;
            let public_id = file_name.trim_end_matches(".pdf");
            let asset = storage
                .upload(
                    bytes.to_vec(),
                    file_name,
                    "application/pdf",
                    &storage.folder(Some("agreements")),
                    ResourceType::Raw,
                    Some(public_id),
                )
                .await?;

            Ok((asset.secure_url, Some(asset.public_id)))
        }
    }
}

/// Generate (or regenerate) the agreement of an approved booking.
///
/// # Errors
///
/// - `Forbidden`: caller is not the tenant, landlord or an admin
/// - `Conflict`: the booking is not `APPROVED`
pub async fn generate(
    state: &AppState,
    auth: &AuthContext,
    booking_id: Uuid,
) -> Result<RentalAgreement, AppError> {
    let (view, _) = booking_service::get_for(&state.pool, auth, booking_id).await?;
    if view.booking.status() != BookingStatus::Approved {
        return Err(AppError::Conflict(
            "Agreements can only be generated for approved bookings".to_string(),
        ));
    }

    let now = Utc::now();
    let number = agreement_number(booking_id, now);
    let bytes = render(&view, &number, now);
    let document_hash = sha256_hex(&bytes);
    let file_name = format!("{}-{}.pdf", number, now.timestamp());

    let previous = find(&state.pool, booking_id).await?;
    let (pdf_url, public_id) = store(state, &file_name, &bytes).await?;

    let agreement = sqlx::query_as::<_, RentalAgreement>(
        r#"
        INSERT INTO rental_agreements (
            booking_id, agreement_number, pdf_url, file_name, public_id, file_size, document_hash
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (booking_id) DO UPDATE SET
            agreement_number = EXCLUDED.agreement_number,
            pdf_url = EXCLUDED.pdf_url,
            file_name = EXCLUDED.file_name,
            public_id = EXCLUDED.public_id,
            file_size = EXCLUDED.file_size,
            document_hash = EXCLUDED.document_hash,
            landlord_signed_at = NULL,
            tenant_signed_at = NULL,
            created_at = NOW()
        RETURNING *
        "#,
    )
    .bind(booking_id)
    .bind(&number)
    .bind(&pdf_url)
    .bind(&file_name)
    .bind(&public_id)
    .bind(bytes.len() as i64)
    .bind(&document_hash)
    .fetch_one(&state.pool)
    .await?;

    if let Some(previous) = previous.filter(|p| p.public_id.is_none() && p.file_name != file_name) {
        let old = pdf_dir(&state.config.upload_dir).join(&previous.file_name);
        if let Err(e) = tokio::fs::remove_file(&old).await {
            tracing::warn!("Could not remove replaced agreement {}: {}", old.display(), e);
        }
    }

    tracing::info!(
        "Agreement {} generated for booking {} ({} bytes)",
        number,
        booking_id,
        agreement.file_size
    );

    Ok(agreement)
}

async fn find(pool: &crate::db::DbPool, booking_id: Uuid) -> Result<Option<RentalAgreement>, AppError> {
    let agreement = sqlx::query_as::<_, RentalAgreement>(
        "SELECT * FROM rental_agreements WHERE booking_id = $1",
    )
    .bind(booking_id)
    .fetch_optional(pool)
    .await?;
    Ok(agreement)
}

/// The agreement of a booking the caller is a party to.
pub async fn get(
    state: &AppState,
    auth: &AuthContext,
    booking_id: Uuid,
) -> Result<RentalAgreement, AppError> {
    booking_service::get_for(&state.pool, auth, booking_id).await?;
    find(&state.pool, booking_id)
        .await?
        .ok_or(AppError::NotFound("Rental agreement"))
}

async fn load_bytes(state: &AppState, agreement: &RentalAgreement) -> Result<Vec<u8>, AppError> {
    match agreement.public_id {
        None => {
            let path = pdf_dir(&state.config.upload_dir).join(&agreement.file_name);
            tokio::fs::read(&path).await.map_err(|e| {
                tracing::error!("Agreement file {} unreadable: {}", path.display(), e);
                AppError::NotFound("Agreement file")
            })
        }
        Some(_) => state.storage()?.download(&agreement.pdf_url).await,
    }
}

/// Re-hash the stored file and compare it with the recorded hash.
pub async fn verify(
    state: &AppState,
    auth: &AuthContext,
    booking_id: Uuid,
) -> Result<AgreementVerification, AppError> {
    let agreement = get(state, auth, booking_id).await?;
    let bytes = load_bytes(state, &agreement).await?;
    let computed_hash = sha256_hex(&bytes);

    let is_valid = computed_hash == agreement.document_hash;
    if !is_valid {
        tracing::warn!(
            "Agreement {} for booking {} no longer matches its hash",
            agreement.agreement_number,
            booking_id
        );
    }

    Ok(AgreementVerification {
        booking_id,
        agreement_number: agreement.agreement_number,
        document_hash: agreement.document_hash,
        computed_hash,
        is_valid,
        verified_at: Utc::now(),
    })
}

/// Read a locally stored agreement by file name.
pub async fn read_local_pdf(upload_dir: &str, file_name: &str) -> Result<Vec<u8>, AppError> {
    tokio::fs::read(pdf_dir(upload_dir).join(file_name))
        .await
        .map_err(|_| AppError::NotFound("File"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::booking::Booking;
    use chrono::TimeZone;

    fn view(notes: Option<&str>) -> BookingView {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        BookingView {
            booking: Booking {
                id: Uuid::new_v4(),
                property_id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                landlord_id: Uuid::new_v4(),
                start_date: at,
                end_date: Utc.with_ymd_and_hms(2026, 12, 31, 0, 0, 0).unwrap(),
                rent_cents: 250_000,
                security_deposit_cents: 500_000,
                currency_code: "MYR".to_string(),
                notes: notes.map(str::to_string),
                status: "APPROVED".to_string(),
                rejection_reason: None,
                created_at: at,
                updated_at: at,
            },
            property_code: "RV-0A1B2C3D".to_string(),
            property_title: "Cozy 2BR near KLCC".to_string(),
            property_address: "12 Jalan Ampang".to_string(),
            property_city: "Kuala Lumpur".to_string(),
            tenant_name: "Daniel Lim".to_string(),
            tenant_email: "daniel@example.com".to_string(),
            landlord_name: "Aina Rahman".to_string(),
            landlord_email: "aina@example.com".to_string(),
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        let v = view(None);
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

        let a = render(&v, "RA-0000ABCD-2026", at);
        let b = render(&v, "RA-0000ABCD-2026", at);
        assert_eq!(sha256_hex(&a), sha256_hex(&b));
    }

    #[test]
    fn agreement_mentions_parties_and_terms() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let pdf = String::from_utf8(render(&view(Some("One cat allowed")), "RA-X-2026", at)).unwrap();

        assert!(pdf.contains("Agreement No: RA-X-2026"));
        assert!(pdf.contains("Aina Rahman"));
        assert!(pdf.contains("Daniel Lim"));
        assert!(pdf.contains("MYR 2,500.00"));
        assert!(pdf.contains("One cat allowed"));
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let hash = sha256_hex(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
