//! Rental agreement records.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents a row of the `rental_agreements` table.
///
/// One per booking; regenerating replaces it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RentalAgreement {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub agreement_number: String,
    pub pdf_url: String,
    pub file_name: String,
    /// Cloudinary id when the file is stored remotely
    pub public_id: Option<String>,
    pub file_size: i64,
    /// Hex SHA-256 of the PDF bytes
    pub document_hash: String,
    pub landlord_signed_at: Option<DateTime<Utc>>,
    pub tenant_signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RentalAgreement {
    pub fn is_fully_signed(&self) -> bool {
        self.landlord_signed_at.is_some() && self.tenant_signed_at.is_some()
    }
}

/// Result of re-hashing a stored agreement.
#[derive(Debug, Serialize)]
pub struct AgreementVerification {
    pub booking_id: Uuid,
    pub agreement_number: String,
    pub document_hash: String,
    pub computed_hash: String,
    pub is_valid: bool,
    pub verified_at: DateTime<Utc>,
}

/// `RA-<last 8 of booking id, uppercase>-<year>`.
pub fn agreement_number(booking_id: Uuid, at: DateTime<Utc>) -> String {
    let simple = booking_id.simple().to_string();
    let tail = &simple[simple.len() - 8..];
    format!("RA-{}-{}", tail.to_uppercase(), at.year())
}

/// Whether `name` is a bare PDF file name safe to join onto a directory.
pub fn is_safe_pdf_name(name: &str) -> bool {
    name.len() > 4
        && name.ends_with(".pdf")
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// `MYR 2,500.00` from cents.
pub fn format_money(currency: &str, cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{currency} {sign}{grouped}.{:02}", cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn number_uses_booking_tail_and_year() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        assert_eq!(agreement_number(id, at), "RA-55440000-2026");

        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-4466554abcde").unwrap();
        assert_eq!(agreement_number(id, at), "RA-554ABCDE-2026");
    }

    #[test]
    fn pdf_names_are_restricted() {
        assert!(is_safe_pdf_name("RA-554ABCDE-2026-1760832000.pdf"));
        assert!(!is_safe_pdf_name("../secret.pdf"));
        assert!(!is_safe_pdf_name("a/b.pdf"));
        assert!(!is_safe_pdf_name(".pdf"));
        assert!(!is_safe_pdf_name("..pdf"));
        assert!(!is_safe_pdf_name("notes.txt"));
        assert!(!is_safe_pdf_name("space name.pdf"));
    }

    #[test]
    fn money_is_grouped() {
        assert_eq!(format_money("MYR", 250_000), "MYR 2,500.00");
        assert_eq!(format_money("MYR", 5), "MYR 0.05");
        assert_eq!(format_money("USD", 123_456_789), "USD 1,234,567.89");
        assert_eq!(format_money("MYR", 100_000_000), "MYR 1,000,000.00");
    }
}
