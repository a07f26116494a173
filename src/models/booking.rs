//! Booking models and the booking lifecycle rules.
//!
//! # Lifecycle
//!
//! ```text
//! PENDING ──approve──► APPROVED ──cancel──► CANCELLED
//!    │                    ▲
//!    ├──reject──► REJECTED │
//!    └──cancel────────────┘ (to CANCELLED)
//! ```
//!
//! Approve and reject belong to the landlord (or an admin). A tenant may
//! cancel only before the start date.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, middleware::auth::AuthContext};

pub const MAX_NOTES_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(BookingStatus::Pending),
            "APPROVED" => Ok(BookingStatus::Approved),
            "REJECTED" => Ok(BookingStatus::Rejected),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "COMPLETED" => Ok(BookingStatus::Completed),
            other => Err(AppError::InvalidRequest(format!(
                "Unknown booking status: {other}"
            ))),
        }
    }
}

/// Represents a row of the `bookings` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub property_id: Uuid,
    pub tenant_id: Uuid,
    /// Owner of the property when the booking was made
    pub landlord_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub rent_cents: i64,
    pub security_deposit_cents: i64,
    pub currency_code: String,
    pub notes: Option<String>,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn status(&self) -> BookingStatus {
        self.status.parse().unwrap_or(BookingStatus::Pending)
    }
}

/// A booking joined with the names shown in booking lists.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookingView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub booking: Booking,
    pub property_code: String,
    pub property_title: String,
    pub property_address: String,
    pub property_city: String,
    pub tenant_name: String,
    pub tenant_email: String,
    pub landlord_name: String,
    pub landlord_email: String,
}

/// Approved period of a property, as shown on its calendar.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookedPeriod {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Request body for `POST /api/bookings`.
///
/// ```json
/// {
///   "property_id": "…",
///   "start_date": "2026-01-01T00:00:00Z",
///   "end_date": "2026-12-31T00:00:00Z",
///   "security_deposit_cents": 500000,
///   "notes": "Moving in with one cat"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub property_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Defaults to the property's monthly price
    pub rent_cents: Option<i64>,
    #[serde(default)]
    pub security_deposit_cents: i64,
    pub notes: Option<String>,
}

impl CreateBookingRequest {
    /// Field checks that need no database access.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.end_date <= self.start_date {
            return Err(AppError::InvalidRequest(
                "end_date must be after start_date".to_string(),
            ));
        }
        if self.start_date < now - Duration::days(1) {
            return Err(AppError::InvalidRequest(
                "start_date cannot be in the past".to_string(),
            ));
        }
        if let Some(rent) = self.rent_cents {
            if rent <= 0 {
                return Err(AppError::InvalidRequest(
                    "rent_cents must be greater than 0".to_string(),
                ));
            }
        }
        if self.security_deposit_cents < 0 {
            return Err(AppError::InvalidRequest(
                "security_deposit_cents cannot be negative".to_string(),
            ));
        }
        if self
            .notes
            .as_deref()
            .is_some_and(|notes| notes.chars().count() > MAX_NOTES_LEN)
        {
            return Err(AppError::InvalidRequest(format!(
                "notes cannot exceed {MAX_NOTES_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectBookingRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<BookingStatus>,
}

/// How the caller relates to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingParty {
    Tenant,
    Landlord,
    Admin,
}

impl BookingParty {
    /// `None` when the caller has no business with this booking.
    pub fn of(booking: &Booking, auth: &AuthContext) -> Option<Self> {
        if booking.tenant_id == auth.user_id {
            Some(BookingParty::Tenant)
        } else if booking.landlord_id == auth.user_id {
            Some(BookingParty::Landlord)
        } else if auth.is_admin() {
            Some(BookingParty::Admin)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Approve,
    Reject,
    Cancel,
}

impl BookingAction {
    fn target(&self) -> BookingStatus {
        match self {
            BookingAction::Approve => BookingStatus::Approved,
            BookingAction::Reject => BookingStatus::Rejected,
            BookingAction::Cancel => BookingStatus::Cancelled,
        }
    }
}

/// Status a booking moves to when `party` applies `action`.
///
/// # Errors
///
/// - `Forbidden` when the party may not take this action
/// - `Conflict` when the current status does not allow it
pub fn transition(
    current: BookingStatus,
    action: BookingAction,
    party: BookingParty,
    start_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<BookingStatus, AppError> {
    let allowed_from: &[BookingStatus] = match action {
        BookingAction::Approve | BookingAction::Reject => {
            if party == BookingParty::Tenant {
                return Err(AppError::Forbidden(
                    "Only the landlord can approve or reject a booking".to_string(),
                ));
            }
            &[BookingStatus::Pending]
        }
        BookingAction::Cancel => {
            if party == BookingParty::Tenant && start_date <= now {
                return Err(AppError::Conflict(
                    "Bookings cannot be cancelled by the tenant after they start".to_string(),
                ));
            }
            &[BookingStatus::Pending, BookingStatus::Approved]
        }
    };

    if !allowed_from.contains(&current) {
        return Err(AppError::Conflict(format!(
            "Booking is {current} and cannot become {}",
            action.target()
        )));
    }

    Ok(action.target())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 0, 0, 0).unwrap()
    }

    fn request(start: DateTime<Utc>, end: DateTime<Utc>) -> CreateBookingRequest {
        CreateBookingRequest {
            property_id: Uuid::new_v4(),
            start_date: start,
            end_date: end,
            rent_cents: None,
            security_deposit_cents: 0,
            notes: None,
        }
    }

    #[test]
    fn period_must_move_forward() {
        let now = at(1);
        assert!(request(at(5), at(10)).validate(now).is_ok());
        assert!(request(at(10), at(10)).validate(now).is_err());
        assert!(request(at(10), at(5)).validate(now).is_err());
    }

    #[test]
    fn start_may_be_at_most_a_day_old() {
        let now = at(10);
        assert!(request(at(9), at(20)).validate(now).is_ok());
        assert!(request(at(8), at(20)).validate(now).is_err());
    }

    #[test]
    fn notes_and_money_are_checked() {
        let now = at(1);

        let mut r = request(at(2), at(3));
        r.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(r.validate(now).is_err());

        let mut r = request(at(2), at(3));
        r.security_deposit_cents = -1;
        assert!(r.validate(now).is_err());

        let mut r = request(at(2), at(3));
        r.rent_cents = Some(0);
        assert!(r.validate(now).is_err());
    }

    #[test]
    fn landlord_decides_pending_bookings() {
        use BookingAction::*;
        use BookingStatus::*;
        let (start, now) = (at(20), at(1));

        assert_eq!(
            transition(Pending, Approve, BookingParty::Landlord, start, now).unwrap(),
            Approved
        );
        assert_eq!(
            transition(Pending, Reject, BookingParty::Admin, start, now).unwrap(),
            Rejected
        );
        assert!(matches!(
            transition(Pending, Approve, BookingParty::Tenant, start, now),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            transition(Approved, Approve, BookingParty::Landlord, start, now),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            transition(Rejected, Reject, BookingParty::Landlord, start, now),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn tenant_cancels_only_before_start() {
        use BookingAction::*;
        use BookingStatus::*;

        assert_eq!(
            transition(Approved, Cancel, BookingParty::Tenant, at(20), at(1)).unwrap(),
            Cancelled
        );
        assert!(matches!(
            transition(Approved, Cancel, BookingParty::Tenant, at(1), at(2)),
            Err(AppError::Conflict(_))
        ));
        assert_eq!(
            transition(Approved, Cancel, BookingParty::Landlord, at(1), at(2)).unwrap(),
            Cancelled
        );
        assert!(matches!(
            transition(Cancelled, Cancel, BookingParty::Admin, at(20), at(1)),
            Err(AppError::Conflict(_))
        ));
    }
}
