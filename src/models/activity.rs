//! Audit trail entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every action that can appear in `activity_logs.action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    LoginFailed,
    LoginSuccess,
    OtpSent,
    OtpFailedInvalid,
    OtpFailedExpired,
    SuspiciousLogin,
    EmailSendFailed,
    RegistrationSuccess,
    Logout,
    MfaUpdated,
    ProfileUpdated,
    UserCreated,
    UserUpdated,
    UserDeactivated,
    PropertyCreated,
    PropertyUpdated,
    PropertyDeleted,
    PropertyApproved,
    PropertyRejected,
    AutoApproveToggled,
    BookingCreated,
    BookingApproved,
    BookingRejected,
    BookingCancelled,
    AgreementGenerated,
    SignatureGenerated,
    DocumentSigned,
    DocumentRejected,
    FileUploaded,
    FileDeleted,
    SettingsUpdated,
    SecurityAlert,
    AnomalyResolved,
    RateLimitExceeded,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::LoginFailed => "LOGIN_FAILED",
            ActivityAction::LoginSuccess => "LOGIN_SUCCESS",
            ActivityAction::OtpSent => "OTP_SENT",
            ActivityAction::OtpFailedInvalid => "OTP_FAILED_INVALID",
            ActivityAction::OtpFailedExpired => "OTP_FAILED_EXPIRED",
            ActivityAction::SuspiciousLogin => "SUSPICIOUS_LOGIN",
            ActivityAction::EmailSendFailed => "EMAIL_SEND_FAILED",
            ActivityAction::RegistrationSuccess => "REGISTRATION_SUCCESS",
            ActivityAction::Logout => "LOGOUT",
            ActivityAction::MfaUpdated => "MFA_UPDATED",
            ActivityAction::ProfileUpdated => "PROFILE_UPDATED",
            ActivityAction::UserCreated => "USER_CREATED",
            ActivityAction::UserUpdated => "USER_UPDATED",
            ActivityAction::UserDeactivated => "USER_DEACTIVATED",
            ActivityAction::PropertyCreated => "PROPERTY_CREATED",
            ActivityAction::PropertyUpdated => "PROPERTY_UPDATED",
            ActivityAction::PropertyDeleted => "PROPERTY_DELETED",
            ActivityAction::PropertyApproved => "PROPERTY_APPROVED",
            ActivityAction::PropertyRejected => "PROPERTY_REJECTED",
            ActivityAction::AutoApproveToggled => "AUTO_APPROVE_TOGGLED",
            ActivityAction::BookingCreated => "BOOKING_CREATED",
            ActivityAction::BookingApproved => "BOOKING_APPROVED",
            ActivityAction::BookingRejected => "BOOKING_REJECTED",
            ActivityAction::BookingCancelled => "BOOKING_CANCELLED",
            ActivityAction::AgreementGenerated => "AGREEMENT_GENERATED",
            ActivityAction::SignatureGenerated => "SIGNATURE_GENERATED",
            ActivityAction::DocumentSigned => "DOCUMENT_SIGNED",
            ActivityAction::DocumentRejected => "DOCUMENT_REJECTED",
            ActivityAction::FileUploaded => "FILE_UPLOADED",
            ActivityAction::FileDeleted => "FILE_DELETED",
            ActivityAction::SettingsUpdated => "SETTINGS_UPDATED",
            ActivityAction::SecurityAlert => "SECURITY_ALERT",
            ActivityAction::AnomalyResolved => "ANOMALY_RESOLVED",
            ActivityAction::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a row of `activity_logs`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ActivityLog {
    pub id: Uuid,
    pub action: String,
    pub user_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for `GET /api/security-monitoring/activity`.
#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub days: Option<i64>,
    pub action: Option<String>,
    pub user_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_name_matches_stored_text() {
        for action in [
            ActivityAction::LoginFailed,
            ActivityAction::OtpFailedExpired,
            ActivityAction::RateLimitExceeded,
            ActivityAction::AgreementGenerated,
        ] {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, action.as_str());
        }
    }
}
