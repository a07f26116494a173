//! Per-user preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_CURRENCY: &str = "MYR";
pub const DEFAULT_TIMEZONE: &str = "Asia/Kuala_Lumpur";

/// Represents a row of the `user_settings` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserSettings {
    pub user_id: Uuid,
    pub language: String,
    pub currency: String,
    pub timezone: String,
    pub notifications: Value,
    pub privacy: Value,
    pub preferences: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `PUT /api/user-settings/me`. Absent fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSettingsRequest {
    pub language: Option<String>,
    pub currency: Option<String>,
    pub timezone: Option<String>,
    pub notifications: Option<Value>,
    pub privacy: Option<Value>,
    pub preferences: Option<Value>,
}

impl UpdateSettingsRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(language) = &self.language {
            let len = language.chars().count();
            if !(2..=5).contains(&len) {
                return Err(AppError::InvalidRequest(
                    "language must be 2 to 5 characters".to_string(),
                ));
            }
        }
        if let Some(currency) = &self.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(AppError::InvalidRequest(
                    "currency must be 3 uppercase letters".to_string(),
                ));
            }
        }
        if let Some(timezone) = &self.timezone {
            if timezone.trim().is_empty() || timezone.len() > 64 {
                return Err(AppError::InvalidRequest(
                    "timezone must be 1 to 64 characters".to_string(),
                ));
            }
        }

        for (field, value) in [
            ("notifications", &self.notifications),
            ("privacy", &self.privacy),
            ("preferences", &self.preferences),
        ] {
            if value.as_ref().is_some_and(|v| !v.is_object()) {
                return Err(AppError::InvalidRequest(format!(
                    "{field} must be an object"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_update_is_valid() {
        assert!(UpdateSettingsRequest::default().validate().is_ok());
    }

    #[test]
    fn field_rules() {
        let ok = UpdateSettingsRequest {
            language: Some("ms-MY".to_string()),
            currency: Some("USD".to_string()),
            notifications: Some(json!({ "email": true })),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let cases = [
            UpdateSettingsRequest {
                language: Some("e".to_string()),
                ..Default::default()
            },
            UpdateSettingsRequest {
                language: Some("english".to_string()),
                ..Default::default()
            },
            UpdateSettingsRequest {
                currency: Some("myr".to_string()),
                ..Default::default()
            },
            UpdateSettingsRequest {
                currency: Some("RM".to_string()),
                ..Default::default()
            },
            UpdateSettingsRequest {
                privacy: Some(json!(["public"])),
                ..Default::default()
            },
            UpdateSettingsRequest {
                preferences: Some(json!("dark")),
                ..Default::default()
            },
        ];

        for case in cases {
            assert!(case.validate().is_err(), "{case:?} should fail");
        }
    }
}
