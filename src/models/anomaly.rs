//! Security anomaly records and the admin dashboard payload.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

use super::activity::ActivityLog;

/// How urgent an anomaly is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// High and critical anomalies raise an alert.
    pub fn raises_alert(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(AppError::InvalidRequest(format!("Unknown severity: {other}"))),
        }
    }
}

/// Built-in anomaly kinds. The AI service may report others.
pub mod kinds {
    pub const MULTIPLE_FAILED_LOGINS: &str = "MULTIPLE_FAILED_LOGINS";
    pub const BRUTE_FORCE: &str = "BRUTE_FORCE";
    pub const UNUSUAL_ACCESS_TIME: &str = "UNUSUAL_ACCESS_TIME";
    pub const MULTIPLE_SESSIONS: &str = "MULTIPLE_SESSIONS";
}

/// An anomaly found by a rule or the AI service, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedAnomaly {
    pub anomaly_type: String,
    pub severity: Severity,
    pub description: String,
    pub metadata: serde_json::Value,
}

/// Represents a row of `security_anomalies`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SecurityAnomaly {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub anomaly_type: String,
    pub severity: String,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for `GET /api/security-monitoring/anomalies`.
#[derive(Debug, Default, Deserialize)]
pub struct AnomalyQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub severity: Option<Severity>,
    #[serde(rename = "type")]
    pub anomaly_type: Option<String>,
    pub resolved: Option<bool>,
}

/// Request body for `POST /api/security-monitoring/anomalies/{id}/resolve`.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveAnomalyRequest {
    pub resolution: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardSummary {
    pub total_anomalies: i64,
    pub unresolved_anomalies: i64,
    pub high_severity_count: i64,
    /// Percentage of anomalies in the window that are resolved, 0 to 100.
    pub resolution_rate: f64,
}

/// A `(label, count)` pair from a `GROUP BY`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyCount {
    pub day: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct SecurityDashboard {
    pub days: i64,
    pub summary: DashboardSummary,
    pub anomalies_by_type: Vec<LabelCount>,
    pub anomalies_by_severity: Vec<LabelCount>,
    pub activity_by_action: Vec<LabelCount>,
    pub threat_sources: Vec<LabelCount>,
    pub trends: Vec<DailyCount>,
    pub recent_events: Vec<ActivityLog>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn only_high_and_critical_alert() {
        assert!(!Severity::Low.raises_alert());
        assert!(!Severity::Medium.raises_alert());
        assert!(Severity::High.raises_alert());
        assert!(Severity::Critical.raises_alert());
    }

    #[test]
    fn severity_parsing_ignores_case() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert!("SEVERE".parse::<Severity>().is_err());
    }
}
