//! Security anomaly detection and the admin monitoring queries.
//!
//! Login events are checked against a small set of rules over the recent
//! activity log, then merged with whatever the optional AI service reports.
//! Analysis never fails the login that triggered it.
//!
//! # Rules
//!
//! | Event        | Condition                                  | Type                     | Severity |
//! |--------------|--------------------------------------------|--------------------------|----------|
//! | login failed | 3+ failed logins in 15 minutes             | `MULTIPLE_FAILED_LOGINS` | HIGH     |
//! | OTP failed   | 5+ OTP failures in 15 minutes              | `BRUTE_FORCE`            | HIGH     |
//! | any login    | UTC hour in 23:00..06:00                   | `UNUSUAL_ACCESS_TIME`    | MEDIUM   |
//! | login ok     | more than one other success in 5 minutes   | `MULTIPLE_SESSIONS`      | MEDIUM   |

use chrono::{DateTime, Timelike, Utc};
use serde_json::json;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::client_info::ClientInfo,
    models::{
        activity::{ActivityAction, ActivityLog, ActivityQuery},
        anomaly::{
            kinds, AnomalyQuery, DailyCount, DashboardSummary, DetectedAnomaly, LabelCount,
            SecurityAnomaly, SecurityDashboard, Severity,
        },
        pagination::{PageQuery, Paginated},
        user::User,
    },
    services::{activity_logger, ai_client::AnomalyRequest},
    state::AppState,
};

pub const FAILED_LOGIN_THRESHOLD: i64 = 3;
pub const OTP_FAILURE_THRESHOLD: i64 = 5;
const FAILURE_WINDOW_MINUTES: i64 = 15;
const SESSION_WINDOW_MINUTES: i64 = 5;

const DEFAULT_DASHBOARD_DAYS: i64 = 30;
const MAX_DASHBOARD_DAYS: i64 = 365;

const OTP_FAILURE_ACTIONS: [ActivityAction; 2] = [
    ActivityAction::OtpFailedInvalid,
    ActivityAction::OtpFailedExpired,
];

/// The authentication step that is being analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEvent {
    LoginFailed,
    LoginSucceeded,
    OtpFailed,
}

impl LoginEvent {
    fn is_login(&self) -> bool {
        matches!(self, LoginEvent::LoginFailed | LoginEvent::LoginSucceeded)
    }
}

/// Counts taken from the activity log, including the current event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginSignals {
    pub failed_logins: i64,
    pub otp_failures: i64,
    pub recent_successes: i64,
}

/// Hours (UTC) treated as unusual for a login.
pub fn is_unusual_hour(hour: u32) -> bool {
    hour >= 23 || hour < 6
}

/// Apply the built-in rules to one event.
pub fn evaluate_rules(
    event: LoginEvent,
    signals: LoginSignals,
    now: DateTime<Utc>,
) -> Vec<DetectedAnomaly> {
    let mut found = Vec::new();

    if event == LoginEvent::LoginFailed && signals.failed_logins >= FAILED_LOGIN_THRESHOLD {
        found.push(DetectedAnomaly {
            anomaly_type: kinds::MULTIPLE_FAILED_LOGINS.to_string(),
            severity: Severity::High,
            description: format!(
                "{} failed login attempts in the last {} minutes",
                signals.failed_logins, FAILURE_WINDOW_MINUTES
            ),
            metadata: json!({ "failed_attempts": signals.failed_logins }),
        });
    }

    if event == LoginEvent::OtpFailed && signals.otp_failures >= OTP_FAILURE_THRESHOLD {
        found.push(DetectedAnomaly {
            anomaly_type: kinds::BRUTE_FORCE.to_string(),
            severity: Severity::High,
            description: format!(
                "{} failed verification codes in the last {} minutes",
                signals.otp_failures, FAILURE_WINDOW_MINUTES
            ),
            metadata: json!({ "otp_failures": signals.otp_failures }),
        });
    }

    if event.is_login() && is_unusual_hour(now.hour()) {
        found.push(DetectedAnomaly {
            anomaly_type: kinds::UNUSUAL_ACCESS_TIME.to_string(),
            severity: Severity::Medium,
            description: format!("Login attempt at {:02}:00 UTC", now.hour()),
            metadata: json!({ "hour_utc": now.hour() }),
        });
    }

    // The current success is already counted
    let other_successes = signals.recent_successes.saturating_sub(1);
    if event == LoginEvent::LoginSucceeded && other_successes > 1 {
        found.push(DetectedAnomaly {
            anomaly_type: kinds::MULTIPLE_SESSIONS.to_string(),
            severity: Severity::Medium,
            description: format!(
                "{} other successful logins in the last {} minutes",
                other_successes, SESSION_WINDOW_MINUTES
            ),
            metadata: json!({ "other_sessions": other_successes }),
        });
    }

    found
}

async fn gather_signals(
    pool: &DbPool,
    user_id: Uuid,
    event: LoginEvent,
) -> Result<LoginSignals, AppError> {
    let mut signals = LoginSignals::default();

    match event {
        LoginEvent::LoginFailed => {
            signals.failed_logins = activity_logger::count_recent(
                pool,
                user_id,
                &[ActivityAction::LoginFailed],
                FAILURE_WINDOW_MINUTES,
            )
            .await?;
        }
        LoginEvent::OtpFailed => {
            signals.otp_failures = activity_logger::count_recent(
                pool,
                user_id,
                &OTP_FAILURE_ACTIONS,
                FAILURE_WINDOW_MINUTES,
            )
            .await?;
        }
        LoginEvent::LoginSucceeded => {
            signals.recent_successes = activity_logger::count_recent(
                pool,
                user_id,
                &[ActivityAction::LoginSuccess],
                SESSION_WINDOW_MINUTES,
            )
            .await?;
        }
    }

    Ok(signals)
}

/// Run detection for one login event, storing and alerting on what is found.
pub async fn analyze_login(state: &AppState, user: &User, event: LoginEvent, client: &ClientInfo) {
    let signals = match gather_signals(&state.pool, user.id, event).await {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!("Anomaly signals unavailable for {}: {:?}", user.id, e);
            return;
        }
    };

    let now = Utc::now();
    let mut anomalies = evaluate_rules(event, signals, now);

    if state.ai.is_enabled() {
        let request = AnomalyRequest {
            user_id: user.id,
            user_email: &user.email,
            user_role: &user.role,
            ip_address: client.ip.as_deref(),
            user_agent: client.user_agent.as_deref(),
            login_success: event == LoginEvent::LoginSucceeded,
            timestamp: now,
            recent_activity: json!({
                "failed_logins": signals.failed_logins,
                "otp_failures": signals.otp_failures,
                "recent_successes": signals.recent_successes,
            }),
            analysis_type: "security",
        };

        for reported in state.ai.detect_anomalies(&request).await {
            let severity = reported.severity.parse().unwrap_or(Severity::Medium);
            anomalies.push(DetectedAnomaly {
                anomaly_type: reported.anomaly_type,
                severity,
                description: reported.description,
                metadata: reported.metadata,
            });
        }
    }

    for anomaly in anomalies {
        if let Err(e) = record(&state.pool, Some(user.id), &anomaly, client).await {
            tracing::error!("Failed to record anomaly {}: {:?}", anomaly.anomaly_type, e);
            continue;
        }

        tracing::warn!(
            "Security anomaly {} ({}) for user {}",
            anomaly.anomaly_type,
            anomaly.severity,
            user.id
        );

        if anomaly.severity.raises_alert() {
            alert(state, user, &anomaly, client).await;
        }
    }
}

async fn record(
    pool: &DbPool,
    user_id: Option<Uuid>,
    anomaly: &DetectedAnomaly,
    client: &ClientInfo,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO security_anomalies
            (user_id, anomaly_type, severity, description, ip_address, user_agent, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(user_id)
    .bind(&anomaly.anomaly_type)
    .bind(anomaly.severity.as_str())
    .bind(&anomaly.description)
    .bind(client.ip.as_deref())
    .bind(client.user_agent.as_deref())
    .bind(&anomaly.metadata)
    .execute(pool)
    .await?;

    Ok(())
}

async fn alert(state: &AppState, user: &User, anomaly: &DetectedAnomaly, client: &ClientInfo) {
    activity_logger::log(
        &state.pool,
        ActivityAction::SecurityAlert,
        Some(user.id),
        json!({
            "anomaly_type": anomaly.anomaly_type,
            "severity": anomaly.severity,
            "description": anomaly.description,
        }),
        client.ip.as_deref(),
    )
    .await;

    if let Err(e) = state
        .mailer
        .send_security_alert(
            &user.email,
            &anomaly.anomaly_type,
            &anomaly.description,
            client.ip.as_deref(),
        )
        .await
    {
        tracing::error!("Security alert email to {} failed: {:?}", user.email, e);
        activity_logger::log(
            &state.pool,
            ActivityAction::EmailSendFailed,
            Some(user.id),
            json!({ "purpose": "security_alert" }),
            client.ip.as_deref(),
        )
        .await;
    }
}

/// Percentage of resolved anomalies, rounded to two decimals.
pub fn resolution_rate(total: i64, unresolved: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let rate = (total - unresolved) as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

fn clamp_days(days: Option<i64>) -> i64 {
    days.filter(|d| *d >= 1)
        .unwrap_or(DEFAULT_DASHBOARD_DAYS)
        .min(MAX_DASHBOARD_DAYS)
}

/// Aggregate view for the admin security dashboard.
pub async fn dashboard(pool: &DbPool, days: Option<i64>) -> Result<SecurityDashboard, AppError> {
    let days = clamp_days(days);
    let days_param = days as i32;

    let (total, unresolved, high): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE NOT resolved),
            COUNT(*) FILTER (WHERE severity IN ('HIGH', 'CRITICAL'))
        FROM security_anomalies
        WHERE created_at > NOW() - make_interval(days => $1)
        "#,
    )
    .bind(days_param)
    .fetch_one(pool)
    .await?;

    let anomalies_by_type = sqlx::query_as::<_, LabelCount>(
        r#"
        SELECT anomaly_type AS label, COUNT(*) AS count
        FROM security_anomalies
        WHERE created_at > NOW() - make_interval(days => $1)
        GROUP BY anomaly_type
        ORDER BY count DESC
        "#,
    )
    .bind(days_param)
    .fetch_all(pool)
    .await?;

    let anomalies_by_severity = sqlx::query_as::<_, LabelCount>(
        r#"
        SELECT severity AS label, COUNT(*) AS count
        FROM security_anomalies
        WHERE created_at > NOW() - make_interval(days => $1)
        GROUP BY severity
        ORDER BY count DESC
        "#,
    )
    .bind(days_param)
    .fetch_all(pool)
    .await?;

    let activity_by_action = sqlx::query_as::<_, LabelCount>(
        r#"
        SELECT action AS label, COUNT(*) AS count
        FROM activity_logs
        WHERE created_at > NOW() - make_interval(days => $1)
        GROUP BY action
        ORDER BY count DESC
        "#,
    )
    .bind(days_param)
    .fetch_all(pool)
    .await?;

    let threat_sources = sqlx::query_as::<_, LabelCount>(
        r#"
        SELECT ip_address AS label, COUNT(*) AS count
        FROM activity_logs
        WHERE created_at > NOW() - make_interval(days => $1)
          AND action IN ('LOGIN_FAILED', 'OTP_FAILED_INVALID', 'OTP_FAILED_EXPIRED')
          AND ip_address IS NOT NULL
        GROUP BY ip_address
        ORDER BY count DESC
        LIMIT 10
        "#,
    )
    .bind(days_param)
    .fetch_all(pool)
    .await?;

    let trends = sqlx::query_as::<_, DailyCount>(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::date AS day, COUNT(*) AS count
        FROM security_anomalies
        WHERE created_at > NOW() - make_interval(days => $1)
        GROUP BY day
        ORDER BY day
        "#,
    )
    .bind(days_param)
    .fetch_all(pool)
    .await?;

    let recent_events = sqlx::query_as::<_, ActivityLog>(
        r#"
        SELECT * FROM activity_logs
        WHERE created_at > NOW() - make_interval(days => $1)
          AND action IN ('SECURITY_ALERT', 'SUSPICIOUS_LOGIN')
        ORDER BY created_at DESC
        LIMIT 20
        "#,
    )
    .bind(days_param)
    .fetch_all(pool)
    .await?;

    Ok(SecurityDashboard {
        days,
        summary: DashboardSummary {
            total_anomalies: total,
            unresolved_anomalies: unresolved,
            high_severity_count: high,
            resolution_rate: resolution_rate(total, unresolved),
        },
        anomalies_by_type,
        anomalies_by_severity,
        activity_by_action,
        threat_sources,
        trends,
        recent_events,
        generated_at: Utc::now(),
    })
}

fn push_anomaly_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &AnomalyQuery) {
    builder.push(" WHERE TRUE");

    if let Some(severity) = query.severity {
        builder.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(anomaly_type) = &query.anomaly_type {
        builder
            .push(" AND anomaly_type = ")
            .push_bind(anomaly_type.to_ascii_uppercase());
    }
    if let Some(resolved) = query.resolved {
        builder.push(" AND resolved = ").push_bind(resolved);
    }
}

/// Anomalies, most severe first, then newest.
pub async fn list_anomalies(
    pool: &DbPool,
    query: &AnomalyQuery,
) -> Result<Paginated<SecurityAnomaly>, AppError> {
    let window = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve(50, 100);

    let mut data_builder = QueryBuilder::new("SELECT * FROM security_anomalies");
    push_anomaly_filters(&mut data_builder, query);
    data_builder
        .push(
            " ORDER BY CASE severity WHEN 'CRITICAL' THEN 0 WHEN 'HIGH' THEN 1 \
             WHEN 'MEDIUM' THEN 2 ELSE 3 END, created_at DESC LIMIT ",
        )
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let data = data_builder
        .build_query_as::<SecurityAnomaly>()
        .fetch_all(pool)
        .await?;

    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM security_anomalies");
    push_anomaly_filters(&mut count_builder, query);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    Ok(Paginated {
        data,
        pagination: window.with_total(total),
    })
}

/// Mark an anomaly resolved.
///
/// # Errors
///
/// - `NotFound` when no anomaly has this id
/// - `Conflict` when it was already resolved
pub async fn resolve(
    pool: &DbPool,
    anomaly_id: Uuid,
    admin_id: Uuid,
    resolution: Option<String>,
) -> Result<SecurityAnomaly, AppError> {
    let updated = sqlx::query_as::<_, SecurityAnomaly>(
        r#"
        UPDATE security_anomalies
        SET resolved = TRUE, resolved_at = NOW(), resolved_by = $2, resolution = $3
        WHERE id = $1 AND NOT resolved
        RETURNING *
        "#,
    )
    .bind(anomaly_id)
    .bind(admin_id)
    .bind(resolution.as_deref().map(str::trim).filter(|r| !r.is_empty()))
    .fetch_optional(pool)
    .await?;

    if let Some(anomaly) = updated {
        return Ok(anomaly);
    }

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM security_anomalies WHERE id = $1)")
            .bind(anomaly_id)
            .fetch_one(pool)
            .await?;

    if exists {
        Err(AppError::Conflict("Anomaly is already resolved".to_string()))
    } else {
        Err(AppError::NotFound("Anomaly"))
    }
}

fn push_activity_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ActivityQuery) {
    builder
        .push(" WHERE created_at > NOW() - make_interval(days => ")
        .push_bind(clamp_days(query.days.or(Some(7))) as i32)
        .push(")");

    if let Some(action) = &query.action {
        builder
            .push(" AND action = ")
            .push_bind(action.to_ascii_uppercase());
    }
    if let Some(user_id) = query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
}

/// Activity log entries for the admin view, newest first.
pub async fn list_activity(
    pool: &DbPool,
    query: &ActivityQuery,
) -> Result<Paginated<ActivityLog>, AppError> {
    let window = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve(100, 500);

    let mut data_builder = QueryBuilder::new("SELECT * FROM activity_logs");
    push_activity_filters(&mut data_builder, query);
    data_builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let data = data_builder
        .build_query_as::<ActivityLog>()
        .fetch_all(pool)
        .await?;

    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM activity_logs");
    push_activity_filters(&mut count_builder, query);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    Ok(Paginated {
        data,
        pagination: window.with_total(total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, 30, 0).unwrap()
    }

    fn types(found: &[DetectedAnomaly]) -> Vec<&str> {
        found.iter().map(|a| a.anomaly_type.as_str()).collect()
    }

    #[test]
    fn night_hours_are_unusual() {
        for hour in [23, 0, 3, 5] {
            assert!(is_unusual_hour(hour), "{hour} should be unusual");
        }
        for hour in [6, 9, 14, 22] {
            assert!(!is_unusual_hour(hour), "{hour} should be normal");
        }
    }

    #[test]
    fn third_failed_login_is_high() {
        let signals = LoginSignals {
            failed_logins: 3,
            ..Default::default()
        };
        let found = evaluate_rules(LoginEvent::LoginFailed, signals, at_hour(10));
        assert_eq!(types(&found), vec![kinds::MULTIPLE_FAILED_LOGINS]);
        assert_eq!(found[0].severity, Severity::High);

        let signals = LoginSignals {
            failed_logins: 2,
            ..Default::default()
        };
        assert!(evaluate_rules(LoginEvent::LoginFailed, signals, at_hour(10)).is_empty());
    }

    #[test]
    fn fifth_otp_failure_is_brute_force() {
        let signals = LoginSignals {
            otp_failures: 5,
            ..Default::default()
        };
        let found = evaluate_rules(LoginEvent::OtpFailed, signals, at_hour(2));
        // Unusual hours apply to password logins only
        assert_eq!(types(&found), vec![kinds::BRUTE_FORCE]);
    }

    #[test]
    fn late_login_is_flagged_medium() {
        let found = evaluate_rules(
            LoginEvent::LoginSucceeded,
            LoginSignals {
                recent_successes: 1,
                ..Default::default()
            },
            at_hour(23),
        );
        assert_eq!(types(&found), vec![kinds::UNUSUAL_ACCESS_TIME]);
        assert_eq!(found[0].severity, Severity::Medium);
    }

    #[test]
    fn concurrent_sessions_need_two_others() {
        let signals = LoginSignals {
            recent_successes: 2,
            ..Default::default()
        };
        assert!(evaluate_rules(LoginEvent::LoginSucceeded, signals, at_hour(12)).is_empty());

        let signals = LoginSignals {
            recent_successes: 3,
            ..Default::default()
        };
        let found = evaluate_rules(LoginEvent::LoginSucceeded, signals, at_hour(12));
        assert_eq!(types(&found), vec![kinds::MULTIPLE_SESSIONS]);
    }

    #[test]
    fn resolution_rate_handles_empty_window() {
        assert_eq!(resolution_rate(0, 0), 0.0);
        assert_eq!(resolution_rate(4, 1), 75.0);
        assert_eq!(resolution_rate(3, 2), 33.33);
    }

    #[test]
    fn dashboard_days_are_clamped() {
        assert_eq!(clamp_days(None), 30);
        assert_eq!(clamp_days(Some(0)), 30);
        assert_eq!(clamp_days(Some(7)), 7);
        assert_eq!(clamp_days(Some(10_000)), 365);
    }
}
