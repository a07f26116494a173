//! Security monitoring handlers (admin only).
//!
//! - GET /api/security-monitoring/dashboard?days=
//! - GET /api/security-monitoring/anomalies?page=&limit=&severity=&type=&resolved=
//! - POST /api/security-monitoring/anomalies/{id}/resolve
//! - GET /api/security-monitoring/activity?page=&limit=&days=&action=&user_id=

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        activity::{ActivityAction, ActivityLog, ActivityQuery},
        anomaly::{AnomalyQuery, DashboardQuery, ResolveAnomalyRequest, SecurityAnomaly, SecurityDashboard},
        pagination::Paginated,
    },
    services::{activity_logger, anomaly_service},
};

/// Summary of anomalies and activity over the last `days` (default 30).
///
/// # Endpoint
///
/// `GET /api/security-monitoring/dashboard?days=30`
///
/// # Response
///
/// Summary counts with resolution rate, anomalies by type and severity,
/// activity by action, top failing IPs, a daily trend and recent alerts.
pub async fn dashboard(
    State(pool): State<DbPool>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<SecurityDashboard>, AppError> {
    Ok(Json(anomaly_service::dashboard(&pool, query.days).await?))
}

/// Anomalies ordered CRITICAL first, then newest.
pub async fn anomalies(
    State(pool): State<DbPool>,
    Query(query): Query<AnomalyQuery>,
) -> Result<Json<Paginated<SecurityAnomaly>>, AppError> {
    Ok(Json(anomaly_service::list_anomalies(&pool, &query).await?))
}

/// `POST /api/security-monitoring/anomalies/{id}/resolve`
///
/// 404 when missing, 409 when already resolved.
pub async fn resolve_anomaly(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(anomaly_id): Path<Uuid>,
    body: Option<Json<ResolveAnomalyRequest>>,
) -> Result<Json<SecurityAnomaly>, AppError> {
    let resolution = body.and_then(|Json(body)| body.resolution);
    let anomaly = anomaly_service::resolve(&pool, anomaly_id, auth.user_id, resolution).await?;

    activity_logger::log(
        &pool,
        ActivityAction::AnomalyResolved,
        Some(auth.user_id),
        json!({ "anomaly_id": anomaly_id, "type": anomaly.anomaly_type }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(anomaly))
}

pub async fn activity(
    State(pool): State<DbPool>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Paginated<ActivityLog>>, AppError> {
    Ok(Json(anomaly_service::list_activity(&pool, &query).await?))
}
