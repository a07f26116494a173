//! Health check and service info endpoints.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check response.
///
/// Returns service status, database connectivity and uptime.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: &'static str,

    /// Database connection status
    pub database: &'static str,

    pub uptime_seconds: u64,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Checks
///
/// - Database connectivity (executes simple query)
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "uptime_seconds": 3600,
///   "timestamp": "2026-10-19T08:00:00Z"
/// }
/// ```
///
/// # Response (503 Service Unavailable)
///
/// Same shape with `"status": "unhealthy"` and `"database": "disconnected"`.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let connected = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("Health check database query failed: {:?}", e);
            false
        }
    };

    let (status, health, database) = if connected {
        (StatusCode::OK, "healthy", "connected")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "disconnected")
    };

    (
        status,
        Json(HealthResponse {
            status: health,
            database,
            uptime_seconds: state.started_at.elapsed().as_secs(),
            timestamp: Utc::now(),
        }),
    )
}

/// `GET /`
pub async fn service_info() -> Json<Value> {
    Json(json!({
        "name": "Rentverse API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
        "docs": "/api",
    }))
}

/// `GET /api`: the endpoint groups this server exposes.
pub async fn api_index() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "auth": "/api/auth",
            "users": "/api/users",
            "properties": "/api/properties",
            "property_types": "/api/property-types",
            "amenities": "/api/amenities",
            "bookings": "/api/bookings",
            "signatures": "/api/signatures",
            "upload": "/api/upload",
            "user_settings": "/api/user-settings",
            "security_monitoring": "/api/security-monitoring",
            "files": "/api/files/pdfs",
        }
    }))
}
