//! Persistent audit trail.
//!
//! Writes never fail the request that produced them: a failed insert is
//! reported through `tracing` and dropped.

use serde_json::Value;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        activity::{ActivityAction, ActivityLog},
        pagination::{PageQuery, Paginated, DEFAULT_LIMIT, MAX_LIMIT},
    },
};

pub async fn log(
    pool: &DbPool,
    action: ActivityAction,
    user_id: Option<Uuid>,
    details: Value,
    ip_address: Option<&str>,
) {
    let result = sqlx::query(
        "INSERT INTO activity_logs (action, user_id, details, ip_address) VALUES ($1, $2, $3, $4)",
    )
    .bind(action.as_str())
    .bind(user_id)
    .bind(&details)
    .bind(ip_address)
    .execute(pool)
    .await;

    match result {
        Ok(_) => tracing::debug!("Logged {} for {:?}", action, user_id),
        Err(e) => tracing::error!("Failed to record activity {}: {:?}", action, e),
    }
}

/// Number of entries with `action` for a user since `minutes` ago.
pub async fn count_recent(
    pool: &DbPool,
    user_id: Uuid,
    actions: &[ActivityAction],
    minutes: i64,
) -> Result<i64, AppError> {
    let names: Vec<&str> = actions.iter().map(|a| a.as_str()).collect();

    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM activity_logs
        WHERE user_id = $1
          AND action = ANY($2)
          AND created_at > NOW() - make_interval(mins => $3::int)
        "#,
    )
    .bind(user_id)
    .bind(&names)
    .bind(minutes as i32)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Latest entries for one user, newest first.
pub async fn list_for_user(
    pool: &DbPool,
    user_id: Uuid,
    page: PageQuery,
) -> Result<Paginated<ActivityLog>, AppError> {
    let window = page.resolve(DEFAULT_LIMIT, MAX_LIMIT);

    let data = sqlx::query_as::<_, ActivityLog>(
        "SELECT * FROM activity_logs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(window.limit)
    .bind(window.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_logs WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(Paginated {
        data,
        pagination: window.with_total(total),
    })
}
