//! User settings handlers.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        activity::ActivityAction,
        settings::{UpdateSettingsRequest, UserSettings},
    },
    services::{activity_logger, settings_service},
};

/// `GET /api/user-settings/me`
pub async fn my_settings(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserSettings>, AppError> {
    Ok(Json(settings_service::get_or_create(&pool, auth.user_id).await?))
}

/// Update the caller's settings.
///
/// # Endpoint
///
/// `PUT /api/user-settings/me`
///
/// # Request Body
///
/// ```json
/// { "language": "ms", "currency": "MYR", "notifications": { "email": true } }
/// ```
///
/// - **Error (400)**: language not 2 to 5 characters, currency not 3
///   uppercase letters, or a JSON section that is not an object
pub async fn update_my_settings(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<UserSettings>, AppError> {
    let settings = settings_service::update(&pool, auth.user_id, request).await?;

    activity_logger::log(
        &pool,
        ActivityAction::SettingsUpdated,
        Some(auth.user_id),
        json!({}),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(settings))
}

/// `GET /api/user-settings/{user_id}` (admin)
pub async fn get_user_settings(
    State(pool): State<DbPool>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserSettings>, AppError> {
    Ok(Json(settings_service::find(&pool, user_id).await?))
}

/// `DELETE /api/user-settings/{user_id}` (admin)
pub async fn delete_user_settings(
    State(pool): State<DbPool>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    settings_service::delete(&pool, user_id).await?;
    Ok(Json(json!({ "message": "User settings deleted" })))
}
