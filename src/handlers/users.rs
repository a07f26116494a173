//! User profile and admin user management handlers.
//!
//! - GET/PATCH /api/users/profile - The caller's own profile
//! - GET /api/users/{id} - Self or admin
//! - GET/POST /api/users, PATCH/DELETE /api/users/{id} - Admin only

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
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
        pagination::Paginated,
        user::{
            AdminUpdateUserRequest, CreateUserRequest, UpdateProfileRequest, UserListQuery,
            UserResponse,
        },
    },
    services::{
        activity_logger,
        auth_service::{self, NewUser},
        user_service,
    },
};

/// `GET /api/users/profile`
pub async fn get_profile(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(auth_service::find_by_id(&pool, auth.user_id).await?.into()))
}

/// Update the caller's profile. Absent fields are left unchanged.
///
/// # Endpoint
///
/// `PATCH /api/users/profile`
///
/// # Request Body
///
/// ```json
/// { "first_name": "Aina", "phone": "+60123456789", "profile_picture": "https://..." }
/// ```
pub async fn update_profile(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::update_profile(&pool, auth.user_id, request).await?;

    activity_logger::log(
        &pool,
        ActivityAction::ProfileUpdated,
        Some(auth.user_id),
        json!({}),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(user.into()))
}

/// `GET /api/users/{id}`: callers may read themselves; admins anyone.
pub async fn get_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    if auth.user_id != user_id && !auth.is_admin() {
        return Err(AppError::Forbidden(
            "You can only view your own account".to_string(),
        ));
    }

    Ok(Json(auth_service::find_by_id(&pool, user_id).await?.into()))
}

/// `GET /api/users?page=&limit=&role=&search=` (admin)
pub async fn list_users(
    State(pool): State<DbPool>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Paginated<UserResponse>>, AppError> {
    Ok(Json(user_service::list_users(&pool, &query).await?))
}

/// `POST /api/users` (admin)
pub async fn create_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = auth_service::create_user(
        &pool,
        NewUser {
            email: request.email,
            password: request.password,
            first_name: request.first_name,
            last_name: request.last_name,
            date_of_birth: None,
            phone: request.phone,
            role: request.role,
        },
    )
    .await?;

    activity_logger::log(
        &pool,
        ActivityAction::UserCreated,
        Some(auth.user_id),
        json!({ "created_user_id": user.id, "role": user.role }),
        client.ip.as_deref(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// `PATCH /api/users/{id}` (admin)
pub async fn update_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(user_id): Path<Uuid>,
    Json(request): Json<AdminUpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::admin_update(&pool, user_id, request).await?;

    activity_logger::log(
        &pool,
        ActivityAction::UserUpdated,
        Some(auth.user_id),
        json!({ "target_user_id": user_id, "role": user.role, "is_active": user.is_active }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(user.into()))
}

/// `DELETE /api/users/{id}` (admin): deactivates and signs the user out.
pub async fn delete_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let revoked = user_service::deactivate(&pool, auth.user_id, user_id).await?;

    activity_logger::log(
        &pool,
        ActivityAction::UserDeactivated,
        Some(auth.user_id),
        json!({ "target_user_id": user_id, "sessions_revoked": revoked }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(json!({
        "message": "User deactivated",
        "sessions_revoked": revoked
    })))
}
