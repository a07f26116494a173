//! Profile edits and admin account management.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::{contains_pattern, DbPool},
    error::AppError,
    models::{
        pagination::{PageQuery, Paginated, DEFAULT_LIMIT, MAX_LIMIT},
        user::{
            required_name, validate_http_url, AdminUpdateUserRequest, UpdateProfileRequest, User,
            UserListQuery, UserResponse,
        },
    },
    services::{auth_service::find_by_id, token_service},
};

/// Apply a partial profile update. `name` follows the first and last name.
pub async fn update_profile(
    pool: &DbPool,
    user_id: Uuid,
    request: UpdateProfileRequest,
) -> Result<User, AppError> {
    let current = find_by_id(pool, user_id).await?;

    let first_name = match request.first_name.as_deref() {
        Some(value) => required_name(value, "first_name")?,
        None => current.first_name,
    };
    let last_name = match request.last_name.as_deref() {
        Some(value) => required_name(value, "last_name")?,
        None => current.last_name,
    };
    if let Some(picture) = request.profile_picture.as_deref() {
        validate_http_url(picture, "profile_picture")?;
    }

    let phone = match request.phone {
        Some(phone) => Some(phone.trim().to_string()).filter(|p| !p.is_empty()),
        None => current.phone,
    };

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET first_name = $1,
            last_name = $2,
            name = $3,
            phone = $4,
            date_of_birth = $5,
            profile_picture = $6,
            updated_at = NOW()
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(&first_name)
    .bind(&last_name)
    .bind(format!("{first_name} {last_name}"))
    .bind(phone)
    .bind(request.date_of_birth.or(current.date_of_birth))
    .bind(request.profile_picture.or(current.profile_picture))
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &UserListQuery) {
    builder.push(" WHERE TRUE");

    if let Some(role) = query.role {
        builder.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        builder
            .push(" AND (email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list_users(
    pool: &DbPool,
    query: &UserListQuery,
) -> Result<Paginated<UserResponse>, AppError> {
    let window = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve(DEFAULT_LIMIT, MAX_LIMIT);

    let mut data_builder = QueryBuilder::new("SELECT * FROM users");
    push_user_filters(&mut data_builder, query);
    data_builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let users = data_builder
        .build_query_as::<User>()
        .fetch_all(pool)
        .await?;

    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM users");
    push_user_filters(&mut count_builder, query);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    Ok(Paginated {
        data: users.into_iter().map(UserResponse::from).collect(),
        pagination: window.with_total(total),
    })
}

/// Admin edit of names, role and active flag.
///
/// Deactivating an account also revokes its sessions.
pub async fn admin_update(
    pool: &DbPool,
    user_id: Uuid,
    request: AdminUpdateUserRequest,
) -> Result<User, AppError> {
    let current = find_by_id(pool, user_id).await?;

    let first_name = match request.first_name.as_deref() {
        Some(value) => required_name(value, "first_name")?,
        None => current.first_name.clone(),
    };
    let last_name = match request.last_name.as_deref() {
        Some(value) => required_name(value, "last_name")?,
        None => current.last_name.clone(),
    };
    let role = request.role.unwrap_or_else(|| current.role());
    let is_active = request.is_active.unwrap_or(current.is_active);

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET first_name = $1, last_name = $2, name = $3, role = $4, is_active = $5,
            updated_at = NOW()
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(&first_name)
    .bind(&last_name)
    .bind(format!("{first_name} {last_name}"))
    .bind(role.as_str())
    .bind(is_active)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    if current.is_active && !user.is_active {
        token_service::revoke_all_sessions(pool, user_id).await?;
    }

    Ok(user)
}

/// Deactivate an account and end its sessions.
///
/// # Errors
///
/// - `InvalidRequest` when an admin targets their own account
/// - `NotFound` when the user does not exist
pub async fn deactivate(pool: &DbPool, admin_id: Uuid, user_id: Uuid) -> Result<u64, AppError> {
    if admin_id == user_id {
        return Err(AppError::InvalidRequest(
            "You cannot delete your own account".to_string(),
        ));
    }

    let result = sqlx::query("UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }

    token_service::revoke_all_sessions(pool, user_id).await
}
