//! User settings storage. A row is created with defaults on first read.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::settings::{
        UpdateSettingsRequest, UserSettings, DEFAULT_CURRENCY, DEFAULT_LANGUAGE, DEFAULT_TIMEZONE,
    },
};

pub async fn get_or_create(pool: &DbPool, user_id: Uuid) -> Result<UserSettings, AppError> {
    sqlx::query(
        r#"
        INSERT INTO user_settings (user_id, language, currency, timezone)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(DEFAULT_LANGUAGE)
    .bind(DEFAULT_CURRENCY)
    .bind(DEFAULT_TIMEZONE)
    .execute(pool)
    .await?;

    let settings =
        sqlx::query_as::<_, UserSettings>("SELECT * FROM user_settings WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

    Ok(settings)
}

/// Partial upsert; unspecified fields keep their stored or default values.
pub async fn update(
    pool: &DbPool,
    user_id: Uuid,
    request: UpdateSettingsRequest,
) -> Result<UserSettings, AppError> {
    request.validate()?;

    let settings = sqlx::query_as::<_, UserSettings>(
        r#"
        INSERT INTO user_settings (user_id, language, currency, timezone, notifications, privacy, preferences)
        VALUES (
            $1,
            COALESCE($2, $8),
            COALESCE($3, $9),
            COALESCE($4, $10),
            COALESCE($5, '{}'::jsonb),
            COALESCE($6, '{}'::jsonb),
            COALESCE($7, '{}'::jsonb)
        )
        ON CONFLICT (user_id) DO UPDATE SET
            language = COALESCE($2, user_settings.language),
            currency = COALESCE($3, user_settings.currency),
            timezone = COALESCE($4, user_settings.timezone),
            notifications = COALESCE($5, user_settings.notifications),
            privacy = COALESCE($6, user_settings.privacy),
            preferences = COALESCE($7, user_settings.preferences),
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(request.language.as_deref().map(str::trim))
    .bind(request.currency.as_deref())
    .bind(request.timezone.as_deref().map(str::trim))
    .bind(request.notifications)
    .bind(request.privacy)
    .bind(request.preferences)
    .bind(DEFAULT_LANGUAGE)
    .bind(DEFAULT_CURRENCY)
    .bind(DEFAULT_TIMEZONE)
    .fetch_one(pool)
    .await?;

    Ok(settings)
}

/// Settings of any user. 404 when the user has none yet.
pub async fn find(pool: &DbPool, user_id: Uuid) -> Result<UserSettings, AppError> {
    sqlx::query_as::<_, UserSettings>("SELECT * FROM user_settings WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User settings"))
}

pub async fn delete(pool: &DbPool, user_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM user_settings WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User settings"));
    }
    Ok(())
}
