//! Reference data used by listing forms.

use axum::{extract::State, Json};

use crate::{
    db::DbPool,
    error::AppError,
    models::property::{Amenity, PropertyType},
    services::property_service,
};

/// `GET /api/property-types`
pub async fn property_types(
    State(pool): State<DbPool>,
) -> Result<Json<Vec<PropertyType>>, AppError> {
    Ok(Json(property_service::list_property_types(&pool).await?))
}

/// `GET /api/amenities`
pub async fn amenities(State(pool): State<DbPool>) -> Result<Json<Vec<Amenity>>, AppError> {
    Ok(Json(property_service::list_amenities(&pool).await?))
}
