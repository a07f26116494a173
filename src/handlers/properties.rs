//! Property listing handlers.
//!
//! Public reads sit behind optional authentication so owners and admins can
//! see their own unapproved listings through the same endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        activity::ActivityAction,
        pagination::{PageQuery, Paginated},
        property::{
            ApprovePropertyRequest, CreatePropertyRequest, FeaturedQuery, GeoJsonQuery, Property,
            PropertyApproval, PropertyDetail, PropertyListing, PropertySearchQuery,
            PropertyStatus, RejectPropertyRequest, UpdatePropertyRequest,
        },
    },
    services::{
        activity_logger,
        property_service::{self, OwnerProperties, Removal},
    },
};

/// `GET /api/properties?page=&limit=&type=&city=&available=&min_price=&max_price=&bedrooms=&search=`
pub async fn search(
    State(pool): State<DbPool>,
    Query(query): Query<PropertySearchQuery>,
) -> Result<Json<Paginated<PropertyListing>>, AppError> {
    Ok(Json(property_service::search(&pool, &query).await?))
}

/// `GET /api/properties/featured?limit=`
pub async fn featured(
    State(pool): State<DbPool>,
    Query(query): Query<FeaturedQuery>,
) -> Result<Json<Vec<PropertyListing>>, AppError> {
    Ok(Json(property_service::featured(&pool, query.limit).await?))
}

/// Map view of approved listings.
///
/// # Endpoint
///
/// `GET /api/properties/geojson?bbox=minLng,minLat,maxLng,maxLat&limit=&search=`
///
/// # Response
///
/// A GeoJSON `FeatureCollection` of point features, cheapest first.
pub async fn geojson(
    State(pool): State<DbPool>,
    Query(query): Query<GeoJsonQuery>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(property_service::geojson(&pool, &query).await?))
}

/// `GET /api/properties/property/{code}`
pub async fn get_by_code(
    State(pool): State<DbPool>,
    Path(code): Path<String>,
) -> Result<Json<PropertyDetail>, AppError> {
    Ok(Json(property_service::get_by_code(&pool, &code).await?))
}

/// `GET /api/properties/{id}`
///
/// Listings that are not approved answer 404 unless the caller owns them
/// or is an admin.
pub async fn get_property(
    State(pool): State<DbPool>,
    auth: Option<Extension<AuthContext>>,
    Path(property_id): Path<Uuid>,
) -> Result<Json<PropertyDetail>, AppError> {
    let viewer = auth.as_ref().map(|Extension(auth)| auth);
    Ok(Json(
        property_service::get_visible(&pool, property_id, viewer).await?,
    ))
}

/// `POST /api/properties/{id}/view`
pub async fn record_view(
    State(pool): State<DbPool>,
    auth: Option<Extension<AuthContext>>,
    client: ClientInfo,
    Path(property_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let viewer_id = auth.map(|Extension(auth)| auth.user_id);
    let view_count =
        property_service::record_view(&pool, property_id, viewer_id, client.ip.as_deref()).await?;

    Ok(Json(json!({ "view_count": view_count })))
}

/// Create a listing.
///
/// # Endpoint
///
/// `POST /api/properties`
///
/// # Response
///
/// - **Success (201 Created)**: the listing with its amenities. Status is
///   `APPROVED` for admins or when auto-approve is on, `PENDING_REVIEW` otherwise.
/// - **Error (400)**: invalid fields, unknown property type or amenity
pub async fn create_property(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<CreatePropertyRequest>,
) -> Result<(StatusCode, Json<PropertyDetail>), AppError> {
    let detail = property_service::create(&pool, &auth, request).await?;

    activity_logger::log(
        &pool,
        ActivityAction::PropertyCreated,
        Some(auth.user_id),
        json!({
            "property_id": detail.listing.property.id,
            "code": detail.listing.property.code,
            "status": detail.listing.property.status,
        }),
        client.ip.as_deref(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(detail)))
}

/// `PUT /api/properties/{id}` (owner or admin)
pub async fn update_property(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(property_id): Path<Uuid>,
    Json(request): Json<UpdatePropertyRequest>,
) -> Result<Json<PropertyDetail>, AppError> {
    let detail = property_service::update(&pool, &auth, property_id, request).await?;

    activity_logger::log(
        &pool,
        ActivityAction::PropertyUpdated,
        Some(auth.user_id),
        json!({ "property_id": property_id, "status": detail.listing.property.status }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(detail))
}

/// `DELETE /api/properties/{id}` (owner or admin)
///
/// Answers 409 while pending or approved bookings have not ended.
pub async fn delete_property(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(property_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let removal = property_service::delete(&pool, &auth, property_id).await?;

    activity_logger::log(
        &pool,
        ActivityAction::PropertyDeleted,
        Some(auth.user_id),
        json!({ "property_id": property_id, "removal": removal }),
        client.ip.as_deref(),
    )
    .await;

    let message = match removal {
        Removal::Deleted => "Property deleted",
        Removal::Archived => "Property archived, its booking history is kept",
    };
    Ok(Json(json!({ "message": message, "removal": removal })))
}

/// `GET /api/properties/my-properties`
pub async fn my_properties(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<OwnerProperties>, AppError> {
    Ok(Json(property_service::my_properties(&pool, auth.user_id).await?))
}

/// `GET /api/properties/favorites?page=&limit=`
pub async fn favorites(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paginated<PropertyListing>>, AppError> {
    Ok(Json(
        property_service::favorites(&pool, auth.user_id, page).await?,
    ))
}

/// `POST /api/properties/{id}/favorite` toggles the favorite.
pub async fn toggle_favorite(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(property_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let is_favorited = property_service::toggle_favorite(&pool, auth.user_id, property_id).await?;
    let favorite_count = property_service::favorite_count(&pool, property_id).await?;

    Ok(Json(json!({
        "is_favorited": is_favorited,
        "favorite_count": favorite_count
    })))
}

/// `GET /api/properties/{id}/favorite-status`
pub async fn favorite_status(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(property_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let is_favorited = property_service::is_favorite(&pool, auth.user_id, property_id).await?;
    let favorite_count = property_service::favorite_count(&pool, property_id).await?;

    Ok(Json(json!({
        "is_favorited": is_favorited,
        "favorite_count": favorite_count
    })))
}

/// `GET /api/properties/pending-approval?page=&limit=` (admin)
pub async fn pending_approval(
    State(pool): State<DbPool>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paginated<PropertyListing>>, AppError> {
    Ok(Json(property_service::pending_review(&pool, page).await?))
}

/// Approve a listing under review.
///
/// # Endpoint
///
/// `POST /api/properties/{id}/approve` (admin)
///
/// # Response
///
/// - **Success (200 OK)**: the updated listing
/// - **Error (409)**: the listing is not `PENDING_REVIEW`
pub async fn approve_property(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(property_id): Path<Uuid>,
    body: Option<Json<ApprovePropertyRequest>>,
) -> Result<Json<Property>, AppError> {
    let notes = body.and_then(|Json(body)| body.notes);
    let property = property_service::review(
        &pool,
        auth.user_id,
        property_id,
        PropertyStatus::Approved,
        notes,
    )
    .await?;

    activity_logger::log(
        &pool,
        ActivityAction::PropertyApproved,
        Some(auth.user_id),
        json!({ "property_id": property_id }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(property))
}

/// `POST /api/properties/{id}/reject {reason}` (admin)
pub async fn reject_property(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(property_id): Path<Uuid>,
    Json(request): Json<RejectPropertyRequest>,
) -> Result<Json<Property>, AppError> {
    let reason = request.reason.trim().to_string();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest("reason is required".to_string()));
    }

    let property = property_service::review(
        &pool,
        auth.user_id,
        property_id,
        PropertyStatus::Rejected,
        Some(reason.clone()),
    )
    .await?;

    activity_logger::log(
        &pool,
        ActivityAction::PropertyRejected,
        Some(auth.user_id),
        json!({ "property_id": property_id, "reason": reason }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(property))
}

/// `GET /api/properties/{id}/approval-history` (owner or admin)
pub async fn approval_history(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(property_id): Path<Uuid>,
) -> Result<Json<Vec<PropertyApproval>>, AppError> {
    Ok(Json(
        property_service::approval_history(&pool, &auth, property_id).await?,
    ))
}

/// `GET /api/properties/auto-approve/status` (admin)
pub async fn auto_approve_status(State(pool): State<DbPool>) -> Result<Json<Value>, AppError> {
    let enabled = property_service::auto_approve_enabled(&pool).await?;
    Ok(Json(json!({ "enabled": enabled })))
}

#[derive(Debug, Deserialize)]
pub struct ToggleAutoApproveRequest {
    /// Explicit value; omitted flips the current setting.
    pub enabled: Option<bool>,
}

/// `POST /api/properties/auto-approve/toggle` (admin)
pub async fn toggle_auto_approve(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    body: Option<Json<ToggleAutoApproveRequest>>,
) -> Result<Json<Value>, AppError> {
    let requested = body.and_then(|Json(body)| body.enabled);
    let enabled = match requested {
        Some(enabled) => enabled,
        None => !property_service::auto_approve_enabled(&pool).await?,
    };

    let enabled = property_service::set_auto_approve(&pool, enabled, auth.user_id).await?;

    activity_logger::log(
        &pool,
        ActivityAction::AutoApproveToggled,
        Some(auth.user_id),
        json!({ "enabled": enabled }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(json!({ "enabled": enabled })))
}
