//! Booking handlers.
//!
//! - POST /api/bookings - Request a booking
//! - GET /api/bookings/my-bookings, GET /api/bookings/owner-bookings
//! - GET /api/bookings/{id}
//! - POST /api/bookings/{id}/approve | reject | cancel
//! - GET /api/bookings/property/{id}/booked-periods - Public calendar

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::{
        activity::ActivityAction,
        booking::{
            BookedPeriod, Booking, BookingAction, BookingListQuery, BookingView,
            CancelBookingRequest, CreateBookingRequest, RejectBookingRequest,
        },
        pagination::Paginated,
    },
    services::{
        activity_logger,
        booking_service::{self, BookingSide},
    },
};

/// Request a booking.
///
/// # Endpoint
///
/// `POST /api/bookings`
///
/// # Response
///
/// - **Success (201 Created)**: the `PENDING` booking
/// - **Error (400)**: invalid dates or amounts, or the caller owns the property
/// - **Error (404)**: property missing or not approved
/// - **Error (409)**: property unavailable or dates already booked
pub async fn create_booking(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = booking_service::create(&pool, &auth, request).await?;

    activity_logger::log(
        &pool,
        ActivityAction::BookingCreated,
        Some(auth.user_id),
        json!({ "booking_id": booking.id, "property_id": booking.property_id }),
        client.ip.as_deref(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// `GET /api/bookings/my-bookings?page=&limit=&status=`
pub async fn my_bookings(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<BookingListQuery>,
) -> Result<Json<Paginated<BookingView>>, AppError> {
    Ok(Json(
        booking_service::list(&pool, BookingSide::Tenant, auth.user_id, &query).await?,
    ))
}

/// `GET /api/bookings/owner-bookings?page=&limit=&status=`
pub async fn owner_bookings(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<BookingListQuery>,
) -> Result<Json<Paginated<BookingView>>, AppError> {
    Ok(Json(
        booking_service::list(&pool, BookingSide::Landlord, auth.user_id, &query).await?,
    ))
}

/// `GET /api/bookings/{id}` (tenant, landlord or admin)
pub async fn get_booking(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    let (view, _) = booking_service::get_for(&pool, &auth, booking_id).await?;
    Ok(Json(view))
}

/// `POST /api/bookings/{id}/approve` (landlord or admin)
pub async fn approve_booking(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking =
        booking_service::apply(&pool, &auth, booking_id, BookingAction::Approve, None).await?;

    activity_logger::log(
        &pool,
        ActivityAction::BookingApproved,
        Some(auth.user_id),
        json!({ "booking_id": booking.id }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(booking))
}

/// `POST /api/bookings/{id}/reject {reason}` (landlord or admin)
pub async fn reject_booking(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<RejectBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    let reason = request.reason.trim().to_string();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest("reason is required".to_string()));
    }

    let booking = booking_service::apply(
        &pool,
        &auth,
        booking_id,
        BookingAction::Reject,
        Some(reason.clone()),
    )
    .await?;

    activity_logger::log(
        &pool,
        ActivityAction::BookingRejected,
        Some(auth.user_id),
        json!({ "booking_id": booking.id, "reason": reason }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(booking))
}

/// Cancel a booking.
///
/// # Endpoint
///
/// `POST /api/bookings/{id}/cancel`
///
/// Tenants may cancel before the start date; landlords and admins at any time.
pub async fn cancel_booking(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(booking_id): Path<Uuid>,
    body: Option<Json<CancelBookingRequest>>,
) -> Result<Json<Booking>, AppError> {
    let reason = body.and_then(|Json(body)| body.reason);
    let booking =
        booking_service::apply(&pool, &auth, booking_id, BookingAction::Cancel, None).await?;

    activity_logger::log(
        &pool,
        ActivityAction::BookingCancelled,
        Some(auth.user_id),
        json!({ "booking_id": booking.id, "reason": reason }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(booking))
}

/// `GET /api/bookings/property/{id}/booked-periods`
pub async fn booked_periods(
    State(pool): State<DbPool>,
    Path(property_id): Path<Uuid>,
) -> Result<Json<Vec<BookedPeriod>>, AppError> {
    Ok(Json(
        booking_service::booked_periods(&pool, property_id).await?,
    ))
}
