//! Booking service.
//!
//! # Consistency
//!
//! Two approved bookings of the same property never overlap. Creation checks
//! this optimistically; approval re-checks it while holding a row lock on the
//! property, so concurrent approvals for one property run one at a time.

use chrono::Utc;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        booking::{
            transition, BookedPeriod, Booking, BookingAction, BookingListQuery, BookingParty,
            BookingStatus, BookingView, CreateBookingRequest,
        },
        pagination::{PageQuery, Paginated, DEFAULT_LIMIT, MAX_LIMIT},
        property::PropertyStatus,
    },
    services::property_service,
};

const VIEW_SELECT: &str = r#"
    SELECT b.*,
           p.code AS property_code, p.title AS property_title,
           p.address AS property_address, p.city AS property_city,
           t.name AS tenant_name, t.email AS tenant_email,
           l.name AS landlord_name, l.email AS landlord_email
    FROM bookings b
    JOIN properties p ON p.id = b.property_id
    JOIN users t ON t.id = b.tenant_id
    JOIN users l ON l.id = b.landlord_id
"#;

/// Whether `[$2, $3)` intersects an approved booking of property `$1`,
/// ignoring booking `$4`. A stay may start the instant another ends.
const OVERLAP_SQL: &str = r#"
    SELECT EXISTS(
        SELECT 1 FROM bookings
        WHERE property_id = $1
          AND status = 'APPROVED'
          AND start_date < $3
          AND end_date > $2
          AND id <> $4
    )
"#;

/// Create a pending booking for the caller.
///
/// # Errors
///
/// - `InvalidRequest`: bad dates, notes or amounts, or booking one's own property
/// - `NotFound`: the property does not exist or is not approved
/// - `Conflict`: the property is unavailable or the period is already taken
pub async fn create(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateBookingRequest,
) -> Result<Booking, AppError> {
    request.validate(Utc::now())?;

    let property = property_service::find(pool, request.property_id).await?;
    if property.status() != PropertyStatus::Approved {
        return Err(AppError::NotFound("Property"));
    }
    if !property.is_available {
        return Err(AppError::Conflict(
            "Property is not available for booking".to_string(),
        ));
    }
    if property.owner_id == auth.user_id {
        return Err(AppError::InvalidRequest(
            "You cannot book your own property".to_string(),
        ));
    }

    let overlapping: bool = sqlx::query_scalar(OVERLAP_SQL)
        .bind(property.id)
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(Uuid::nil())
        .fetch_one(pool)
        .await?;

    if overlapping {
        return Err(AppError::Conflict(
            "Property is already booked for these dates".to_string(),
        ));
    }

    let notes = request
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let booking = sqlx::query_as::<_, Booking>(
        r#"
        INSERT INTO bookings (
            property_id, tenant_id, landlord_id, start_date, end_date,
            rent_cents, security_deposit_cents, currency_code, notes, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING')
        RETURNING *
        "#,
    )
    .bind(property.id)
    .bind(auth.user_id)
    .bind(property.owner_id)
    .bind(request.start_date)
    .bind(request.end_date)
    .bind(request.rent_cents.unwrap_or(property.price_cents))
    .bind(request.security_deposit_cents)
    .bind(&property.currency_code)
    .bind(notes)
    .fetch_one(pool)
    .await?;

    tracing::info!(
        "Booking {} created for property {} by {}",
        booking.id,
        property.id,
        auth.user_id
    );

    Ok(booking)
}

/// Approve, reject or cancel a booking.
///
/// `reason` is stored for rejections.
pub async fn apply(
    pool: &DbPool,
    auth: &AuthContext,
    booking_id: Uuid,
    action: BookingAction,
    reason: Option<String>,
) -> Result<Booking, AppError> {
    let mut tx = pool.begin().await?;

    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Booking"))?;

    let party = BookingParty::of(&booking, auth).ok_or_else(|| {
        AppError::Forbidden("You are not a party to this booking".to_string())
    })?;

    let next = transition(
        booking.status(),
        action,
        party,
        booking.start_date,
        Utc::now(),
    )?;

    if action == BookingAction::Approve {
        // Serializes approvals of the same property
        sqlx::query("SELECT id FROM properties WHERE id = $1 FOR UPDATE")
            .bind(booking.property_id)
            .execute(&mut *tx)
            .await?;

        let overlapping: bool = sqlx::query_scalar(OVERLAP_SQL)
            .bind(booking.property_id)
            .bind(booking.start_date)
            .bind(booking.end_date)
            .bind(booking.id)
            .fetch_one(&mut *tx)
            .await?;

        if overlapping {
            tx.rollback().await?;
            return Err(AppError::Conflict(
                "Another approved booking overlaps these dates".to_string(),
            ));
        }
    }

    let rejection_reason = match action {
        BookingAction::Reject => reason,
        _ => booking.rejection_reason.clone(),
    };

    let updated = sqlx::query_as::<_, Booking>(
        r#"
        UPDATE bookings
        SET status = $1, rejection_reason = $2, updated_at = NOW()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(next.as_str())
    .bind(rejection_reason)
    .bind(booking.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Booking {} moved from {} to {} by {}",
        booking.id,
        booking.status(),
        next,
        auth.user_id
    );

    Ok(updated)
}

/// A booking the caller is a party to (or any booking for admins).
pub async fn get_for(
    pool: &DbPool,
    auth: &AuthContext,
    booking_id: Uuid,
) -> Result<(BookingView, BookingParty), AppError> {
    let view = sqlx::query_as::<_, BookingView>(&format!("{VIEW_SELECT} WHERE b.id = $1"))
        .bind(booking_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Booking"))?;

    let party = BookingParty::of(&view.booking, auth).ok_or_else(|| {
        AppError::Forbidden("You are not a party to this booking".to_string())
    })?;

    Ok((view, party))
}

/// Which side of the booking a listing is for.
#[derive(Debug, Clone, Copy)]
pub enum BookingSide {
    Tenant,
    Landlord,
}

impl BookingSide {
    fn column(&self) -> &'static str {
        match self {
            BookingSide::Tenant => "b.tenant_id",
            BookingSide::Landlord => "b.landlord_id",
        }
    }
}

fn push_booking_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    side: BookingSide,
    user_id: Uuid,
    status: Option<BookingStatus>,
) {
    builder
        .push(" WHERE ")
        .push(side.column())
        .push(" = ")
        .push_bind(user_id);

    if let Some(status) = status {
        builder.push(" AND b.status = ").push_bind(status.as_str());
    }
}

/// Bookings where the user is the tenant or the landlord, newest first.
pub async fn list(
    pool: &DbPool,
    side: BookingSide,
    user_id: Uuid,
    query: &BookingListQuery,
) -> Result<Paginated<BookingView>, AppError> {
    let window = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve(DEFAULT_LIMIT, MAX_LIMIT);

    let mut data_builder = QueryBuilder::new(VIEW_SELECT);
    push_booking_filters(&mut data_builder, side, user_id, query.status);
    data_builder
        .push(" ORDER BY b.created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let data = data_builder
        .build_query_as::<BookingView>()
        .fetch_all(pool)
        .await?;

    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM bookings b");
    push_booking_filters(&mut count_builder, side, user_id, query.status);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    Ok(Paginated {
        data,
        pagination: window.with_total(total),
    })
}

/// Approved periods of a property that have not ended, earliest first.
pub async fn booked_periods(
    pool: &DbPool,
    property_id: Uuid,
) -> Result<Vec<BookedPeriod>, AppError> {
    property_service::find(pool, property_id).await?;

    let periods = sqlx::query_as::<_, BookedPeriod>(
        r#"
        SELECT start_date, end_date FROM bookings
        WHERE property_id = $1 AND status = 'APPROVED' AND end_date > NOW()
        ORDER BY start_date
        "#,
    )
    .bind(property_id)
    .fetch_all(pool)
    .await?;

    Ok(periods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use chrono::{DateTime, TimeZone};

    const LANDLORD: Uuid = Uuid::from_u128(0x0a);
    const SECOND_TENANT: Uuid = Uuid::from_u128(0x0c);
    const SUNWAY_LOFT: Uuid = Uuid::from_u128(0x101);
    const OVERLAPPING_REQUEST: Uuid = Uuid::from_u128(0x202);
    const FOLLOW_ON_REQUEST: Uuid = Uuid::from_u128(0x203);

    fn auth(user_id: Uuid, role: Role) -> AuthContext {
        AuthContext {
            user_id,
            session_id: Uuid::new_v4(),
            email: "test@rentverse.test".to_string(),
            role,
        }
    }

    fn day(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, month, day, 0, 0, 0).unwrap()
    }

    fn request(start: DateTime<Utc>, end: DateTime<Utc>) -> CreateBookingRequest {
        CreateBookingRequest {
            property_id: SUNWAY_LOFT,
            start_date: start,
            end_date: end,
            rent_cents: None,
            security_deposit_cents: 0,
            notes: None,
        }
    }

    async fn status_of(pool: &DbPool, booking_id: Uuid) -> String {
        sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn stay_may_start_when_approved_stay_ends(pool: DbPool) {
        let tenant = auth(SECOND_TENANT, Role::User);

        let booking = create(&pool, &tenant, request(day(3, 31), day(4, 10)))
            .await
            .unwrap();

        assert_eq!(booking.status(), BookingStatus::Pending);
        assert_eq!(booking.landlord_id, LANDLORD);
        assert_eq!(booking.rent_cents, 250_000);
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn create_refuses_period_overlapping_approved_stay(pool: DbPool) {
        let tenant = auth(SECOND_TENANT, Role::User);

        let result = create(&pool, &tenant, request(day(3, 30), day(4, 5))).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn landlord_cannot_book_own_property(pool: DbPool) {
        let landlord = auth(LANDLORD, Role::Landlord);

        let result = create(&pool, &landlord, request(day(6, 1), day(6, 30))).await;

        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn approval_rechecks_overlap(pool: DbPool) {
        let landlord = auth(LANDLORD, Role::Landlord);

        let result = apply(
            &pool,
            &landlord,
            OVERLAPPING_REQUEST,
            BookingAction::Approve,
            None,
        )
        .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(status_of(&pool, OVERLAPPING_REQUEST).await, "PENDING");
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn approval_allows_back_to_back_stays(pool: DbPool) {
        let landlord = auth(LANDLORD, Role::Landlord);

        let booking = apply(
            &pool,
            &landlord,
            FOLLOW_ON_REQUEST,
            BookingAction::Approve,
            None,
        )
        .await
        .unwrap();

        assert_eq!(booking.status(), BookingStatus::Approved);
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn tenant_cannot_approve_own_request(pool: DbPool) {
        let tenant = auth(SECOND_TENANT, Role::User);

        let result = apply(
            &pool,
            &tenant,
            FOLLOW_ON_REQUEST,
            BookingAction::Approve,
            None,
        )
        .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(status_of(&pool, FOLLOW_ON_REQUEST).await, "PENDING");
    }
}
