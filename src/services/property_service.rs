//! Property listing service.
//!
//! This service handles:
//! - Creating and editing listings with review status rules
//! - Public search, featured listings and map (GeoJSON) queries
//! - The admin review queue and the auto-approve switch
//! - Favorites and view counting
//!
//! # Visibility
//!
//! Only `APPROVED` listings appear in public queries. Owners and admins can
//! read their listings in any status.

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::{contains_pattern, DbPool},
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        pagination::{PageQuery, Paginated, DEFAULT_LIMIT, MAX_LIMIT},
        property::{
            generate_code, initial_status, status_after_update, validate_coordinates, Amenity,
            BoundingBox, CreatePropertyRequest, GeoJsonQuery, Property, PropertyApproval,
            PropertyDetail, PropertyListing, PropertySearchQuery, PropertyStatus, PropertyType,
            UpdatePropertyRequest, GEOJSON_DEFAULT_LIMIT, GEOJSON_MAX_LIMIT,
        },
    },
};

const LISTING_SELECT: &str = r#"
    SELECT p.*, pt.code AS type_code, pt.name AS type_name, u.name AS owner_name
    FROM properties p
    JOIN property_types pt ON pt.id = p.property_type_id
    JOIN users u ON u.id = p.owner_id
"#;

const AUTO_APPROVE_KEY: &str = "property_auto_approve";

/// Attempts at finding an unused listing code before giving up.
const CODE_ATTEMPTS: usize = 5;

pub async fn auto_approve_enabled(pool: &DbPool) -> Result<bool, AppError> {
    let value: Option<Value> =
        sqlx::query_scalar("SELECT value FROM system_settings WHERE key = $1")
            .bind(AUTO_APPROVE_KEY)
            .fetch_optional(pool)
            .await?;

    Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
}

pub async fn set_auto_approve(
    pool: &DbPool,
    enabled: bool,
    admin_id: Uuid,
) -> Result<bool, AppError> {
    sqlx::query(
        r#"
        INSERT INTO system_settings (key, value, updated_by, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (key) DO UPDATE
        SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by, updated_at = NOW()
        "#,
    )
    .bind(AUTO_APPROVE_KEY)
    .bind(json!(enabled))
    .bind(admin_id)
    .execute(pool)
    .await?;

    tracing::info!("Property auto-approve set to {} by {}", enabled, admin_id);
    Ok(enabled)
}

pub async fn list_property_types(pool: &DbPool) -> Result<Vec<PropertyType>, AppError> {
    let types = sqlx::query_as::<_, PropertyType>("SELECT * FROM property_types ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(types)
}

pub async fn list_amenities(pool: &DbPool) -> Result<Vec<Amenity>, AppError> {
    let amenities =
        sqlx::query_as::<_, Amenity>("SELECT * FROM amenities ORDER BY category, name")
            .fetch_all(pool)
            .await?;
    Ok(amenities)
}

async fn ensure_type_exists(pool: &DbPool, type_id: Uuid) -> Result<(), AppError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM property_types WHERE id = $1)")
            .bind(type_id)
            .fetch_one(pool)
            .await?;

    if !exists {
        return Err(AppError::InvalidRequest(
            "property_type_id does not exist".to_string(),
        ));
    }
    Ok(())
}

async fn ensure_amenities_exist(pool: &DbPool, amenity_ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
    let mut unique = amenity_ids.to_vec();
    unique.sort();
    unique.dedup();

    if unique.is_empty() {
        return Ok(unique);
    }

    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM amenities WHERE id = ANY($1)")
        .bind(&unique)
        .fetch_one(pool)
        .await?;

    if found != unique.len() as i64 {
        return Err(AppError::InvalidRequest(
            "One or more amenity_ids do not exist".to_string(),
        ));
    }
    Ok(unique)
}

async fn unused_code(pool: &DbPool) -> Result<String, AppError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_code();
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM properties WHERE code = $1)")
            .bind(&code)
            .fetch_one(pool)
            .await?;
        if !taken {
            return Ok(code);
        }
    }
    Err(AppError::Internal(
        "Could not allocate a unique property code".to_string(),
    ))
}

pub async fn find(pool: &DbPool, property_id: Uuid) -> Result<Property, AppError> {
    sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = $1")
        .bind(property_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Property"))
}

async fn find_listing(pool: &DbPool, property_id: Uuid) -> Result<PropertyListing, AppError> {
    sqlx::query_as::<_, PropertyListing>(&format!("{LISTING_SELECT} WHERE p.id = $1"))
        .bind(property_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Property"))
}

async fn amenities_of(pool: &DbPool, property_id: Uuid) -> Result<Vec<Amenity>, AppError> {
    let amenities = sqlx::query_as::<_, Amenity>(
        r#"
        SELECT a.* FROM amenities a
        JOIN property_amenities pa ON pa.amenity_id = a.id
        WHERE pa.property_id = $1
        ORDER BY a.name
        "#,
    )
    .bind(property_id)
    .fetch_all(pool)
    .await?;
    Ok(amenities)
}

async fn detail(pool: &DbPool, listing: PropertyListing) -> Result<PropertyDetail, AppError> {
    let amenities = amenities_of(pool, listing.property.id).await?;
    Ok(PropertyDetail { listing, amenities })
}

fn can_manage(auth: &AuthContext, property: &Property) -> bool {
    auth.is_admin() || property.owner_id == auth.user_id
}

fn ensure_can_manage(auth: &AuthContext, property: &Property) -> Result<(), AppError> {
    if can_manage(auth, property) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only the owner or an admin can change this property".to_string(),
        ))
    }
}

pub async fn create(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreatePropertyRequest,
) -> Result<PropertyDetail, AppError> {
    request.validate()?;
    ensure_type_exists(pool, request.property_type_id).await?;
    let amenity_ids = ensure_amenities_exist(pool, &request.amenity_ids).await?;

    let status = initial_status(auth.is_admin(), auto_approve_enabled(pool).await?);
    let code = unused_code(pool).await?;

    let mut tx = pool.begin().await?;

    let property_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO properties (
            code, title, description, address, city, state, zip_code, country,
            price_cents, currency_code, bedrooms, bathrooms, area_sqm, furnished,
            is_available, images, latitude, longitude, status, owner_id, property_type_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        RETURNING id
        "#,
    )
    .bind(&code)
    .bind(request.title.trim())
    .bind(request.description.as_deref().map(str::trim))
    .bind(request.address.trim())
    .bind(request.city.trim())
    .bind(request.state.trim())
    .bind(request.zip_code.trim())
    .bind(request.country.trim().to_uppercase())
    .bind(request.price_cents)
    .bind(request.currency_code.trim().to_uppercase())
    .bind(request.bedrooms)
    .bind(request.bathrooms)
    .bind(request.area_sqm)
    .bind(request.furnished)
    .bind(request.is_available)
    .bind(&request.images)
    .bind(request.latitude)
    .bind(request.longitude)
    .bind(status.as_str())
    .bind(auth.user_id)
    .bind(request.property_type_id)
    .fetch_one(&mut *tx)
    .await?;

    for amenity_id in &amenity_ids {
        sqlx::query("INSERT INTO property_amenities (property_id, amenity_id) VALUES ($1, $2)")
            .bind(property_id)
            .bind(amenity_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!("Property {} ({}) created as {}", code, property_id, status);
    detail(pool, find_listing(pool, property_id).await?).await
}

/// Single listing. Unapproved listings are visible to their owner and admins only.
pub async fn get_visible(
    pool: &DbPool,
    property_id: Uuid,
    viewer: Option<&AuthContext>,
) -> Result<PropertyDetail, AppError> {
    let listing = find_listing(pool, property_id).await?;

    let visible = listing.property.is_public()
        || viewer.is_some_and(|auth| can_manage(auth, &listing.property));
    if !visible {
        return Err(AppError::NotFound("Property"));
    }

    detail(pool, listing).await
}

pub async fn get_by_code(pool: &DbPool, code: &str) -> Result<PropertyDetail, AppError> {
    let listing = sqlx::query_as::<_, PropertyListing>(&format!(
        "{LISTING_SELECT} WHERE p.code = $1 AND p.status = 'APPROVED'"
    ))
    .bind(code.trim().to_uppercase())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Property"))?;

    detail(pool, listing).await
}

fn push_search_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &PropertySearchQuery) {
    builder.push(" WHERE p.status = 'APPROVED'");

    if let Some(code) = query.property_type.as_deref().filter(|s| !s.is_empty()) {
        builder.push(" AND pt.code = ").push_bind(code.to_uppercase());
    }
    if let Some(city) = query.city.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        builder
            .push(" AND p.city ILIKE ")
            .push_bind(contains_pattern(city));
    }
    if let Some(available) = query.available {
        builder.push(" AND p.is_available = ").push_bind(available);
    }
    if let Some(min_price) = query.min_price {
        builder.push(" AND p.price_cents >= ").push_bind(min_price);
    }
    if let Some(max_price) = query.max_price {
        builder.push(" AND p.price_cents <= ").push_bind(max_price);
    }
    if let Some(bedrooms) = query.bedrooms {
        builder.push(" AND p.bedrooms >= ").push_bind(bedrooms);
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        builder
            .push(" AND (p.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.city ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.address ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Public search over approved listings, newest first.
pub async fn search(
    pool: &DbPool,
    query: &PropertySearchQuery,
) -> Result<Paginated<PropertyListing>, AppError> {
    let window = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve(DEFAULT_LIMIT, MAX_LIMIT);

    let mut data_builder = QueryBuilder::new(LISTING_SELECT);
    push_search_filters(&mut data_builder, query);
    data_builder
        .push(" ORDER BY p.created_at DESC LIMIT ")
        .push_bind(window.limit)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let data = data_builder
        .build_query_as::<PropertyListing>()
        .fetch_all(pool)
        .await?;

    let mut count_builder = QueryBuilder::new(
        "SELECT COUNT(*) FROM properties p JOIN property_types pt ON pt.id = p.property_type_id",
    );
    push_search_filters(&mut count_builder, query);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    Ok(Paginated {
        data,
        pagination: window.with_total(total),
    })
}

/// Most viewed available listings.
pub async fn featured(pool: &DbPool, limit: Option<i64>) -> Result<Vec<PropertyListing>, AppError> {
    let limit = limit.filter(|l| *l >= 1).unwrap_or(8).min(50);

    let listings = sqlx::query_as::<_, PropertyListing>(&format!(
        "{LISTING_SELECT} WHERE p.status = 'APPROVED' AND p.is_available = TRUE \
         ORDER BY p.view_count DESC, p.created_at DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(listings)
}

/// GeoJSON point feature for a listing, `None` without coordinates.
pub fn to_feature(listing: &PropertyListing) -> Option<Value> {
    let property = &listing.property;
    let (lat, lng) = (property.latitude?, property.longitude?);

    Some(json!({
        "type": "Feature",
        "geometry": { "type": "Point", "coordinates": [lng, lat] },
        "properties": {
            "id": property.id,
            "code": property.code,
            "title": property.title,
            "price_cents": property.price_cents,
            "currency_code": property.currency_code,
            "bedrooms": property.bedrooms,
            "bathrooms": property.bathrooms,
            "area_sqm": property.area_sqm,
            "city": property.city,
            "type": listing.type_code,
            "thumbnail": property.images.first(),
        }
    }))
}

/// Approved listings with coordinates inside `bbox`, cheapest first.
pub async fn geojson(pool: &DbPool, query: &GeoJsonQuery) -> Result<Value, AppError> {
    let bbox = query
        .bbox
        .as_deref()
        .map(str::parse::<BoundingBox>)
        .transpose()?;
    let limit = query
        .limit
        .filter(|l| *l >= 1)
        .unwrap_or(GEOJSON_DEFAULT_LIMIT)
        .min(GEOJSON_MAX_LIMIT);

    let mut builder = QueryBuilder::new(LISTING_SELECT);
    builder.push(
        " WHERE p.status = 'APPROVED' AND p.latitude IS NOT NULL AND p.longitude IS NOT NULL",
    );

    if let Some(bbox) = bbox {
        builder
            .push(" AND p.longitude BETWEEN ")
            .push_bind(bbox.min_lng)
            .push(" AND ")
            .push_bind(bbox.max_lng)
            .push(" AND p.latitude BETWEEN ")
            .push_bind(bbox.min_lat)
            .push(" AND ")
            .push_bind(bbox.max_lat);
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        builder
            .push(" AND (p.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.city ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    builder.push(" ORDER BY p.price_cents ASC LIMIT ").push_bind(limit);

    let listings = builder
        .build_query_as::<PropertyListing>()
        .fetch_all(pool)
        .await?;

    let features: Vec<Value> = listings.iter().filter_map(to_feature).collect();

    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
        "total": features.len(),
    }))
}

/// Merged values after applying an update to the current row.
fn merge_update(current: &Property, update: &UpdatePropertyRequest) -> Property {
    let mut merged = current.clone();

    if let Some(title) = &update.title {
        merged.title = title.trim().to_string();
    }
    if let Some(description) = &update.description {
        merged.description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
    }
    if let Some(address) = &update.address {
        merged.address = address.trim().to_string();
    }
    if let Some(city) = &update.city {
        merged.city = city.trim().to_string();
    }
    if let Some(state) = &update.state {
        merged.state = state.trim().to_string();
    }
    if let Some(zip_code) = &update.zip_code {
        merged.zip_code = zip_code.trim().to_string();
    }
    if let Some(country) = &update.country {
        merged.country = country.trim().to_uppercase();
    }
    if let Some(currency) = &update.currency_code {
        merged.currency_code = currency.trim().to_uppercase();
    }
    if let Some(images) = &update.images {
        merged.images = images.clone();
    }
    if let Some(type_id) = update.property_type_id {
        merged.property_type_id = type_id;
    }
    merged.price_cents = update.price_cents.unwrap_or(merged.price_cents);
    merged.bedrooms = update.bedrooms.unwrap_or(merged.bedrooms);
    merged.bathrooms = update.bathrooms.unwrap_or(merged.bathrooms);
    merged.area_sqm = update.area_sqm.unwrap_or(merged.area_sqm);
    merged.furnished = update.furnished.unwrap_or(merged.furnished);
    merged.is_available = update.is_available.unwrap_or(merged.is_available);
    if update.latitude.is_some() || update.longitude.is_some() {
        merged.latitude = update.latitude;
        merged.longitude = update.longitude;
    }

    merged
}

pub async fn update(
    pool: &DbPool,
    auth: &AuthContext,
    property_id: Uuid,
    request: UpdatePropertyRequest,
) -> Result<PropertyDetail, AppError> {
    request.validate()?;

    if let Some(type_id) = request.property_type_id {
        ensure_type_exists(pool, type_id).await?;
    }
    let amenity_ids = match &request.amenity_ids {
        Some(ids) => Some(ensure_amenities_exist(pool, ids).await?),
        None => None,
    };
    let auto_approve = auto_approve_enabled(pool).await?;

    let mut tx = pool.begin().await?;

    // Status is derived from the locked row so a concurrent review is not overwritten
    let current =
        sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = $1 FOR UPDATE")
            .bind(property_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("Property"))?;
    ensure_can_manage(auth, &current)?;

    let merged = merge_update(&current, &request);
    validate_coordinates(merged.latitude, merged.longitude)?;

    let status = status_after_update(
        current.status(),
        auth.is_admin(),
        auto_approve,
        request.changes_content(),
    );

    sqlx::query(
        r#"
        UPDATE properties SET
            title = $1, description = $2, address = $3, city = $4, state = $5,
            zip_code = $6, country = $7, price_cents = $8, currency_code = $9,
            bedrooms = $10, bathrooms = $11, area_sqm = $12, furnished = $13,
            is_available = $14, images = $15, latitude = $16, longitude = $17,
            property_type_id = $18, status = $19, updated_at = NOW()
        WHERE id = $20
        "#,
    )
    .bind(&merged.title)
    .bind(&merged.description)
    .bind(&merged.address)
    .bind(&merged.city)
    .bind(&merged.state)
    .bind(&merged.zip_code)
    .bind(&merged.country)
    .bind(merged.price_cents)
    .bind(&merged.currency_code)
    .bind(merged.bedrooms)
    .bind(merged.bathrooms)
    .bind(merged.area_sqm)
    .bind(merged.furnished)
    .bind(merged.is_available)
    .bind(&merged.images)
    .bind(merged.latitude)
    .bind(merged.longitude)
    .bind(merged.property_type_id)
    .bind(status.as_str())
    .bind(property_id)
    .execute(&mut *tx)
    .await?;

    if let Some(amenity_ids) = amenity_ids {
        sqlx::query("DELETE FROM property_amenities WHERE property_id = $1")
            .bind(property_id)
            .execute(&mut *tx)
            .await?;

        for amenity_id in &amenity_ids {
            sqlx::query("INSERT INTO property_amenities (property_id, amenity_id) VALUES ($1, $2)")
                .bind(property_id)
                .bind(amenity_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    if status != current.status() {
        tracing::info!(
            "Property {} moved from {} to {} after update",
            property_id,
            current.status(),
            status
        );
    }

    detail(pool, find_listing(pool, property_id).await?).await
}

/// Whether removal hard-deleted the row or archived it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    Deleted,
    Archived,
}

/// Remove a listing.
///
/// Refused while pending or approved bookings have not ended. Listings with
/// booking history are archived so the history stays intact.
pub async fn delete(
    pool: &DbPool,
    auth: &AuthContext,
    property_id: Uuid,
) -> Result<Removal, AppError> {
    let mut tx = pool.begin().await?;

    // Same lock booking approval takes, so no booking is approved mid-delete
    let property =
        sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = $1 FOR UPDATE")
            .bind(property_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("Property"))?;
    ensure_can_manage(auth, &property)?;

    let (active, any): (bool, bool) = sqlx::query_as(
        r#"
        SELECT
            EXISTS(SELECT 1 FROM bookings WHERE property_id = $1
                   AND status IN ('PENDING', 'APPROVED') AND end_date > NOW()),
            EXISTS(SELECT 1 FROM bookings WHERE property_id = $1)
        "#,
    )
    .bind(property_id)
    .fetch_one(&mut *tx)
    .await?;

    if active {
        return Err(AppError::Conflict(
            "Property has active bookings and cannot be deleted".to_string(),
        ));
    }

    let removal = if any {
        sqlx::query(
            "UPDATE properties SET status = 'ARCHIVED', is_available = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(property_id)
        .execute(&mut *tx)
        .await?;
        Removal::Archived
    } else {
        sqlx::query("DELETE FROM properties WHERE id = $1")
            .bind(property_id)
            .execute(&mut *tx)
            .await?;
        Removal::Deleted
    };

    tx.commit().await?;

    Ok(removal)
}

/// Count a view of an approved listing. Returns the new total.
pub async fn record_view(
    pool: &DbPool,
    property_id: Uuid,
    viewer_id: Option<Uuid>,
    ip_address: Option<&str>,
) -> Result<i64, AppError> {
    let mut tx = pool.begin().await?;

    let view_count: i64 = sqlx::query_scalar(
        r#"
        UPDATE properties SET view_count = view_count + 1
        WHERE id = $1 AND status = 'APPROVED'
        RETURNING view_count
        "#,
    )
    .bind(property_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Property"))?;

    sqlx::query("INSERT INTO property_views (property_id, user_id, ip_address) VALUES ($1, $2, $3)")
        .bind(property_id)
        .bind(viewer_id)
        .bind(ip_address)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(view_count)
}

/// Listing counts shown on the owner's dashboard.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct OwnerStats {
    pub total: i64,
    pub approved: i64,
    pub pending_review: i64,
    pub rejected: i64,
    pub available: i64,
    pub total_views: i64,
}

#[derive(Debug, Serialize)]
pub struct OwnerProperties {
    pub data: Vec<PropertyListing>,
    pub stats: OwnerStats,
}

pub async fn my_properties(pool: &DbPool, owner_id: Uuid) -> Result<OwnerProperties, AppError> {
    let data = sqlx::query_as::<_, PropertyListing>(&format!(
        "{LISTING_SELECT} WHERE p.owner_id = $1 ORDER BY p.created_at DESC"
    ))
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    let stats = sqlx::query_as::<_, OwnerStats>(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE status = 'APPROVED') AS approved,
            COUNT(*) FILTER (WHERE status = 'PENDING_REVIEW') AS pending_review,
            COUNT(*) FILTER (WHERE status = 'REJECTED') AS rejected,
            COUNT(*) FILTER (WHERE is_available) AS available,
            COALESCE(SUM(view_count), 0)::BIGINT AS total_views
        FROM properties
        WHERE owner_id = $1
        "#,
    )
    .bind(owner_id)
    .fetch_one(pool)
    .await?;

    Ok(OwnerProperties { data, stats })
}

/// Add or remove a favorite. Returns whether it is now a favorite.
pub async fn toggle_favorite(
    pool: &DbPool,
    user_id: Uuid,
    property_id: Uuid,
) -> Result<bool, AppError> {
    let property = find(pool, property_id).await?;
    if !property.is_public() {
        return Err(AppError::NotFound("Property"));
    }

    let removed = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND property_id = $2")
        .bind(user_id)
        .bind(property_id)
        .execute(pool)
        .await?;

    if removed.rows_affected() > 0 {
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO favorites (user_id, property_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(property_id)
    .execute(pool)
    .await?;

    Ok(true)
}

pub async fn is_favorite(pool: &DbPool, user_id: Uuid, property_id: Uuid) -> Result<bool, AppError> {
    let favorite: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM favorites WHERE user_id = $1 AND property_id = $2)",
    )
    .bind(user_id)
    .bind(property_id)
    .fetch_one(pool)
    .await?;
    Ok(favorite)
}

pub async fn favorite_count(pool: &DbPool, property_id: Uuid) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM favorites WHERE property_id = $1")
        .bind(property_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn favorites(
    pool: &DbPool,
    user_id: Uuid,
    page: PageQuery,
) -> Result<Paginated<PropertyListing>, AppError> {
    let window = page.resolve(DEFAULT_LIMIT, MAX_LIMIT);

    let data = sqlx::query_as::<_, PropertyListing>(&format!(
        "{LISTING_SELECT} JOIN favorites f ON f.property_id = p.id \
         WHERE f.user_id = $1 AND p.status = 'APPROVED' \
         ORDER BY f.created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(window.limit)
    .bind(window.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM favorites f
        JOIN properties p ON p.id = f.property_id
        WHERE f.user_id = $1 AND p.status = 'APPROVED'
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(Paginated {
        data,
        pagination: window.with_total(total),
    })
}

/// Listings waiting for review, oldest first.
pub async fn pending_review(
    pool: &DbPool,
    page: PageQuery,
) -> Result<Paginated<PropertyListing>, AppError> {
    let window = page.resolve(DEFAULT_LIMIT, MAX_LIMIT);

    let data = sqlx::query_as::<_, PropertyListing>(&format!(
        "{LISTING_SELECT} WHERE p.status = 'PENDING_REVIEW' ORDER BY p.created_at ASC LIMIT $1 OFFSET $2"
    ))
    .bind(window.limit)
    .bind(window.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM properties WHERE status = 'PENDING_REVIEW'")
            .fetch_one(pool)
            .await?;

    Ok(Paginated {
        data,
        pagination: window.with_total(total),
    })
}

/// Approve or reject a listing under review.
///
/// # Errors
///
/// - `NotFound` when the listing does not exist
/// - `Conflict` when it is not `PENDING_REVIEW`
pub async fn review(
    pool: &DbPool,
    reviewer_id: Uuid,
    property_id: Uuid,
    decision: PropertyStatus,
    reason: Option<String>,
) -> Result<Property, AppError> {
    let mut tx = pool.begin().await?;

    let status: String = sqlx::query_scalar("SELECT status FROM properties WHERE id = $1 FOR UPDATE")
        .bind(property_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Property"))?;

    if status != PropertyStatus::PendingReview.as_str() {
        return Err(AppError::Conflict(format!(
            "Property is {status}, only PENDING_REVIEW listings can be reviewed"
        )));
    }

    let property = sqlx::query_as::<_, Property>(
        "UPDATE properties SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(decision.as_str())
    .bind(property_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO property_approvals (property_id, reviewer_id, decision, reason) VALUES ($1, $2, $3, $4)",
    )
    .bind(property_id)
    .bind(reviewer_id)
    .bind(decision.as_str())
    .bind(reason)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!("Property {} {} by {}", property_id, decision, reviewer_id);
    Ok(property)
}

pub async fn approval_history(
    pool: &DbPool,
    auth: &AuthContext,
    property_id: Uuid,
) -> Result<Vec<PropertyApproval>, AppError> {
    let property = find(pool, property_id).await?;
    ensure_can_manage(auth, &property)?;

    let history = sqlx::query_as::<_, PropertyApproval>(
        "SELECT * FROM property_approvals WHERE property_id = $1 ORDER BY created_at DESC",
    )
    .bind(property_id)
    .fetch_all(pool)
    .await?;

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use chrono::Utc;

    fn property(owner_id: Uuid, status: PropertyStatus) -> Property {
        let now = Utc::now();
        Property {
            id: Uuid::new_v4(),
            code: "RV-0A1B2C3D".to_string(),
            title: "Studio in Bangsar".to_string(),
            description: None,
            address: "1 Jalan Telawi".to_string(),
            city: "Kuala Lumpur".to_string(),
            state: "WP".to_string(),
            zip_code: "59100".to_string(),
            country: "MY".to_string(),
            price_cents: 180_000,
            currency_code: "MYR".to_string(),
            bedrooms: 1,
            bathrooms: 1,
            area_sqm: 40.0,
            furnished: true,
            is_available: true,
            images: vec!["https://cdn.example.com/1.jpg".to_string()],
            latitude: Some(3.13),
            longitude: Some(101.67),
            status: status.as_str().to_string(),
            view_count: 0,
            owner_id,
            property_type_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn auth(user_id: Uuid, role: Role) -> AuthContext {
        AuthContext {
            user_id,
            session_id: Uuid::new_v4(),
            email: "x@example.com".to_string(),
            role,
        }
    }

    #[test]
    fn owners_and_admins_can_manage() {
        let owner = Uuid::new_v4();
        let p = property(owner, PropertyStatus::Approved);

        assert!(can_manage(&auth(owner, Role::Landlord), &p));
        assert!(can_manage(&auth(Uuid::new_v4(), Role::Admin), &p));
        assert!(!can_manage(&auth(Uuid::new_v4(), Role::Landlord), &p));
    }

    #[test]
    fn feature_uses_lng_lat_order() {
        let listing = PropertyListing {
            property: property(Uuid::new_v4(), PropertyStatus::Approved),
            type_code: "STUDIO".to_string(),
            type_name: "Studio".to_string(),
            owner_name: "Aina Rahman".to_string(),
        };

        let feature = to_feature(&listing).unwrap();
        assert_eq!(feature["geometry"]["coordinates"][0], 101.67);
        assert_eq!(feature["geometry"]["coordinates"][1], 3.13);
        assert_eq!(feature["properties"]["type"], "STUDIO");
    }

    #[test]
    fn feature_requires_coordinates() {
        let mut p = property(Uuid::new_v4(), PropertyStatus::Approved);
        p.latitude = None;
        let listing = PropertyListing {
            property: p,
            type_code: "STUDIO".to_string(),
            type_name: "Studio".to_string(),
            owner_name: "A".to_string(),
        };
        assert!(to_feature(&listing).is_none());
    }

    #[test]
    fn merge_replaces_coordinates_together() {
        let current = property(Uuid::new_v4(), PropertyStatus::Approved);
        let update = UpdatePropertyRequest {
            latitude: Some(1.5),
            ..Default::default()
        };
        let merged = merge_update(&current, &update);
        assert_eq!(merged.latitude, Some(1.5));
        assert_eq!(merged.longitude, None);
        assert!(validate_coordinates(merged.latitude, merged.longitude).is_err());
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let current = property(Uuid::new_v4(), PropertyStatus::Approved);
        let update = UpdatePropertyRequest {
            price_cents: Some(200_000),
            title: Some("  Bigger studio ".to_string()),
            ..Default::default()
        };
        let merged = merge_update(&current, &update);
        assert_eq!(merged.price_cents, 200_000);
        assert_eq!(merged.title, "Bigger studio");
        assert_eq!(merged.city, current.city);
        assert_eq!(merged.latitude, current.latitude);
    }

    const LANDLORD: Uuid = Uuid::from_u128(0x0a);
    const SUNWAY_LOFT: Uuid = Uuid::from_u128(0x101);
    const CHERAS_TERRACE: Uuid = Uuid::from_u128(0x102);
    const PENANG_STUDIO: Uuid = Uuid::from_u128(0x103);

    async fn stored_status(pool: &DbPool, property_id: Uuid) -> Option<String> {
        sqlx::query_scalar("SELECT status FROM properties WHERE id = $1")
            .bind(property_id)
            .fetch_optional(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn delete_refused_while_stays_are_active(pool: DbPool) {
        let owner = auth(LANDLORD, Role::Landlord);

        let result = delete(&pool, &owner, SUNWAY_LOFT).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(
            stored_status(&pool, SUNWAY_LOFT).await.as_deref(),
            Some("APPROVED")
        );
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn delete_archives_listing_with_past_stays(pool: DbPool) {
        let owner = auth(LANDLORD, Role::Landlord);

        let removal = delete(&pool, &owner, CHERAS_TERRACE).await.unwrap();

        assert_eq!(removal, Removal::Archived);
        assert_eq!(
            stored_status(&pool, CHERAS_TERRACE).await.as_deref(),
            Some("ARCHIVED")
        );
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn delete_removes_never_booked_listing(pool: DbPool) {
        let admin = auth(Uuid::from_u128(0x0d), Role::Admin);

        let removal = delete(&pool, &admin, PENANG_STUDIO).await.unwrap();

        assert_eq!(removal, Removal::Deleted);
        assert_eq!(stored_status(&pool, PENANG_STUDIO).await, None);
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn delete_requires_owner_or_admin(pool: DbPool) {
        let stranger = auth(Uuid::from_u128(0x0b), Role::User);

        let result = delete(&pool, &stranger, PENANG_STUDIO).await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn owner_update_waits_for_concurrent_review(pool: DbPool) {
        // Hold the row the way a review in progress does
        let mut reviewing = pool.begin().await.unwrap();
        sqlx::query("SELECT id FROM properties WHERE id = $1 FOR UPDATE")
            .bind(PENANG_STUDIO)
            .execute(&mut *reviewing)
            .await
            .unwrap();

        let owner_update = tokio::spawn({
            let pool = pool.clone();
            async move {
                let owner = auth(LANDLORD, Role::Landlord);
                let request = UpdatePropertyRequest {
                    is_available: Some(false),
                    ..Default::default()
                };
                update(&pool, &owner, PENANG_STUDIO, request).await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        sqlx::query("UPDATE properties SET status = 'APPROVED' WHERE id = $1")
            .bind(PENANG_STUDIO)
            .execute(&mut *reviewing)
            .await
            .unwrap();
        reviewing.commit().await.unwrap();

        let detail = owner_update.await.unwrap().unwrap();
        assert_eq!(detail.listing.property.status(), PropertyStatus::Approved);
        assert!(!detail.listing.property.is_available);
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn owner_content_edit_returns_listing_to_review(pool: DbPool) {
        let owner = auth(LANDLORD, Role::Landlord);
        let request = UpdatePropertyRequest {
            price_cents: Some(260_000),
            ..Default::default()
        };

        let detail = update(&pool, &owner, SUNWAY_LOFT, request).await.unwrap();

        assert_eq!(detail.listing.property.price_cents, 260_000);
        assert_eq!(
            detail.listing.property.status(),
            PropertyStatus::PendingReview
        );
    }

    #[sqlx::test(fixtures(path = "../../fixtures", scripts("marketplace")))]
    async fn search_treats_wildcards_literally(pool: DbPool) {
        let query = PropertySearchQuery {
            search: Some("%".to_string()),
            ..Default::default()
        };

        let page = search(&pool, &query).await.unwrap();

        assert!(page.data.is_empty());
    }
}
