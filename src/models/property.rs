//! Property listing models, request bodies and validation.
//!
//! Prices are integer cents. Coordinates are WGS84 degrees.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const MAX_IMAGES: usize = 10;
pub const GEOJSON_DEFAULT_LIMIT: i64 = 500;
pub const GEOJSON_MAX_LIMIT: i64 = 1000;

/// Review state of a listing. Only `APPROVED` listings are public.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Archived,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Draft => "DRAFT",
            PropertyStatus::PendingReview => "PENDING_REVIEW",
            PropertyStatus::Approved => "APPROVED",
            PropertyStatus::Rejected => "REJECTED",
            PropertyStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(PropertyStatus::Draft),
            "PENDING_REVIEW" => Ok(PropertyStatus::PendingReview),
            "APPROVED" => Ok(PropertyStatus::Approved),
            "REJECTED" => Ok(PropertyStatus::Rejected),
            "ARCHIVED" => Ok(PropertyStatus::Archived),
            other => Err(AppError::InvalidRequest(format!(
                "Unknown property status: {other}"
            ))),
        }
    }
}

/// Represents a row of the `properties` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Property {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub price_cents: i64,
    pub currency_code: String,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub area_sqm: f64,
    pub furnished: bool,
    pub is_available: bool,
    pub images: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
    pub view_count: i64,
    pub owner_id: Uuid,
    pub property_type_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    pub fn status(&self) -> PropertyStatus {
        self.status.parse().unwrap_or(PropertyStatus::Draft)
    }

    pub fn is_public(&self) -> bool {
        self.status() == PropertyStatus::Approved
    }
}

/// A property joined with the labels list views need.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PropertyListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub property: Property,
    pub type_code: String,
    pub type_name: String,
    pub owner_name: String,
}

/// Full detail view returned by single-property endpoints.
#[derive(Debug, Serialize)]
pub struct PropertyDetail {
    #[serde(flatten)]
    pub listing: PropertyListing,
    pub amenities: Vec<Amenity>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PropertyType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Amenity {
    pub id: Uuid,
    pub name: String,
    pub category: String,
}

/// Entry of a listing's review history.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PropertyApproval {
    pub id: Uuid,
    pub property_id: Uuid,
    pub reviewer_id: Option<Uuid>,
    pub decision: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /api/properties`.
///
/// ```json
/// {
///   "title": "Cozy 2BR near KLCC",
///   "address": "12 Jalan Ampang",
///   "city": "Kuala Lumpur",
///   "state": "Wilayah Persekutuan",
///   "zip_code": "50450",
///   "price_cents": 250000,
///   "bedrooms": 2,
///   "bathrooms": 1,
///   "area_sqm": 75.0,
///   "property_type_id": "…",
///   "amenity_ids": ["…"]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePropertyRequest {
    pub title: String,
    pub description: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency_code: String,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub area_sqm: f64,
    #[serde(default)]
    pub furnished: bool,
    #[serde(default = "default_available")]
    pub is_available: bool,
    #[serde(default)]
    pub images: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub property_type_id: Uuid,
    #[serde(default)]
    pub amenity_ids: Vec<Uuid>,
}

fn default_country() -> String {
    "MY".to_string()
}

fn default_currency() -> String {
    "MYR".to_string()
}

fn default_available() -> bool {
    true
}

/// Request body for `PUT /api/properties/{id}`. Absent fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePropertyRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub price_cents: Option<i64>,
    pub currency_code: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub area_sqm: Option<f64>,
    pub furnished: Option<bool>,
    pub is_available: Option<bool>,
    pub images: Option<Vec<String>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub property_type_id: Option<Uuid>,
    pub amenity_ids: Option<Vec<Uuid>>,
}

impl UpdatePropertyRequest {
    /// Whether anything other than availability changes.
    pub fn changes_content(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.address.is_some()
            || self.city.is_some()
            || self.state.is_some()
            || self.zip_code.is_some()
            || self.country.is_some()
            || self.price_cents.is_some()
            || self.currency_code.is_some()
            || self.bedrooms.is_some()
            || self.bathrooms.is_some()
            || self.area_sqm.is_some()
            || self.furnished.is_some()
            || self.images.is_some()
            || self.latitude.is_some()
            || self.longitude.is_some()
            || self.property_type_id.is_some()
            || self.amenity_ids.is_some()
    }
}

/// Query parameters for `GET /api/properties`. Prices are in cents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertySearchQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(rename = "type")]
    pub property_type: Option<String>,
    pub city: Option<String>,
    pub available: Option<bool>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturedQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoJsonQuery {
    pub bbox: Option<String>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

/// Request body for `POST /api/properties/{id}/reject`.
#[derive(Debug, Deserialize)]
pub struct RejectPropertyRequest {
    pub reason: String,
}

/// Request body for `POST /api/properties/{id}/approve`.
#[derive(Debug, Default, Deserialize)]
pub struct ApprovePropertyRequest {
    pub notes: Option<String>,
}

/// Bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl FromStr for BoundingBox {
    type Err = AppError;

    /// Parses `minLng,minLat,maxLng,maxLat`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || AppError::InvalidRequest("bbox must be minLng,minLat,maxLng,maxLat".to_string());

        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;

        let &[min_lng, min_lat, max_lng, max_lat] = parts.as_slice() else {
            return Err(invalid());
        };

        if !(-180.0..=180.0).contains(&min_lng)
            || !(-180.0..=180.0).contains(&max_lng)
            || !(-90.0..=90.0).contains(&min_lat)
            || !(-90.0..=90.0).contains(&max_lat)
            || min_lng > max_lng
            || min_lat > max_lat
        {
            return Err(invalid());
        }

        Ok(Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        })
    }
}

/// Listing code: `RV-` and 8 uppercase hex digits.
pub fn generate_code() -> String {
    let bytes: [u8; 4] = rand::random();
    format!("RV-{}", hex::encode_upper(bytes))
}

fn non_empty(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

fn validate_price(price_cents: i64) -> Result<(), AppError> {
    if price_cents <= 0 {
        return Err(AppError::InvalidRequest(
            "price_cents must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_rooms(value: i32, field: &str) -> Result<(), AppError> {
    if value < 1 {
        return Err(AppError::InvalidRequest(format!(
            "{field} must be at least 1"
        )));
    }
    Ok(())
}

fn validate_area(area_sqm: f64) -> Result<(), AppError> {
    if !area_sqm.is_finite() || area_sqm <= 0.0 {
        return Err(AppError::InvalidRequest(
            "area_sqm must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Latitude and longitude must be supplied together and lie in range.
pub fn validate_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), AppError> {
    match (latitude, longitude) {
        (None, None) => Ok(()),
        (Some(lat), Some(lng)) => {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(AppError::InvalidRequest(
                    "latitude must be between -90 and 90".to_string(),
                ));
            }
            if !(-180.0..=180.0).contains(&lng) {
                return Err(AppError::InvalidRequest(
                    "longitude must be between -180 and 180".to_string(),
                ));
            }
            Ok(())
        }
        _ => Err(AppError::InvalidRequest(
            "latitude and longitude must be provided together".to_string(),
        )),
    }
}

pub fn validate_images(images: &[String]) -> Result<(), AppError> {
    if images.len() > MAX_IMAGES {
        return Err(AppError::InvalidRequest(format!(
            "At most {MAX_IMAGES} images are allowed"
        )));
    }

    for image in images {
        match url::Url::parse(image) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Err(AppError::InvalidRequest(format!(
                    "Image is not an http(s) URL: {image}"
                )));
            }
        }
    }
    Ok(())
}

impl CreatePropertyRequest {
    /// Field checks that need no database access.
    pub fn validate(&self) -> Result<(), AppError> {
        non_empty(&self.title, "title")?;
        non_empty(&self.address, "address")?;
        non_empty(&self.city, "city")?;
        validate_price(self.price_cents)?;
        validate_rooms(self.bedrooms, "bedrooms")?;
        validate_rooms(self.bathrooms, "bathrooms")?;
        validate_area(self.area_sqm)?;
        validate_coordinates(self.latitude, self.longitude)?;
        validate_images(&self.images)
    }
}

impl UpdatePropertyRequest {
    /// Same checks as create, applied only to supplied fields.
    ///
    /// Coordinates are checked against the merged result by the caller.
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(title) = &self.title {
            non_empty(title, "title")?;
        }
        if let Some(address) = &self.address {
            non_empty(address, "address")?;
        }
        if let Some(city) = &self.city {
            non_empty(city, "city")?;
        }
        if let Some(price) = self.price_cents {
            validate_price(price)?;
        }
        if let Some(bedrooms) = self.bedrooms {
            validate_rooms(bedrooms, "bedrooms")?;
        }
        if let Some(bathrooms) = self.bathrooms {
            validate_rooms(bathrooms, "bathrooms")?;
        }
        if let Some(area) = self.area_sqm {
            validate_area(area)?;
        }
        if let Some(images) = &self.images {
            validate_images(images)?;
        }
        Ok(())
    }
}

/// Status a listing gets when it is created.
pub fn initial_status(is_admin: bool, auto_approve: bool) -> PropertyStatus {
    if is_admin || auto_approve {
        PropertyStatus::Approved
    } else {
        PropertyStatus::PendingReview
    }
}

/// Status after an update.
///
/// A content change by a non-admin to an approved listing sends it back
/// for review unless auto-approve is on. Editing a rejected listing
/// resubmits it.
pub fn status_after_update(
    current: PropertyStatus,
    is_admin: bool,
    auto_approve: bool,
    changes_content: bool,
) -> PropertyStatus {
    if !changes_content || is_admin {
        return current;
    }

    match current {
        PropertyStatus::Approved | PropertyStatus::Rejected => initial_status(false, auto_approve),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> CreatePropertyRequest {
        CreatePropertyRequest {
            title: "Cozy 2BR near KLCC".to_string(),
            description: None,
            address: "12 Jalan Ampang".to_string(),
            city: "Kuala Lumpur".to_string(),
            state: "WP".to_string(),
            zip_code: "50450".to_string(),
            country: default_country(),
            price_cents: 250_000,
            currency_code: default_currency(),
            bedrooms: 2,
            bathrooms: 1,
            area_sqm: 75.0,
            furnished: true,
            is_available: true,
            images: vec!["https://cdn.example.com/a.jpg".to_string()],
            latitude: Some(3.1579),
            longitude: Some(101.7123),
            property_type_id: Uuid::new_v4(),
            amenity_ids: vec![],
        }
    }

    #[test]
    fn valid_listing_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn rejects_bad_fields() {
        let cases: Vec<fn(&mut CreatePropertyRequest)> = vec![
            |r| r.title = "   ".to_string(),
            |r| r.address = String::new(),
            |r| r.price_cents = 0,
            |r| r.bedrooms = 0,
            |r| r.bathrooms = 0,
            |r| r.area_sqm = 0.0,
            |r| r.area_sqm = f64::NAN,
            |r| r.latitude = Some(91.0),
            |r| r.longitude = None,
            |r| r.images = vec!["ftp://example.com/a.jpg".to_string()],
            |r| r.images = vec!["https://cdn.example.com/a.jpg".to_string(); 11],
        ];

        for mutate in cases {
            let mut request = valid_request();
            mutate(&mut request);
            assert!(request.validate().is_err(), "{request:?} should fail");
        }
    }

    #[test]
    fn update_checks_only_supplied_fields() {
        assert!(UpdatePropertyRequest::default().validate().is_ok());

        let update = UpdatePropertyRequest {
            price_cents: Some(-5),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn availability_alone_is_not_a_content_change() {
        let update = UpdatePropertyRequest {
            is_available: Some(false),
            ..Default::default()
        };
        assert!(!update.changes_content());

        let update = UpdatePropertyRequest {
            title: Some("New".to_string()),
            ..Default::default()
        };
        assert!(update.changes_content());
    }

    #[test]
    fn codes_have_expected_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 11);
        assert!(code.starts_with("RV-"));
        assert!(code[3..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn bbox_parsing() {
        let bbox: BoundingBox = "101.6,3.0,101.8,3.3".parse().unwrap();
        assert_eq!(bbox.min_lng, 101.6);
        assert_eq!(bbox.max_lat, 3.3);

        for bad in ["", "1,2,3", "a,b,c,d", "10,0,5,1", "0,-91,1,1", "1,2,3,4,5"] {
            assert!(bad.parse::<BoundingBox>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn review_rules() {
        assert_eq!(initial_status(true, false), PropertyStatus::Approved);
        assert_eq!(initial_status(false, true), PropertyStatus::Approved);
        assert_eq!(initial_status(false, false), PropertyStatus::PendingReview);

        use PropertyStatus::*;
        assert_eq!(status_after_update(Approved, false, false, true), PendingReview);
        assert_eq!(status_after_update(Approved, true, false, true), Approved);
        assert_eq!(status_after_update(Approved, false, true, true), Approved);
        assert_eq!(status_after_update(Approved, false, false, false), Approved);
        assert_eq!(status_after_update(Rejected, false, false, true), PendingReview);
        assert_eq!(status_after_update(Rejected, true, false, true), Rejected);
    }
}
