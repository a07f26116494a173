//! File upload handlers.
//!
//! - POST /api/upload/single - One file in field `file`
//! - POST /api/upload/multiple - Up to 10 files in field `files`
//! - POST /api/upload/property-images - Images only, stored under `<prefix>/properties`
//! - DELETE /api/upload/delete/{public_id} - `~` stands for `/`
//! - DELETE /api/upload/delete-multiple
//!
//! All endpoints answer 503 when Cloudinary is not configured.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};

use crate::{
    error::AppError,
    middleware::{auth::AuthContext, client_info::ClientInfo},
    models::activity::ActivityAction,
    services::{
        activity_logger,
        cloud_storage::{ResourceType, UploadedAsset},
        upload_service::{self, DeleteManyRequest, DeleteQuery, MAX_FILES},
    },
    state::AppState,
};

/// Where an endpoint reads files from and where it stores them.
struct UploadTarget {
    field_names: &'static [&'static str],
    max_files: usize,
    subfolder: &'static str,
    images_only: bool,
}

const SINGLE: UploadTarget = UploadTarget {
    field_names: &["file"],
    max_files: 1,
    subfolder: "uploads",
    images_only: false,
};

const MULTIPLE: UploadTarget = UploadTarget {
    field_names: &["files", "file"],
    max_files: MAX_FILES,
    subfolder: "uploads",
    images_only: false,
};

const PROPERTY_IMAGES: UploadTarget = UploadTarget {
    field_names: &["images", "files", "file"],
    max_files: MAX_FILES,
    subfolder: "properties",
    images_only: true,
};

async fn upload(
    state: &AppState,
    auth: &AuthContext,
    client: &ClientInfo,
    multipart: &mut Multipart,
    target: &UploadTarget,
) -> Result<Vec<UploadedAsset>, AppError> {
    let storage = state.storage()?;
    let files =
        upload_service::read_files(multipart, target.field_names, target.max_files).await?;

    let folder = storage.folder(Some(target.subfolder));
    let assets = upload_service::upload_all(
        storage,
        files,
        &folder,
        state.config.max_upload_bytes,
        target.images_only,
    )
    .await?;

    activity_logger::log(
        &state.pool,
        ActivityAction::FileUploaded,
        Some(auth.user_id),
        json!({
            "count": assets.len(),
            "public_ids": assets.iter().map(|a| a.public_id.as_str()).collect::<Vec<_>>(),
            "bytes": assets.iter().map(|a| a.bytes).sum::<i64>(),
        }),
        client.ip.as_deref(),
    )
    .await;

    Ok(assets)
}

/// `POST /api/upload/single`
pub async fn upload_single(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadedAsset>), AppError> {
    let mut assets = upload(&state, &auth, &client, &mut multipart, &SINGLE).await?;

    let asset = assets
        .pop()
        .ok_or_else(|| AppError::Internal("Upload returned no asset".to_string()))?;
    Ok((StatusCode::CREATED, Json(asset)))
}

/// `POST /api/upload/multiple`
pub async fn upload_multiple(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let assets = upload(&state, &auth, &client, &mut multipart, &MULTIPLE).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "count": assets.len(), "files": assets })),
    ))
}

/// Upload listing photos.
///
/// # Endpoint
///
/// `POST /api/upload/property-images`
///
/// # Response
///
/// - **Success (201 Created)**: `{ "count", "files": [...], "urls": [...] }`;
///   `urls` can be passed straight to a listing's `images`
/// - **Error (400)**: a file is not an image, too large, or too many files
pub async fn upload_property_images(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let assets = upload(&state, &auth, &client, &mut multipart, &PROPERTY_IMAGES).await?;

    let urls: Vec<&str> = assets.iter().map(|a| a.secure_url.as_str()).collect();
    Ok((
        StatusCode::CREATED,
        Json(json!({ "count": assets.len(), "files": assets, "urls": urls })),
    ))
}

/// `DELETE /api/upload/delete/{public_id}?resource_type=image|raw`
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Path(segment): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<Value>, AppError> {
    let storage = state.storage()?;
    let public_id = upload_service::decode_public_id(&segment)?;
    let resource_type = query.resource_type.unwrap_or(ResourceType::Image);

    let result = storage.destroy(&public_id, resource_type).await?;
    if result == "not found" {
        return Err(AppError::NotFound("File"));
    }

    activity_logger::log(
        &state.pool,
        ActivityAction::FileDeleted,
        Some(auth.user_id),
        json!({ "public_ids": [public_id] }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(json!({ "public_id": public_id, "result": result })))
}

/// `DELETE /api/upload/delete-multiple {public_ids, resource_type?}`
pub async fn delete_multiple(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    client: ClientInfo,
    Json(request): Json<DeleteManyRequest>,
) -> Result<Json<Value>, AppError> {
    let storage = state.storage()?;
    let outcomes = upload_service::delete_many(storage, &request).await?;

    let deleted: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.result == "ok")
        .map(|o| o.public_id.as_str())
        .collect();

    activity_logger::log(
        &state.pool,
        ActivityAction::FileDeleted,
        Some(auth.user_id),
        json!({ "public_ids": deleted }),
        client.ip.as_deref(),
    )
    .await;

    Ok(Json(json!({
        "deleted": deleted.len(),
        "results": outcomes
    })))
}
