//! Multipart upload intake and Cloudinary hand-off.
//!
//! File types are decided by magic bytes, not by the client's declared
//! content type.

use axum::extract::Multipart;
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    services::cloud_storage::{CloudStorage, ResourceType, UploadedAsset},
};

pub const MAX_FILES: usize = 10;
pub const MAX_DELETE_BATCH: usize = 50;

/// A file part read from a multipart body.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Accepted file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Jpeg,
    Png,
    Webp,
    Gif,
    Pdf,
}

impl FileKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            FileKind::Jpeg => "image/jpeg",
            FileKind::Png => "image/png",
            FileKind::Webp => "image/webp",
            FileKind::Gif => "image/gif",
            FileKind::Pdf => "application/pdf",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, FileKind::Pdf)
    }

    pub fn resource_type(&self) -> ResourceType {
        if self.is_image() {
            ResourceType::Image
        } else {
            ResourceType::Raw
        }
    }
}

/// Identify a file by its leading bytes.
pub fn sniff(bytes: &[u8]) -> Option<FileKind> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(FileKind::Jpeg),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(FileKind::Png),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(FileKind::Gif),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(FileKind::Webp),
        [b'%', b'P', b'D', b'F', b'-', ..] => Some(FileKind::Pdf),
        _ => None,
    }
}

/// Size and type checks for one file.
pub fn validate_file(
    file: &IncomingFile,
    max_bytes: usize,
    images_only: bool,
) -> Result<FileKind, AppError> {
    if file.bytes.is_empty() {
        return Err(AppError::InvalidRequest(format!(
            "{} is empty",
            file.file_name
        )));
    }
    if file.bytes.len() > max_bytes {
        return Err(AppError::InvalidRequest(format!(
            "{} exceeds the {} byte limit",
            file.file_name, max_bytes
        )));
    }

    let kind = sniff(&file.bytes).ok_or_else(|| {
        AppError::InvalidRequest(format!(
            "{} is not a JPEG, PNG, WebP, GIF or PDF file",
            file.file_name
        ))
    })?;

    if images_only && !kind.is_image() {
        return Err(AppError::InvalidRequest(format!(
            "{} is not an image",
            file.file_name
        )));
    }

    Ok(kind)
}

/// Read every part named in `field_names` as a file.
///
/// Other parts are ignored.
pub async fn read_files(
    multipart: &mut Multipart,
    field_names: &[&str],
    max_files: usize,
) -> Result<Vec<IncomingFile>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Malformed multipart body: {}", e)))?
    {
        let is_file = field.name().is_some_and(|name| field_names.contains(&name));
        if !is_file {
            continue;
        }

        if files.len() == max_files {
            return Err(AppError::InvalidRequest(format!(
                "At most {max_files} files can be uploaded at once"
            )));
        }

        let file_name = field
            .file_name()
            .map(sanitize_file_name)
            .unwrap_or_else(|| format!("upload-{}", files.len() + 1));
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("Could not read {}: {}", file_name, e)))?;

        files.push(IncomingFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(AppError::InvalidRequest("No files were uploaded".to_string()));
    }

    Ok(files)
}

/// Keep only the base name and characters safe in logs and headers.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(100)
        .collect();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Validate every file first, then upload them in order.
pub async fn upload_all(
    storage: &CloudStorage,
    files: Vec<IncomingFile>,
    folder: &str,
    max_bytes: usize,
    images_only: bool,
) -> Result<Vec<UploadedAsset>, AppError> {
    let kinds = files
        .iter()
        .map(|file| validate_file(file, max_bytes, images_only))
        .collect::<Result<Vec<_>, _>>()?;

    let mut assets = Vec::with_capacity(files.len());
    for (file, kind) in files.into_iter().zip(kinds) {
        let asset = storage
            .upload(
                file.bytes,
                &file.file_name,
                kind.content_type(),
                folder,
                kind.resource_type(),
                None,
            )
            .await?;
        assets.push(asset);
    }

    Ok(assets)
}

/// Public id from its path form, where `~` stands for `/`.
pub fn decode_public_id(segment: &str) -> Result<String, AppError> {
    let public_id = segment.trim().replace('~', "/");
    validate_public_id(&public_id)?;
    Ok(public_id)
}

pub fn validate_public_id(public_id: &str) -> Result<(), AppError> {
    let valid = !public_id.is_empty()
        && public_id.len() <= 255
        && !public_id.starts_with('/')
        && !public_id.split('/').any(|part| part.is_empty() || part == "..")
        && public_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(format!(
            "Invalid public id: {public_id}"
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    pub resource_type: Option<ResourceType>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteManyRequest {
    pub public_ids: Vec<String>,
    pub resource_type: Option<ResourceType>,
}

#[derive(Debug, Serialize)]
pub struct DeleteOutcome {
    pub public_id: String,
    pub result: String,
}

/// Destroy several assets. Per-asset failures are reported, not raised.
pub async fn delete_many(
    storage: &CloudStorage,
    request: &DeleteManyRequest,
) -> Result<Vec<DeleteOutcome>, AppError> {
    if request.public_ids.is_empty() {
        return Err(AppError::InvalidRequest(
            "public_ids cannot be empty".to_string(),
        ));
    }
    if request.public_ids.len() > MAX_DELETE_BATCH {
        return Err(AppError::InvalidRequest(format!(
            "At most {MAX_DELETE_BATCH} files can be deleted at once"
        )));
    }
    for public_id in &request.public_ids {
        validate_public_id(public_id)?;
    }

    let resource_type = request.resource_type.unwrap_or(ResourceType::Image);
    let mut outcomes = Vec::with_capacity(request.public_ids.len());

    for public_id in &request.public_ids {
        let result = match storage.destroy(public_id, resource_type).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Deleting {} failed: {}", public_id, e);
                "error".to_string()
            }
        };
        outcomes.push(DeleteOutcome {
            public_id: public_id.clone(),
            result,
        });
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(bytes: &[u8]) -> IncomingFile {
        IncomingFile {
            file_name: "photo.jpg".to_string(),
            bytes: bytes.to_vec(),
        }
    }

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn sniffs_supported_types() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(FileKind::Jpeg));
        assert_eq!(sniff(PNG), Some(FileKind::Png));
        assert_eq!(sniff(b"GIF89a...."), Some(FileKind::Gif));
        assert_eq!(sniff(b"RIFF\x10\0\0\0WEBPVP8 "), Some(FileKind::Webp));
        assert_eq!(sniff(b"%PDF-1.4\n"), Some(FileKind::Pdf));
        assert_eq!(sniff(b"RIFF\x10\0\0\0WAVEfmt "), None);
        assert_eq!(sniff(b"<html>"), None);
        assert_eq!(sniff(&[]), None);
    }

    #[test]
    fn validation_enforces_size_and_kind() {
        assert_eq!(validate_file(&file(PNG), 100, true).unwrap(), FileKind::Png);
        assert!(validate_file(&file(PNG), 5, false).is_err());
        assert!(validate_file(&file(b""), 100, false).is_err());
        assert!(validate_file(&file(b"%PDF-1.4"), 100, true).is_err());
        assert_eq!(
            validate_file(&file(b"%PDF-1.4"), 100, false).unwrap(),
            FileKind::Pdf
        );
        assert!(validate_file(&file(b"MZ\x90\0"), 100, false).is_err());
    }

    #[test]
    fn public_ids_decode_tilde() {
        assert_eq!(
            decode_public_id("rentverse~properties~abc123").unwrap(),
            "rentverse/properties/abc123"
        );
        assert!(decode_public_id("rentverse~..~secret").is_err());
        assert!(decode_public_id("~abs").is_err());
        assert!(decode_public_id("a~~b").is_err());
        assert!(decode_public_id("has space").is_err());
        assert!(decode_public_id("").is_err());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\my photo.png"), "myphoto.png");
        assert_eq!(sanitize_file_name("???"), "upload");
    }
}
