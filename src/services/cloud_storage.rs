//! Cloudinary upload and destroy calls.
//!
//! Requests are signed server-side: the signed parameters are sorted by
//! name, joined as `k=v&k=v`, the API secret is appended and the whole
//! string is hashed with SHA-256.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{config::CloudinaryConfig, error::AppError};

/// Parameters that are sent but never signed.
const UNSIGNED_PARAMS: [&str; 3] = ["file", "api_key", "resource_type"];

/// Cloudinary resource class of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Raw,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Raw => "raw",
        }
    }
}

/// What Cloudinary reports about a stored asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedAsset {
    pub public_id: String,
    pub secure_url: String,
    pub bytes: i64,
    #[serde(default)]
    pub format: Option<String>,
    pub resource_type: String,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryErrorBody {
    error: CloudinaryErrorMessage,
}

#[derive(Debug, Deserialize)]
struct CloudinaryErrorMessage {
    message: String,
}

/// Hex SHA-256 signature over the signable parameters.
pub fn sign_params(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .filter(|(key, value)| !UNSIGNED_PARAMS.contains(key) && !value.is_empty())
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct CloudStorage {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudStorage {
    pub fn new(config: CloudinaryConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client error: {}", e)))?;

        Ok(Self { client, config })
    }

    /// `<prefix>/<sub>`, or just the prefix.
    pub fn folder(&self, sub: Option<&str>) -> String {
        match sub.map(|s| s.trim_matches('/')).filter(|s| !s.is_empty()) {
            Some(sub) => format!("{}/{}", self.config.folder_prefix, sub),
            None => self.config.folder_prefix.clone(),
        }
    }

    fn endpoint(&self, resource_type: ResourceType, action: &str) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/{}/{}",
            self.config.cloud_name,
            resource_type.as_str(),
            action
        )
    }

    fn signed_form(&self, mut params: BTreeMap<&'static str, String>) -> BTreeMap<&'static str, String> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        params.insert("timestamp", timestamp);
        let signature = sign_params(&params, &self.config.api_secret);
        params.insert("api_key", self.config.api_key.clone());
        params.insert("signature", signature);
        params.insert("signature_algorithm", "sha256".to_string());
        params
    }

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        content_type: &str,
        folder: &str,
        resource_type: ResourceType,
        public_id: Option<&str>,
    ) -> Result<UploadedAsset, AppError> {
        let mut params = BTreeMap::new();
        params.insert("folder", folder.to_string());
        if let Some(public_id) = public_id {
            params.insert("public_id", public_id.to_string());
        }

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| AppError::InvalidRequest(format!("Invalid content type: {}", e)))?;

        let mut form = reqwest::multipart::Form::new().part("file", part);
        for (key, value) in self.signed_form(params) {
            form = form.text(key, value);
        }

        let response = self
            .client
            .post(self.endpoint(resource_type, "upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Cloudinary upload failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let asset = response
            .json::<UploadedAsset>()
            .await
            .map_err(|e| AppError::Upstream(format!("Cloudinary response unreadable: {}", e)))?;

        tracing::info!("Uploaded {} ({} bytes)", asset.public_id, asset.bytes);
        Ok(asset)
    }

    /// Delete an asset. Returns Cloudinary's result, `ok` or `not found`.
    pub async fn destroy(
        &self,
        public_id: &str,
        resource_type: ResourceType,
    ) -> Result<String, AppError> {
        let mut params = BTreeMap::new();
        params.insert("public_id", public_id.to_string());

        let response = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&self.signed_form(params))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Cloudinary destroy failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let body = response
            .json::<DestroyResponse>()
            .await
            .map_err(|e| AppError::Upstream(format!("Cloudinary response unreadable: {}", e)))?;

        Ok(body.result)
    }

    /// Fetch the bytes of a delivered asset.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Upstream(format!("Cloudinary download failed: {}", e)))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Upstream(format!("Cloudinary download failed: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

async fn upstream_error(response: reqwest::Response) -> AppError {
    let status = response.status();
    let message = response
        .json::<CloudinaryErrorBody>()
        .await
        .map(|body| body.error.message)
        .unwrap_or_else(|_| "no error message".to_string());
    AppError::Upstream(format!("Cloudinary returned {}: {}", status, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&'static str, &str)]) -> BTreeMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    fn sha256_hex(input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    #[test]
    fn signature_sorts_and_appends_secret() {
        let signed = sign_params(
            &params(&[("timestamp", "1315060510"), ("public_id", "sample_image"), ("eager", "w_400")]),
            "abcd",
        );
        assert_eq!(
            signed,
            sha256_hex("eager=w_400&public_id=sample_image&timestamp=1315060510abcd")
        );
    }

    #[test]
    fn file_key_and_resource_type_are_not_signed() {
        let with_extras = sign_params(
            &params(&[
                ("timestamp", "1"),
                ("folder", "rentverse"),
                ("file", "<bytes>"),
                ("api_key", "123"),
                ("resource_type", "image"),
            ]),
            "s",
        );
        let plain = sign_params(&params(&[("timestamp", "1"), ("folder", "rentverse")]), "s");
        assert_eq!(with_extras, plain);
    }

    #[test]
    fn folder_joins_prefix() {
        let storage = CloudStorage::new(CloudinaryConfig {
            cloud_name: "demo".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            folder_prefix: "rentverse".into(),
        })
        .unwrap();
        assert_eq!(storage.folder(Some("properties")), "rentverse/properties");
        assert_eq!(storage.folder(Some("/")), "rentverse");
        assert_eq!(storage.folder(None), "rentverse");
    }
}
