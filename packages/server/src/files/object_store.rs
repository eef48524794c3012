//! Thin client for the external object store. The store issues presigned
//! URLs itself; the core only performs the handshake and existence checks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ObjectStoreConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct PresignedUpload {
    #[serde(rename = "uploadUrl")]
    pub upload_url: String,
    #[serde(rename = "s3Key")]
    pub key: String,
    #[serde(rename = "s3Bucket")]
    pub bucket: String,
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub mimetype: String,
    pub url: String,
}

/// HTTP client against the store's signing endpoint. Credentials are
/// forwarded as headers; the store derives the canonical object URL.
pub struct ObjectStoreClient {
    http: Arc<reqwest::Client>,
    config: ObjectStoreConfig,
    endpoint: String,
}

impl ObjectStoreClient {
    pub fn new(http: Arc<reqwest::Client>, config: ObjectStoreConfig) -> Self {
        let endpoint = format!(
            "https://{}.s3.{}.amazonaws.com",
            config.bucket, config.region
        );
        Self { http, config, endpoint }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key)
    }

    /// Allocates an object key and asks the store for an upload URL.
    pub async fn presign_upload(
        &self,
        filename: &str,
        mimetype: &str,
    ) -> Result<PresignedUpload, ApiError> {
        let key = format!(
            "uploads/{}/{}-{}",
            Utc::now().format("%Y%m%d"),
            Uuid::new_v4(),
            sanitize_filename(filename)
        );
        let response = self
            .http
            .post(format!("{}/presign", self.endpoint))
            .timeout(Duration::from_secs(5))
            .header("x-access-key", &self.config.access_key_id)
            .json(&serde_json::json!({
                "key": key,
                "contentType": mimetype,
                "expiresIn": self.config.presigned_url_expiry,
            }))
            .send()
            .await
            .map_err(ApiError::internal)?;
        if !response.status().is_success() {
            return Err(ApiError::Validation("업로드 URL 발급에 실패했습니다.".to_string()));
        }
        let body: serde_json::Value = response.json().await.map_err(ApiError::internal)?;
        let upload_url = body
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| body.get("uploadUrl").and_then(|v| v.as_str()).unwrap_or(""))
            .to_string();
        if upload_url.is_empty() {
            return Err(ApiError::Validation("업로드 URL 발급에 실패했습니다.".to_string()));
        }
        Ok(PresignedUpload {
            upload_url,
            key,
            bucket: self.config.bucket.clone(),
            expires_in: self.config.presigned_url_expiry,
        })
    }

    /// HEAD the object and report its stored size and content type.
    pub async fn head_object(&self, key: &str) -> Result<Option<StoredObject>, ApiError> {
        let response = self
            .http
            .head(self.object_url(key))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(ApiError::internal)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ApiError::internal(std::io::Error::other(format!(
                "object store answered {}",
                response.status()
            ))));
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mimetype = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(Some(StoredObject {
            key: key.to_string(),
            size,
            mimetype,
            url: self.object_url(key),
        }))
    }

    /// Download URL with a short validity, minted by the store.
    pub async fn presign_download(&self, key: &str) -> Result<String, ApiError> {
        let response = self
            .http
            .post(format!("{}/presign-download", self.endpoint))
            .timeout(Duration::from_secs(5))
            .header("x-access-key", &self.config.access_key_id)
            .json(&serde_json::json!({
                "key": key,
                "expiresIn": self.config.presigned_url_expiry,
            }))
            .send()
            .await
            .map_err(ApiError::internal)?;
        let body: serde_json::Value = response.json().await.map_err(ApiError::internal)?;
        body.get("url")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .ok_or(ApiError::NotFound)
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_sanitized_for_keys() {
        assert_eq!(sanitize_filename("내 사진.png"), "____.png");
        assert_eq!(sanitize_filename("report-v2_final.pdf"), "report-v2_final.pdf");
    }
}
