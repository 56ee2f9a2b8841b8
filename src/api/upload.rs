// File uploads — multipart through the API server, or presigned PUT straight to storage.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::client::{ApiClient, RequestOptions};
use super::error_body::message_from_value;
use crate::error::{ApiError, ApiResult};
use crate::transport::traits::ProgressCallback;

/// Fallback copy when a direct upload fails without a readable error body.
pub const DIRECT_UPLOAD_FAILED: &str = "Upload failed";

pub const UPLOAD_URL_ENDPOINT: &str = "/files/upload-url";
pub const UPLOAD_COMPLETE_ENDPOINT: &str = "/files/upload-complete";

/// A file held in memory, ready to be sent.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Where a presigned upload should land.
#[derive(Debug, Clone, Default)]
pub struct UploadTarget {
    pub disk_id: i64,
    pub parent_id: Option<i64>,
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    #[serde(default)]
    file_id: Option<i64>,
    #[serde(default)]
    s3_key: String,
}

/// Result of a completed presigned upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub file_id: i64,
    pub upload_url: String,
    pub s3_key: String,
}

impl ApiClient {
    /// Multipart upload of `file` plus flat string fields to `endpoint`.
    ///
    /// The multipart boundary header is left to the transport; no JSON
    /// `Content-Type` is set.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        file: UploadFile,
        params: &[(&str, String)],
    ) -> ApiResult<T> {
        let url = self.url_for(endpoint);
        let mut form = Form::new();
        for (name, value) in params {
            form = form.text(name.to_string(), value.clone());
        }
        let size = file.size();
        let part = Part::bytes(file.data.to_vec())
            .file_name(file.filename.clone())
            .mime_str(&file.content_type)
            .map_err(|e| ApiError::Application(format!("Invalid content type: {}", e)))?;
        form = form.part("file", part);

        let mut req = self.http.post(&url).multipart(form);
        if let Some(token) = self.bearer_token() {
            req = req.bearer_auth(token);
        }

        debug!("multipart upload {} file={} bytes={}", url, file.filename, size);
        self.stats.record_network_request();
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|value| message_from_value(&value, 0))
                .unwrap_or_else(|| DIRECT_UPLOAD_FAILED.to_string());
            warn!("multipart upload failed status={} message={}", status, message);
            return Err(ApiError::Status {
                status,
                message: Some(message),
            });
        }

        Ok(resp.json::<T>().await?)
    }

    /// Two-phase upload: obtain a signed URL and file record, PUT the bytes
    /// straight to storage, then confirm the final size with the server.
    pub async fn upload_with_presigned_url(
        &self,
        target: &UploadTarget,
        file: UploadFile,
        on_progress: ProgressCallback,
    ) -> ApiResult<PresignedUpload> {
        let mut params = vec![
            ("diskId", target.disk_id.to_string()),
            ("filename", file.filename.clone()),
        ];
        if let Some(parent_id) = target.parent_id {
            params.push(("parentId", parent_id.to_string()));
        }
        if let Some(device_id) = &target.device_id {
            params.push(("deviceId", device_id.clone()));
        }

        let url = self.url_with_query(UPLOAD_URL_ENDPOINT, &params)?;
        let value = self
            .request_url(
                &url,
                RequestOptions::with_method(reqwest::Method::POST).skip_cache(),
            )
            .await?;
        let signed: UploadUrlResponse = serde_json::from_value(value)?;

        let size = file.size();
        debug!(
            "presigned upload start file={} bytes={} file_id={:?}",
            file.filename, size, signed.file_id
        );

        let resp = self
            .transport
            .put(&signed.upload_url, file.data, &file.content_type, on_progress)
            .await
            .map_err(|e| ApiError::Application(format!("Upload failed: {:#}", e)))?;
        if !resp.is_success() {
            return Err(ApiError::Application(format!(
                "Upload failed with status {}: {}",
                resp.status, resp.body
            )));
        }

        let file_id = match signed.file_id {
            Some(id) if id != 0 => id,
            _ => {
                return Err(ApiError::Application(
                    "Upload finished but the server did not return a file id".to_string(),
                ))
            }
        };

        self.request::<Value>(
            &format!("{}/{}", UPLOAD_COMPLETE_ENDPOINT, file_id),
            RequestOptions::with_method(reqwest::Method::POST)
                .json(json!({ "fileSize": size }))
                .skip_cache(),
        )
        .await?;

        info!("presigned upload complete file_id={} bytes={}", file_id, size);
        Ok(PresignedUpload {
            file_id,
            upload_url: signed.upload_url,
            s3_key: signed.s3_key,
        })
    }
}
