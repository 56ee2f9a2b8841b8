use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// One progress event of an in-flight upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    /// Completion in percent, 0.0..=100.0.
    pub percent: f64,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn new(bytes_sent: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes > 0 {
            (bytes_sent as f64 / total_bytes as f64 * 100.0).min(100.0)
        } else {
            100.0
        };
        Self {
            percent,
            bytes_sent,
            total_bytes,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Status and body of a finished transport exchange; any status is reported, not just 2xx.
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// PUT `body` to `url`, calling `on_progress` as bytes leave the client.
    ///
    /// `Err` means the exchange itself failed or was aborted.
    async fn put(
        &self,
        url: &str,
        body: Bytes,
        content_type: &str,
        on_progress: ProgressCallback,
    ) -> Result<TransportResponse>;
}
