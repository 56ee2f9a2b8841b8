use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, Stream};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use tracing::{debug, warn};

use super::traits::{ProgressCallback, TransportResponse, UploadProgress, UploadTransport};

/// Size of each body slice handed to the connection; one progress event per slice.
pub const UPLOAD_SLICE_BYTES: usize = 64 * 1024;

/// Streams upload bodies through reqwest, reporting progress per slice.
pub struct HttpUploadTransport {
    client: Client,
    slice_bytes: usize,
}

impl HttpUploadTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            slice_bytes: UPLOAD_SLICE_BYTES,
        }
    }

    pub fn with_slice_bytes(mut self, slice_bytes: usize) -> Self {
        self.slice_bytes = slice_bytes.max(1);
        self
    }
}

impl Default for HttpUploadTransport {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

/// Split `body` into slices of at most `slice_bytes`.
fn split_slices(body: &Bytes, slice_bytes: usize) -> Vec<Bytes> {
    let mut slices = Vec::with_capacity(body.len() / slice_bytes + 1);
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + slice_bytes).min(body.len());
        slices.push(body.slice(offset..end));
        offset = end;
    }
    slices
}

/// Stream the slices, emitting a progress event as each one is pulled by the connection.
fn progress_stream(
    body: Bytes,
    slice_bytes: usize,
    on_progress: ProgressCallback,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static {
    let total = body.len() as u64;
    let mut sent = 0u64;
    stream::iter(split_slices(&body, slice_bytes).into_iter().map(move |slice| {
        sent += slice.len() as u64;
        on_progress(UploadProgress::new(sent, total));
        Ok(slice)
    }))
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn put(
        &self,
        url: &str,
        body: Bytes,
        content_type: &str,
        on_progress: ProgressCallback,
    ) -> Result<TransportResponse> {
        let total = body.len();
        debug!("signed upload PUT start bytes={}", total);

        let resp = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(progress_stream(
                body,
                self.slice_bytes,
                on_progress,
            )))
            .send()
            .await
            .map_err(|e| anyhow!("upload transport failed: {}", e))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            warn!("signed upload PUT rejected status={}", status);
        } else {
            debug!("signed upload PUT done status={} bytes={}", status, total);
        }

        Ok(TransportResponse { status, body })
    }
}
