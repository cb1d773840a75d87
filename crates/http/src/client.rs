//! Remote store client.
//!
//! Async HTTP client using `reqwest`. Failures are classified so the upload
//! scheduler knows which ones are worth retrying.

use std::future::Future;
use std::pin::Pin;

use chunkwise_protocol::constants::{
    CHUNK_REQUEST_TIMEOUT, CHUNK_UPLOAD_PATH, PROBE_REQUEST_TIMEOUT, RESUME_PROBE_PATH, fields,
};
use chunkwise_protocol::{ResumeProbeRequest, ResumeProbeResponse};
use chunkwise_upload::{ChunkRequest, ChunkTransport, ResumeProbe, TransportFailure};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tracing::debug;

/// Errors from the remote store client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Whether a later attempt could succeed.
    ///
    /// Timeouts, connection failures, 408, 429 and 5xx are transient.
    /// Other 4xx, malformed requests and bad responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                if let Some(status) = e.status() {
                    return is_retryable_status(status);
                }
                e.is_timeout() || e.is_connect() || (e.is_request() && !e.is_builder())
            }
            Self::Api { status, .. } => StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            Self::Json(_) | Self::InvalidUrl(_) => false,
        }
    }
}

impl From<Error> for TransportFailure {
    fn from(err: Error) -> Self {
        Self {
            retryable: err.is_retryable(),
            cause: err.to_string(),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Client for a chunk store reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    /// Creates a client for the store at `base_url` (e.g. `http://host:8080`).
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder().build()?;
        Self::with_client(http, base_url)
    }

    /// Uses a preconfigured `reqwest` client (proxies, TLS roots, headers).
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, Error> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Asks the store which chunks of `file_id` it already holds.
    pub async fn check_uploaded(&self, file_id: &str, total_chunks: u64) -> Result<Vec<u64>, Error> {
        let url = format!("{}{}", self.base_url, RESUME_PROBE_PATH);
        let body = ResumeProbeRequest {
            file_id: file_id.to_string(),
            total_chunks,
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .timeout(PROBE_REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let parsed: ResumeProbeResponse = serde_json::from_slice(&bytes)?;
        debug!(file_id, stored = parsed.uploaded_chunks.len(), "resume probe answered");
        Ok(parsed.uploaded_chunks)
    }

    /// Sends one chunk as a multipart form.
    pub async fn upload_chunk(&self, request: ChunkRequest) -> Result<(), Error> {
        let url = format!("{}{}", self.base_url, CHUNK_UPLOAD_PATH);
        let ChunkRequest { metadata, data } = request;
        let index = metadata.chunk_index;

        let part = Part::bytes(data)
            .file_name(format!("{}.part{}", metadata.file_id, index))
            .mime_str("application/octet-stream")?;
        let mut form = Form::new()
            .part(fields::CHUNK, part)
            .text(fields::FILE_ID, metadata.file_id.clone())
            .text(fields::CHUNK_INDEX, index.to_string())
            .text(fields::TOTAL_CHUNKS, metadata.total_chunks.to_string());
        if !metadata.checksum.is_empty() {
            form = form.text(fields::CHECKSUM, metadata.checksum);
        }

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(CHUNK_REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }
        debug!(file_id = %metadata.file_id, index, "chunk accepted");
        Ok(())
    }
}

impl ResumeProbe for HttpRemote {
    fn check_uploaded(
        &self,
        file_id: &str,
        total_chunks: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u64>, TransportFailure>> + Send + '_>> {
        let file_id = file_id.to_string();
        Box::pin(async move {
            HttpRemote::check_uploaded(self, &file_id, total_chunks)
                .await
                .map_err(TransportFailure::from)
        })
    }
}

impl ChunkTransport for HttpRemote {
    fn send_chunk(
        &self,
        request: ChunkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportFailure>> + Send + '_>> {
        Box::pin(async move { self.upload_chunk(request).await.map_err(TransportFailure::from) })
    }
}
