use std::time::Duration;

/// Default chunk size: 20 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 20 * 1024 * 1024;

/// Default number of chunk uploads allowed in flight per session.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 20;

/// Default number of re-attempts for a chunk after a retryable failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Path of the resume probe endpoint, relative to the store base URL.
pub const RESUME_PROBE_PATH: &str = "/upload/check";

/// Path of the chunk upload endpoint, relative to the store base URL.
pub const CHUNK_UPLOAD_PATH: &str = "/upload";

/// Timeout for the resume probe request.
pub const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single chunk upload.
///
/// Chunks are large (tens of MiB) so this is far more generous than the
/// probe timeout.
pub const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Multipart field names used by the chunk upload endpoint.
pub mod fields {
    pub const CHUNK: &str = "chunk";
    pub const FILE_ID: &str = "fileId";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const CHECKSUM: &str = "checksum";
}
