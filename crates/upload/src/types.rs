//! Data types for the upload flow.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chunkwise_transfer::{FileHandle, ProgressCallback, SessionState};
use tokio_util::sync::CancellationToken;

use crate::error::{ChunkTransportError, UploadError};

/// What the caller asks the orchestrator to upload.
pub struct UploadRequest {
    pub file_id: String,
    /// `None` models "no file selected".
    pub file: Option<Arc<dyn FileHandle>>,
    pub(crate) progress_callbacks: Vec<ProgressCallback>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl UploadRequest {
    pub fn new(file_id: impl Into<String>, file: Option<Arc<dyn FileHandle>>) -> Self {
        Self {
            file_id: file_id.into(),
            file,
            progress_callbacks: Vec::new(),
            cancel: None,
        }
    }

    /// Shorthand for a request with a selected file.
    pub fn for_file(file_id: impl Into<String>, file: impl FileHandle + 'static) -> Self {
        Self::new(file_id, Some(Arc::new(file)))
    }

    /// Registers a callback invoked with each recomputed percentage (0-100).
    pub fn on_progress(mut self, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.progress_callbacks.push(Box::new(callback));
        self
    }

    /// Cancels this session when `token` is cancelled. Without one the
    /// session can only be stopped through the orchestrator.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_id", &self.file_id)
            .field("file_len", &self.file.as_ref().map(|file| file.len()))
            .field("progress_callbacks", &self.progress_callbacks.len())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Result of one chunk attempt, as reported in [`UploadEvent::Chunk`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Success {
        bytes: u64,
        /// Recent throughput across the session.
        bytes_per_second: f64,
    },
    /// Transient failure. `retry_in` is `None` once retries are exhausted.
    RetryableFailure {
        error: ChunkTransportError,
        retry_in: Option<Duration>,
    },
    FatalFailure { error: ChunkTransportError },
    /// Finished after cancellation; the result was ignored.
    Discarded,
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Completed,
    PartiallyFailed,
    Cancelled,
    Aborted,
}

impl From<UploadStatus> for SessionState {
    fn from(status: UploadStatus) -> Self {
        match status {
            UploadStatus::Completed => Self::Completed,
            UploadStatus::PartiallyFailed => Self::PartiallyFailed,
            UploadStatus::Cancelled => Self::Cancelled,
            UploadStatus::Aborted => Self::Aborted,
        }
    }
}

/// Final report of an upload session.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub file_id: String,
    pub status: UploadStatus,
    /// Chunks that exhausted their retries or failed fatally. Re-invoking
    /// the upload for the same file retries exactly these (plus anything
    /// left unattempted by a cancellation).
    pub failed_indices: BTreeSet<u64>,
    /// Last error seen for each failed chunk, ordered by index.
    pub failures: Vec<ChunkTransportError>,
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    pub progress: u8,
    /// Set when the session was aborted before uploading.
    pub abort_reason: Option<String>,
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == UploadStatus::Completed
    }

    /// Converts a non-`Completed` outcome into the error that explains it.
    pub fn ensure_completed(self) -> Result<Self, UploadError> {
        match self.status {
            UploadStatus::Completed => Ok(self),
            UploadStatus::Cancelled => Err(UploadError::SessionCancelled),
            UploadStatus::PartiallyFailed => match self.failures.into_iter().next() {
                Some(first) => Err(first.into()),
                None => Err(UploadError::ChunkTransport(ChunkTransportError {
                    index: self.failed_indices.first().copied().unwrap_or_default(),
                    retryable: false,
                    cause: "retries exhausted".into(),
                })),
            },
            UploadStatus::Aborted => Err(UploadError::Aborted(
                self.abort_reason.unwrap_or_default(),
            )),
        }
    }
}

/// Event emitted while a session runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    StateChanged {
        file_id: String,
        state: SessionState,
    },
    /// Recomputed whole-file percentage.
    Progress { file_id: String, percent: u8 },
    /// One chunk attempt resolved.
    Chunk {
        file_id: String,
        index: u64,
        attempt: u32,
        outcome: ChunkOutcome,
    },
    /// The request was refused before a session started.
    Rejected { file_id: String, error: String },
    Finished { outcome: UploadOutcome },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkwise_transfer::MemoryFile;

    fn outcome(status: UploadStatus) -> UploadOutcome {
        UploadOutcome {
            file_id: "f".into(),
            status,
            failed_indices: BTreeSet::new(),
            failures: Vec::new(),
            uploaded_chunks: 0,
            total_chunks: 3,
            progress: 0,
            abort_reason: None,
        }
    }

    #[test]
    fn status_maps_to_terminal_state() {
        for status in [
            UploadStatus::Completed,
            UploadStatus::PartiallyFailed,
            UploadStatus::Cancelled,
            UploadStatus::Aborted,
        ] {
            assert!(SessionState::from(status).is_terminal());
        }
    }

    #[test]
    fn ensure_completed_surfaces_first_failure() {
        let mut partial = outcome(UploadStatus::PartiallyFailed);
        partial.failed_indices.insert(2);
        partial.failures.push(ChunkTransportError {
            index: 2,
            retryable: true,
            cause: "503".into(),
        });
        match partial.ensure_completed() {
            Err(UploadError::ChunkTransport(err)) => assert_eq!(err.index, 2),
            other => panic!("expected chunk error, got {other:?}"),
        }

        assert!(matches!(
            outcome(UploadStatus::Cancelled).ensure_completed(),
            Err(UploadError::SessionCancelled)
        ));
        assert!(outcome(UploadStatus::Completed).ensure_completed().is_ok());
    }

    #[test]
    fn request_debug_hides_callbacks() {
        let request = UploadRequest::for_file("f", MemoryFile::new(vec![0u8; 10])).on_progress(|_| {});
        let debug = format!("{request:?}");
        assert!(debug.contains("file_len: Some(10)"));
        assert!(debug.contains("progress_callbacks: 1"));
    }
}
