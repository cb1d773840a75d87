//! Upload error types.

use chunkwise_transfer::TransferError;

/// Why the resume probe could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("resume probe failed: {0}")]
    Transport(String),

    #[error("resume probe reported chunk {index} outside 0..{total_chunks}")]
    OutOfRange { index: u64, total_chunks: u64 },
}

/// A failed attempt to send one chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chunk {index} failed: {cause}")]
pub struct ChunkTransportError {
    pub index: u64,
    pub retryable: bool,
    pub cause: String,
}

/// Errors produced by an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no file selected")]
    NoFileSelected,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    ChunkTransport(#[from] ChunkTransportError),

    #[error("session cancelled")]
    SessionCancelled,

    #[error("session aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(TransferError),
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidConfiguration(msg) => Self::InvalidConfiguration(msg),
            TransferError::Io(e) => Self::Io(e),
            TransferError::IndexOutOfRange {
                index,
                total_chunks,
            } => Self::Probe(ProbeError::OutOfRange {
                index,
                total_chunks,
            }),
            other => Self::Transfer(other),
        }
    }
}
