//! Remote store traits.
//!
//! The store is reached through two injected collaborators so the upload
//! logic stays decoupled from transport and testable with mocks. A single
//! type usually implements both.

use std::future::Future;
use std::pin::Pin;

use chunkwise_protocol::ChunkMetadata;

/// A classified transport failure.
///
/// `retryable` marks transient, server-side conditions (timeouts, 5xx,
/// throttling); everything else is fatal for the chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause}")]
pub struct TransportFailure {
    pub retryable: bool,
    pub cause: String,
}

impl TransportFailure {
    pub fn retryable(cause: impl Into<String>) -> Self {
        Self {
            retryable: true,
            cause: cause.into(),
        }
    }

    pub fn fatal(cause: impl Into<String>) -> Self {
        Self {
            retryable: false,
            cause: cause.into(),
        }
    }
}

/// One chunk's bytes and the metadata identifying it.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub metadata: ChunkMetadata,
    pub data: Vec<u8>,
}

/// Queries which chunks of a file the store already holds.
pub trait ResumeProbe: Send + Sync {
    fn check_uploaded(
        &self,
        file_id: &str,
        total_chunks: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u64>, TransportFailure>> + Send + '_>>;
}

/// Sends a single chunk to the store.
///
/// Implementations must be idempotent per `(file_id, chunk_index)`: a
/// re-sent chunk replaces, never duplicates, the stored one.
pub trait ChunkTransport: Send + Sync {
    fn send_chunk(
        &self,
        request: ChunkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportFailure>> + Send + '_>>;
}
