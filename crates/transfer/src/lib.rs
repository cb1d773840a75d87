//! Chunked file transfer building blocks: planning, range reads, session
//! bookkeeping and progress aggregation.
//!
//! Nothing here talks to the network. The scheduling and orchestration layer
//! lives in `chunkwise-upload`.

mod plan;
mod progress;
mod source;
mod types;

pub use plan::{ChunkDescriptor, ChunkPlan};
pub use progress::{ProgressAggregator, ProgressCallback, SpeedCalculator, percent_of};
pub use source::{DiskFile, FileHandle, MemoryFile, checksum_bytes, read_chunk};
pub use types::{Chunk, SessionState, UploadSession};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("chunk index {index} out of range (total chunks: {total_chunks})")]
    IndexOutOfRange { index: u64, total_chunks: u64 },

    #[error("byte range {start}..{end} outside file of {len} bytes")]
    RangeOutOfBounds { start: u64, end: u64, len: u64 },

    #[error("chunk {0} is already uploaded or in flight")]
    AttemptConflict(u64),
}
