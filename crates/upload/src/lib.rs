//! Resumable chunked upload orchestration.
//!
//! This crate implements the **transfer logic** for sending one large file
//! to a remote store in fixed-size chunks. It has no transport dependency:
//! callers provide [`ResumeProbe`] and [`ChunkTransport`] implementations
//! (see `chunkwise-http` for the HTTP one).
//!
//! # Pipeline
//!
//! 1. **Plan**: split the file into chunk ranges
//! 2. **Probe**: ask the store which chunks it already holds
//! 3. **Upload**: send the remaining chunks through a bounded, continuously
//!    refilled worker pool with classified retry
//! 4. **Resolve**: report `Completed`, `PartiallyFailed`, `Cancelled` or `Aborted`

pub mod config;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod remote;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use chunkwise_transfer::{DiskFile, FileHandle, MemoryFile, SessionState};
pub use config::{RetryBackoff, TransferConfig};
pub use error::{ChunkTransportError, ProbeError, UploadError};
pub use limiter::UploadLimiter;
pub use orchestrator::UploadOrchestrator;
pub use remote::{ChunkRequest, ChunkTransport, ResumeProbe, TransportFailure};
pub use scheduler::{AttemptFn, AttemptFuture, ConcurrencyScheduler, SchedulerReport};
pub use types::{ChunkOutcome, UploadEvent, UploadOutcome, UploadRequest, UploadStatus};
