//! HTTP remote store for chunked uploads.
//!
//! Implements [`ResumeProbe`](chunkwise_upload::ResumeProbe) and
//! [`ChunkTransport`](chunkwise_upload::ChunkTransport) over two endpoints:
//! a JSON resume check and a multipart chunk upload.

pub mod client;

pub use client::{Error, HttpRemote};
