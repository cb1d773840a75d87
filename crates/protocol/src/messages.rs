use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Resume probe
// ---------------------------------------------------------------------------

/// Asks the store which chunks of a file it already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeProbeRequest {
    pub file_id: String,
    pub total_chunks: u64,
}

/// Chunk indices the store has already persisted for the probed file.
///
/// Indices are reported as-is; range validation is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeProbeResponse {
    #[serde(default)]
    pub uploaded_chunks: Vec<u64>,
}

// ---------------------------------------------------------------------------
// Chunk upload
// ---------------------------------------------------------------------------

/// Metadata sent alongside the bytes of a single chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub file_id: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    /// SHA-256 hex digest of the chunk bytes (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}
