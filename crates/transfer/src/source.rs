use std::future::Future;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::plan::ChunkDescriptor;
use crate::types::Chunk;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// FileHandle
// ---------------------------------------------------------------------------

/// Read-only source of file bytes with random access by range.
///
/// Implementations must tolerate concurrent reads of disjoint ranges.
pub trait FileHandle: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Reads exactly the bytes in `range`.
    fn read_range(
        &self,
        range: Range<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, TransferError>> + Send + '_>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_bounds(range: &Range<u64>, len: u64) -> Result<(), TransferError> {
    if range.start > range.end || range.end > len {
        return Err(TransferError::RangeOutOfBounds {
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

/// Reads the bytes of `desc` from `file` and checksums them.
pub async fn read_chunk(
    file: &dyn FileHandle,
    desc: &ChunkDescriptor,
) -> Result<Chunk, TransferError> {
    let data = file.read_range(desc.range.clone()).await?;
    let checksum = checksum_bytes(&data);
    Ok(Chunk {
        index: desc.index,
        offset: desc.range.start,
        size: data.len(),
        data,
        checksum,
    })
}

// ---------------------------------------------------------------------------
// MemoryFile
// ---------------------------------------------------------------------------

/// File contents held in memory.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    data: Arc<[u8]>,
}

impl MemoryFile {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl FileHandle for MemoryFile {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(
        &self,
        range: Range<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, TransferError>> + Send + '_>> {
        Box::pin(async move {
            check_bounds(&range, self.len())?;
            Ok(self.data[range.start as usize..range.end as usize].to_vec())
        })
    }
}

// ---------------------------------------------------------------------------
// DiskFile
// ---------------------------------------------------------------------------

/// File on local disk, read with tokio's async filesystem API.
///
/// The length is captured once at [`open`](Self::open) so every chunk plan
/// made from it stays consistent even if the file grows. Each read opens its
/// own descriptor, so concurrent readers never share a cursor.
#[derive(Debug, Clone)]
pub struct DiskFile {
    path: PathBuf,
    len: u64,
}

impl DiskFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }
        Ok(Self {
            path,
            len: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileHandle for DiskFile {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(
        &self,
        range: Range<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, TransferError>> + Send + '_>> {
        Box::pin(async move {
            check_bounds(&range, self.len)?;
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(range.start)).await?;
            let mut buf = vec![0u8; (range.end - range.start) as usize];
            file.read_exact(&mut buf).await?;
            Ok(buf)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ChunkPlan;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[tokio::test]
    async fn memory_file_reads_ranges() {
        let file = MemoryFile::new(b"AABBCCDDEE".to_vec());
        assert_eq!(file.len(), 10);
        assert_eq!(file.read_range(2..6).await.unwrap(), b"BBCC");
        assert_eq!(file.read_range(10..10).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn memory_file_rejects_out_of_bounds() {
        let file = MemoryFile::new(b"abc".to_vec());
        let err = file.read_range(1..4).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::RangeOutOfBounds { start: 1, end: 4, len: 3 }
        ));
    }

    #[tokio::test]
    async fn disk_file_reads_every_chunk() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let file = DiskFile::open(&path).await.unwrap();
        assert_eq!(file.len(), 10);

        let plan = ChunkPlan::new(file.len(), 4).unwrap();
        let mut chunks = Vec::new();
        for i in 0..plan.total_chunks() {
            let desc = plan.descriptor(i).unwrap();
            chunks.push(read_chunk(&file, &desc).await.unwrap());
        }

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data, b"AABB");
        assert_eq!(chunks[1].offset, 4);
        assert_eq!(chunks[1].data, b"CCDD");
        assert_eq!(chunks[2].size, 2);
        assert_eq!(chunks[2].data, b"EE");
        assert_eq!(chunks[2].checksum, checksum_bytes(b"EE"));
    }

    #[tokio::test]
    async fn disk_file_truncated_after_open_fails_read() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "shrinks.bin", b"0123456789");
        let file = DiskFile::open(&path).await.unwrap();

        std::fs::write(&path, b"0123").unwrap();

        let err = file.read_range(4..10).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[tokio::test]
    async fn disk_file_open_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let err = DiskFile::open(dir.path().join("nope.bin")).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[tokio::test]
    async fn disk_file_open_directory_fails() {
        let dir = TempDir::new().unwrap();
        assert!(DiskFile::open(dir.path()).await.is_err());
    }
}
