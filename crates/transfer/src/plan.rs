use std::ops::Range;

use crate::TransferError;

/// One contiguous byte range of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u64,
    pub range: Range<u64>,
}

impl ChunkDescriptor {
    /// Length of the chunk in bytes.
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Splits a file of `file_size` bytes into `chunk_size` pieces.
///
/// Ranges partition `[0, file_size)` exactly; only the last chunk may be
/// shorter than `chunk_size`. An empty file has zero chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
}

impl ChunkPlan {
    /// Computes the plan. Fails with `InvalidConfiguration` if `chunk_size` is 0.
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            file_size,
            chunk_size,
            total_chunks: file_size.div_ceil(chunk_size),
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Byte range of chunk `index`, or `None` past the last chunk.
    pub fn range_of(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        // index < total_chunks, so index * chunk_size < file_size and cannot overflow.
        let start = index * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.file_size);
        Some(start..end)
    }

    /// Descriptor of chunk `index`, or `None` past the last chunk.
    pub fn descriptor(&self, index: u64) -> Option<ChunkDescriptor> {
        self.range_of(index)
            .map(|range| ChunkDescriptor { index, range })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = ChunkPlan::new(10, 0).unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfiguration(_)));
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let plan = ChunkPlan::new(0, 4).unwrap();
        assert_eq!(plan.total_chunks(), 0);
        assert!(plan.range_of(0).is_none());
        assert!(plan.descriptor(0).is_none());
    }

    #[test]
    fn forty_five_mb_in_twenty_mb_chunks() {
        let plan = ChunkPlan::new(45 * MB, 20 * MB).unwrap();
        assert_eq!(plan.total_chunks(), 3);
        assert_eq!(plan.range_of(0), Some(0..20 * MB));
        assert_eq!(plan.range_of(1), Some(20 * MB..40 * MB));
        assert_eq!(plan.range_of(2), Some(40 * MB..45 * MB));
        assert_eq!(plan.range_of(3), None);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let plan = ChunkPlan::new(12, 4).unwrap();
        assert_eq!(plan.total_chunks(), 3);
        assert!((0..3).all(|i| plan.descriptor(i).is_some_and(|d| d.len() == 4)));
    }

    #[test]
    fn ranges_partition_file_for_many_sizes() {
        for file_size in 0..200u64 {
            for chunk_size in 1..17u64 {
                let plan = ChunkPlan::new(file_size, chunk_size).unwrap();
                assert_eq!(plan.total_chunks(), file_size.div_ceil(chunk_size));

                let mut cursor = 0;
                for i in 0..plan.total_chunks() {
                    let desc = plan.descriptor(i).unwrap();
                    assert_eq!(desc.index, i);
                    assert_eq!(desc.range.start, cursor, "gap or overlap at chunk {i}");
                    assert!(!desc.is_empty());
                    assert!(desc.len() <= chunk_size);
                    cursor = desc.range.end;
                }
                assert_eq!(cursor, file_size);
            }
        }
    }

    #[test]
    fn huge_chunk_size_does_not_overflow() {
        let plan = ChunkPlan::new(u64::MAX, u64::MAX / 2 + 1).unwrap();
        assert_eq!(plan.total_chunks(), 2);
        let last = plan.range_of(1).unwrap();
        assert_eq!(last.end, u64::MAX);
    }
}
