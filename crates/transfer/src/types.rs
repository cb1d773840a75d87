use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::TransferError;

/// A chunk of file data ready for transfer.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk in the plan.
    pub index: u64,
    /// Byte offset within the file.
    pub offset: u64,
    /// Size of this chunk in bytes.
    pub size: usize,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

/// Lifecycle state of an upload session.
///
/// Sessions only move forward: `Idle → Planning → Probing → Uploading`, then
/// one terminal state. `Cancelled` and `Aborted` are reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Planning,
    Probing,
    Uploading,
    Completed,
    PartiallyFailed,
    Aborted,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyFailed | Self::Aborted | Self::Cancelled
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled | Aborted) => true,
            (Idle, Planning) | (Planning, Probing) | (Probing, Uploading) => true,
            (Uploading, Completed | PartiallyFailed) => true,
            _ => false,
        }
    }
}

/// Bookkeeping for one file's transfer.
///
/// Owned by a single scheduler, so it carries no locks: every mutation goes
/// through `&mut self` and happens in completion order.
#[derive(Debug)]
pub struct UploadSession {
    file_id: String,
    total_chunks: u64,
    chunk_size: u64,
    state: SessionState,
    uploaded: BTreeSet<u64>,
    in_flight: BTreeSet<u64>,
    /// Permanently failed indices with the number of attempts made.
    failed: BTreeMap<u64, u32>,
    attempts: HashMap<u64, u32>,
}

impl UploadSession {
    /// Creates a new idle session.
    pub fn new(file_id: impl Into<String>, total_chunks: u64, chunk_size: u64) -> Self {
        Self {
            file_id: file_id.into(),
            total_chunks,
            chunk_size,
            state: SessionState::Idle,
            uploaded: BTreeSet::new(),
            in_flight: BTreeSet::new(),
            failed: BTreeMap::new(),
            attempts: HashMap::new(),
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sets the chunk count once planning is done.
    pub fn set_total_chunks(&mut self, total_chunks: u64, chunk_size: u64) {
        self.total_chunks = total_chunks;
        self.chunk_size = chunk_size;
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_advance_to(next) {
            warn!(
                file_id = %self.file_id,
                from = ?self.state,
                to = ?next,
                "rejected backward session transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Records the chunks the store already holds.
    ///
    /// The whole set is validated before anything is recorded: a single index
    /// outside `[0, total_chunks)` rejects the set.
    pub fn apply_resume<I>(&mut self, indices: I) -> Result<usize, TransferError>
    where
        I: IntoIterator<Item = u64>,
    {
        let indices: BTreeSet<u64> = indices.into_iter().collect();
        if let Some(&index) = indices.iter().find(|&&i| i >= self.total_chunks) {
            return Err(TransferError::IndexOutOfRange {
                index,
                total_chunks: self.total_chunks,
            });
        }
        let count = indices.len();
        self.uploaded.extend(indices);
        Ok(count)
    }

    /// Indices still to be sent, ascending.
    pub fn remaining(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|i| !self.uploaded.contains(i) && !self.failed.contains_key(i))
            .collect()
    }

    /// Marks `index` in flight and returns the 1-based attempt number.
    pub fn begin_attempt(&mut self, index: u64) -> Result<u32, TransferError> {
        if index >= self.total_chunks {
            return Err(TransferError::IndexOutOfRange {
                index,
                total_chunks: self.total_chunks,
            });
        }
        if self.uploaded.contains(&index)
            || self.failed.contains_key(&index)
            || !self.in_flight.insert(index)
        {
            return Err(TransferError::AttemptConflict(index));
        }
        let attempts = self.attempts.entry(index).or_insert(0);
        *attempts += 1;
        Ok(*attempts)
    }

    /// Records a successful attempt. Returns `false` if `index` was not in flight.
    pub fn complete(&mut self, index: u64) -> bool {
        if !self.in_flight.remove(&index) {
            return false;
        }
        self.uploaded.insert(index);
        true
    }

    /// Records a permanent failure. Returns `false` if `index` was not in flight.
    pub fn fail(&mut self, index: u64) -> bool {
        if !self.in_flight.remove(&index) {
            return false;
        }
        let attempts = self.attempts(index);
        self.failed.insert(index, attempts);
        true
    }

    /// Takes `index` out of flight without recording an outcome (retry or discard).
    pub fn release(&mut self, index: u64) -> bool {
        self.in_flight.remove(&index)
    }

    /// Number of attempts made for `index` so far.
    pub fn attempts(&self, index: u64) -> u32 {
        self.attempts.get(&index).copied().unwrap_or(0)
    }

    pub fn is_uploaded(&self, index: u64) -> bool {
        self.uploaded.contains(&index)
    }

    pub fn is_in_flight(&self, index: u64) -> bool {
        self.in_flight.contains(&index)
    }

    pub fn uploaded_count(&self) -> u64 {
        self.uploaded.len() as u64
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn failed_indices(&self) -> &BTreeMap<u64, u32> {
        &self.failed
    }

    /// Returns `true` once every chunk is uploaded.
    pub fn is_complete(&self) -> bool {
        self.uploaded_count() == self.total_chunks
    }
}
