//! In-memory remote store for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::remote::{ChunkRequest, ChunkTransport, ResumeProbe, TransportFailure};

/// Scripted response for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Retryable,
    Fatal,
}

/// Store that keeps chunks keyed by `(file_id, index)` and answers the
/// resume probe from what it holds.
#[derive(Default)]
pub struct MockRemote {
    resume_override: Option<Vec<u64>>,
    probe_failure: Option<String>,
    delay: Duration,
    delays: HashMap<u64, Duration>,
    scripts: Mutex<HashMap<u64, VecDeque<Reply>>>,
    attempts: Mutex<HashMap<u64, u32>>,
    dispatched: Mutex<Vec<u64>>,
    stored: Mutex<BTreeMap<(String, u64), ChunkRequest>>,
    probe_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every probe with `indices` instead of the stored set.
    pub fn with_resume(mut self, indices: Vec<u64>) -> Self {
        self.resume_override = Some(indices);
        self
    }

    pub fn with_probe_failure(mut self, cause: &str) -> Self {
        self.probe_failure = Some(cause.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_delay_for(mut self, index: u64, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    /// Queues replies for `index`; once exhausted the chunk succeeds.
    pub fn script(self, index: u64, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .extend(replies);
        self
    }

    pub fn dispatched(&self) -> Vec<u64> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn clear_dispatched(&self) {
        self.dispatched.lock().unwrap().clear();
    }

    pub fn attempts_for(&self, index: u64) -> u32 {
        self.attempts.lock().unwrap().get(&index).copied().unwrap_or(0)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn stored(&self, file_id: &str) -> Vec<u64> {
        self.stored
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| id == file_id)
            .map(|(_, index)| *index)
            .collect()
    }

    pub fn request(&self, file_id: &str, index: u64) -> Option<ChunkRequest> {
        self.stored
            .lock()
            .unwrap()
            .get(&(file_id.to_string(), index))
            .cloned()
    }

    /// Concatenates stored chunks of `file_id` in index order.
    pub fn reassemble(&self, file_id: &str) -> Vec<u8> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .filter(|((id, _), _)| id == file_id)
            .flat_map(|(_, req)| req.data.iter().copied())
            .collect()
    }
}

impl ResumeProbe for MockRemote {
    fn check_uploaded(
        &self,
        file_id: &str,
        _total_chunks: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u64>, TransportFailure>> + Send + '_>> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let file_id = file_id.to_string();
        Box::pin(async move {
            if let Some(cause) = &self.probe_failure {
                return Err(TransportFailure::retryable(cause.clone()));
            }
            match &self.resume_override {
                Some(indices) => Ok(indices.clone()),
                None => Ok(self.stored(&file_id)),
            }
        })
    }
}

impl ChunkTransport for MockRemote {
    fn send_chunk(
        &self,
        request: ChunkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportFailure>> + Send + '_>> {
        Box::pin(async move {
            let index = request.metadata.chunk_index;
            self.dispatched.lock().unwrap().push(index);
            *self.attempts.lock().unwrap().entry(index).or_insert(0) += 1;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = self.delays.get(&index).copied().unwrap_or(self.delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let reply = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&index)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Reply::Ok);
            match reply {
                Reply::Ok => {
                    let key = (request.metadata.file_id.clone(), index);
                    self.stored.lock().unwrap().insert(key, request);
                    Ok(())
                }
                Reply::Retryable => Err(TransportFailure::retryable("503 Service Unavailable")),
                Reply::Fatal => Err(TransportFailure::fatal("400 Bad Request")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkwise_protocol::ChunkMetadata;

    fn request(file_id: &str, index: u64, data: &[u8]) -> ChunkRequest {
        ChunkRequest {
            metadata: ChunkMetadata {
                file_id: file_id.into(),
                chunk_index: index,
                total_chunks: 2,
                checksum: String::new(),
            },
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn resending_a_chunk_replaces_it() {
        let remote = MockRemote::new();
        remote.send_chunk(request("f", 1, b"old")).await.unwrap();
        remote.send_chunk(request("f", 1, b"new")).await.unwrap();

        assert_eq!(remote.stored("f"), vec![1]);
        assert_eq!(remote.reassemble("f"), b"new");
        assert_eq!(remote.check_uploaded("f", 2).await.unwrap(), vec![1]);
        assert!(remote.check_uploaded("other", 2).await.unwrap().is_empty());
    }
}
