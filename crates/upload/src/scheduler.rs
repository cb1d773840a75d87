//! Bounded-concurrency chunk scheduler.
//!
//! Keeps up to `concurrency_limit` attempts in flight and starts the next
//! pending chunk as soon as any attempt resolves, so one slow chunk never
//! holds back the others. Retryable failures wait out their backoff on a
//! timer and then re-enter the queue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chunkwise_transfer::{ProgressAggregator, SpeedCalculator, UploadSession};
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RetryBackoff, TransferConfig};
use crate::error::{ChunkTransportError, UploadError};
use crate::limiter::UploadLimiter;
use crate::remote::TransportFailure;
use crate::types::{ChunkOutcome, UploadEvent};

/// One chunk attempt. Resolves to the number of bytes sent.
pub type AttemptFuture = Pin<Box<dyn Future<Output = Result<u64, TransportFailure>> + Send>>;

/// Starts an attempt for the given chunk index.
pub type AttemptFn = Arc<dyn Fn(u64) -> AttemptFuture + Send + Sync>;

/// Wraps a closure returning a future into an [`AttemptFn`].
pub fn attempt_fn<F, Fut>(f: F) -> AttemptFn
where
    F: Fn(u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<u64, TransportFailure>> + Send + 'static,
{
    Arc::new(move |index| Box::pin(f(index)))
}

/// What happened during [`ConcurrencyScheduler::run`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    /// Cancellation left work undone (unattempted, discarded or waiting to retry).
    pub cancelled: bool,
    /// Last error of every chunk recorded as failed.
    pub failures: BTreeMap<u64, ChunkTransportError>,
    /// In-flight results ignored after cancellation.
    pub discarded: usize,
    /// Chunks never attempted (or whose retry was dropped) because of cancellation.
    pub unattempted: usize,
}

pub struct ConcurrencyScheduler {
    concurrency_limit: usize,
    max_retries: u32,
    backoff: RetryBackoff,
    inter_batch_delay: Duration,
    limiter: Option<UploadLimiter>,
    cancel: CancellationToken,
}

impl ConcurrencyScheduler {
    pub fn new(config: &TransferConfig, cancel: CancellationToken) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit.max(1),
            max_retries: config.max_retries,
            backoff: config.retry_backoff.clone(),
            inter_batch_delay: config.inter_batch_delay,
            limiter: None,
            cancel,
        }
    }

    /// Additionally bounds dispatch by a limiter shared across sessions.
    pub fn with_limiter(mut self, limiter: Option<UploadLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Uploads every chunk `session` still needs.
    ///
    /// Each resolved attempt is written back to `session`, successes advance
    /// `progress`, and every outcome is reported on `events`.
    pub async fn run(
        &self,
        session: &mut UploadSession,
        progress: &mut ProgressAggregator,
        attempt: AttemptFn,
        events: &mpsc::UnboundedSender<UploadEvent>,
    ) -> SchedulerReport {
        let file_id = session.file_id().to_string();
        let mut pending: VecDeque<u64> = session.remaining().into();
        let mut running: JoinSet<(u64, Result<u64, TransportFailure>)> = JoinSet::new();
        let mut running_ids: HashMap<Id, u64> = HashMap::new();
        let mut backoffs: JoinSet<u64> = JoinSet::new();
        let mut speed = SpeedCalculator::default();
        let mut last_dispatch: Option<Instant> = None;
        let mut cancel_noted = false;
        let mut report = SchedulerReport::default();

        info!(
            file_id = %file_id,
            pending = pending.len(),
            concurrency = self.concurrency_limit,
            "uploading chunks"
        );

        loop {
            // Refill free slots.
            while running.len() < self.concurrency_limit && !self.cancel.is_cancelled() {
                let Some(index) = pending.pop_front() else {
                    break;
                };
                let permit = match self.wait_for_slot(last_dispatch).await {
                    Ok(permit) => permit,
                    Err(_) => {
                        pending.push_front(index);
                        break;
                    }
                };
                let attempt_no = match session.begin_attempt(index) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(file_id = %file_id, index, error = %e, "skipping chunk");
                        continue;
                    }
                };
                last_dispatch = Some(Instant::now());
                debug!(file_id = %file_id, index, attempt = attempt_no, "dispatching chunk");

                let fut = attempt(index);
                let handle = running.spawn(async move {
                    let result = fut.await;
                    drop(permit);
                    (index, result)
                });
                running_ids.insert(handle.id(), index);
            }

            if self.cancel.is_cancelled() && !backoffs.is_empty() {
                report.unattempted += backoffs.len();
                backoffs.shutdown().await;
            }
            if running.is_empty() && backoffs.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    let (index, result) = match joined {
                        Ok((index, result)) => {
                            running_ids.retain(|_, i| *i != index);
                            (index, result)
                        }
                        Err(e) => {
                            let Some(index) = running_ids.remove(&e.id()) else {
                                warn!(file_id = %file_id, error = %e, "untracked chunk task failed");
                                continue;
                            };
                            (index, Err(TransportFailure::fatal(format!("chunk task failed: {e}"))))
                        }
                    };
                    let attempt_no = session.attempts(index);

                    if self.cancel.is_cancelled() {
                        session.release(index);
                        report.discarded += 1;
                        debug!(file_id = %file_id, index, "discarding result after cancellation");
                        emit(events, UploadEvent::Chunk {
                            file_id: file_id.clone(),
                            index,
                            attempt: attempt_no,
                            outcome: ChunkOutcome::Discarded,
                        });
                        continue;
                    }

                    match result {
                        Ok(bytes) => {
                            session.complete(index);
                            speed.record(bytes, std::time::Instant::now());
                            debug!(file_id = %file_id, index, attempt = attempt_no, bytes, "chunk uploaded");
                            emit(events, UploadEvent::Chunk {
                                file_id: file_id.clone(),
                                index,
                                attempt: attempt_no,
                                outcome: ChunkOutcome::Success {
                                    bytes,
                                    bytes_per_second: speed.bytes_per_second(),
                                },
                            });
                            let percent = progress.record_success();
                            emit(events, UploadEvent::Progress {
                                file_id: file_id.clone(),
                                percent,
                            });
                        }
                        Err(failure) => {
                            let error = ChunkTransportError {
                                index,
                                retryable: failure.retryable,
                                cause: failure.cause,
                            };
                            let outcome = if error.retryable && attempt_no <= self.max_retries {
                                let delay = self.backoff.delay_for_retry(attempt_no);
                                session.release(index);
                                warn!(
                                    file_id = %file_id,
                                    index,
                                    attempt = attempt_no,
                                    retry_in_ms = delay.as_millis() as u64,
                                    error = %error.cause,
                                    "chunk failed, retrying"
                                );
                                if delay.is_zero() {
                                    pending.push_back(index);
                                } else {
                                    backoffs.spawn(async move {
                                        tokio::time::sleep(delay).await;
                                        index
                                    });
                                }
                                ChunkOutcome::RetryableFailure {
                                    error,
                                    retry_in: Some(delay),
                                }
                            } else {
                                session.fail(index);
                                warn!(
                                    file_id = %file_id,
                                    index,
                                    attempts = attempt_no,
                                    retryable = error.retryable,
                                    error = %error.cause,
                                    "chunk failed permanently"
                                );
                                report.failures.insert(index, error.clone());
                                if error.retryable {
                                    ChunkOutcome::RetryableFailure { error, retry_in: None }
                                } else {
                                    ChunkOutcome::FatalFailure { error }
                                }
                            };
                            emit(events, UploadEvent::Chunk {
                                file_id: file_id.clone(),
                                index,
                                attempt: attempt_no,
                                outcome,
                            });
                        }
                    }
                }
                Some(joined) = backoffs.join_next(), if !backoffs.is_empty() => {
                    match joined {
                        Ok(index) => pending.push_back(index),
                        Err(e) => warn!(file_id = %file_id, error = %e, "retry timer failed"),
                    }
                }
                () = self.cancel.cancelled(), if !cancel_noted => {
                    cancel_noted = true;
                    info!(
                        file_id = %file_id,
                        in_flight = running.len(),
                        "cancellation requested, draining in-flight chunks"
                    );
                }
                else => break,
            }
        }

        report.unattempted += pending.len();
        report.cancelled = self.cancel.is_cancelled()
            && (report.unattempted > 0 || report.discarded > 0);
        if !pending.is_empty() && !self.cancel.is_cancelled() {
            warn!(file_id = %file_id, left = pending.len(), "scheduler stopped with chunks pending");
        }
        report
    }

    /// Waits out the inter-dispatch delay, then takes a global slot if a
    /// limiter is configured. Fails only on cancellation.
    async fn wait_for_slot(
        &self,
        last_dispatch: Option<Instant>,
    ) -> Result<Option<OwnedSemaphorePermit>, UploadError> {
        if let Some(last) = last_dispatch {
            if !self.inter_batch_delay.is_zero() {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(UploadError::SessionCancelled),
                    () = tokio::time::sleep_until(last + self.inter_batch_delay) => {}
                }
            }
        }

        let Some(limiter) = &self.limiter else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(UploadError::SessionCancelled),
            permit = limiter.acquire() => permit.map(Some),
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<UploadEvent>, event: UploadEvent) {
    // A dropped receiver just means nobody is listening.
    let _ = events.send(event);
}
