//! Upload orchestrator.
//!
//! Drives one file through `Idle -> Planning -> Probing -> Uploading` and
//! on to a terminal state, emitting events along the way. A single
//! orchestrator can run any number of sessions; each call to
//! [`UploadOrchestrator::upload`] starts a fresh one with its own
//! cancellation token.

use std::sync::{Arc, Mutex};

use chunkwise_protocol::ChunkMetadata;
use chunkwise_transfer::{
    ChunkPlan, FileHandle, ProgressAggregator, ProgressCallback, SessionState, UploadSession,
    read_chunk,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::TransferConfig;
use crate::error::{ProbeError, UploadError};
use crate::limiter::UploadLimiter;
use crate::remote::{ChunkRequest, ChunkTransport, ResumeProbe, TransportFailure};
use crate::scheduler::{AttemptFn, ConcurrencyScheduler, attempt_fn};
use crate::types::{UploadEvent, UploadOutcome, UploadRequest, UploadStatus};

/// Orchestrates resumable chunked uploads against one remote store.
pub struct UploadOrchestrator {
    probe: Arc<dyn ResumeProbe>,
    transport: Arc<dyn ChunkTransport>,
    config: TransferConfig,
    limiter: Option<UploadLimiter>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_taken: bool,
    /// Parent of every session token. Replaced after each [`Self::cancel`].
    cancel: Mutex<CancellationToken>,
}

impl UploadOrchestrator {
    pub fn new(
        probe: Arc<dyn ResumeProbe>,
        transport: Arc<dyn ChunkTransport>,
        config: TransferConfig,
    ) -> Self {
        // Closed until someone takes the receiver, so nothing queues up.
        let (events_tx, _) = mpsc::unbounded_channel();
        Self {
            probe,
            transport,
            config,
            limiter: None,
            events_tx,
            events_taken: false,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Creates an orchestrator whose store answers both probes and chunk uploads.
    pub fn with_remote<R>(remote: Arc<R>, config: TransferConfig) -> Self
    where
        R: ResumeProbe + ChunkTransport + 'static,
    {
        Self::new(remote.clone(), remote, config)
    }

    /// Shares a process-wide in-flight cap with other orchestrators.
    pub fn with_limiter(mut self, limiter: UploadLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events emitted before this call are dropped.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        if self.events_taken {
            return None;
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_taken = true;
        Some(events_rx)
    }

    /// Returns a token for one session, to attach with
    /// [`UploadRequest::with_cancel`].
    ///
    /// Cancelling it stops only that session. [`Self::cancel`] cancels it too.
    pub fn session_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(root) => root.child_token(),
            Err(poisoned) => poisoned.into_inner().child_token(),
        }
    }

    /// Cancels every running session. In-flight chunks finish but their
    /// results are ignored and no further chunks are dispatched.
    ///
    /// Uploads started afterwards run normally.
    pub fn cancel(&self) {
        let mut root = match self.cancel.lock() {
            Ok(root) => root,
            Err(poisoned) => poisoned.into_inner(),
        };
        root.cancel();
        *root = CancellationToken::new();
        info!("cancelled all running uploads");
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Uploads one file.
    ///
    /// Returns `Ok` for every session that reached the upload phase
    /// (`Completed`, `PartiallyFailed`, `Cancelled`). Errors mean nothing was
    /// uploaded: no file selected, a bad configuration, or an unusable resume
    /// probe.
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome, UploadError> {
        let UploadRequest {
            file_id,
            file,
            progress_callbacks,
            cancel,
        } = request;
        let cancel = cancel.unwrap_or_else(|| self.session_token());

        let file = match file {
            Some(file) if !file_id.is_empty() => file,
            _ => {
                let err = UploadError::NoFileSelected;
                warn!(file_id = %file_id, "upload requested without a file");
                self.emit(UploadEvent::Rejected {
                    file_id,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let mut session = UploadSession::new(file_id.clone(), 0, self.config.chunk_size);
        match self
            .run_session(&mut session, file, progress_callbacks, &cancel)
            .await
        {
            Ok(outcome) => {
                info!(
                    file_id = %file_id,
                    status = ?outcome.status,
                    uploaded = outcome.uploaded_chunks,
                    total = outcome.total_chunks,
                    failed = outcome.failed_indices.len(),
                    "upload finished"
                );
                self.emit(UploadEvent::Finished {
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            Err(UploadError::SessionCancelled) => {
                let outcome = self.finish(&mut session, UploadStatus::Cancelled, 0, None);
                info!(file_id = %file_id, state = ?session.state(), "upload cancelled before uploading");
                self.emit(UploadEvent::Finished {
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                let reason = e.to_string();
                let outcome =
                    self.finish(&mut session, UploadStatus::Aborted, 0, Some(reason.clone()));
                error!(file_id = %file_id, error = %reason, "upload aborted");
                self.emit(UploadEvent::Finished { outcome });
                Err(e)
            }
        }
    }

    async fn run_session(
        &self,
        session: &mut UploadSession,
        file: Arc<dyn FileHandle>,
        progress_callbacks: Vec<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        // Planning
        self.transition(session, SessionState::Planning);
        check_cancelled(cancel)?;
        self.config.validate()?;
        let plan = ChunkPlan::new(file.len(), self.config.chunk_size)?;
        session.set_total_chunks(plan.total_chunks(), plan.chunk_size());
        info!(
            file_id = %session.file_id(),
            file_size = plan.file_size(),
            chunk_size = plan.chunk_size(),
            total_chunks = plan.total_chunks(),
            "planned upload"
        );

        // Probing
        self.transition(session, SessionState::Probing);
        check_cancelled(cancel)?;
        let resumed = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UploadError::SessionCancelled),
            result = self.probe.check_uploaded(session.file_id(), plan.total_chunks()) => {
                result.map_err(|e| ProbeError::Transport(e.cause))?
            }
        };
        let resumed = session.apply_resume(resumed)?;
        if resumed > 0 {
            info!(file_id = %session.file_id(), resumed, "resuming upload");
        }

        // Uploading
        check_cancelled(cancel)?;
        self.transition(session, SessionState::Uploading);
        let mut progress = ProgressAggregator::new(plan.total_chunks());
        for callback in progress_callbacks {
            progress.on_progress(callback);
        }
        let percent = progress.seed(session.uploaded_count());
        self.emit(UploadEvent::Progress {
            file_id: session.file_id().to_string(),
            percent,
        });

        let scheduler = ConcurrencyScheduler::new(&self.config, cancel.clone())
            .with_limiter(self.limiter.clone());
        let attempt = self.chunk_attempt(session.file_id(), plan, file);
        let report = scheduler
            .run(session, &mut progress, attempt, &self.events_tx)
            .await;

        let status = if report.cancelled {
            UploadStatus::Cancelled
        } else if session.is_complete() {
            UploadStatus::Completed
        } else {
            UploadStatus::PartiallyFailed
        };
        let mut outcome = self.finish(session, status, progress.percent(), None);
        outcome.failures = report.failures.into_values().collect();
        Ok(outcome)
    }

    /// Builds the per-chunk attempt: read the bytes, checksum, send.
    fn chunk_attempt(&self, file_id: &str, plan: ChunkPlan, file: Arc<dyn FileHandle>) -> AttemptFn {
        let transport = Arc::clone(&self.transport);
        let file_id = file_id.to_string();
        attempt_fn(move |index| {
            let transport = Arc::clone(&transport);
            let file = Arc::clone(&file);
            let file_id = file_id.clone();
            async move {
                let desc = plan.descriptor(index).ok_or_else(|| {
                    TransportFailure::fatal(format!("chunk {index} is outside the plan"))
                })?;
                // A local read error will not heal on retry.
                let chunk = read_chunk(file.as_ref(), &desc)
                    .await
                    .map_err(|e| TransportFailure::fatal(format!("failed to read chunk: {e}")))?;
                let bytes = chunk.size as u64;
                transport
                    .send_chunk(ChunkRequest {
                        metadata: ChunkMetadata {
                            file_id,
                            chunk_index: index,
                            total_chunks: plan.total_chunks(),
                            checksum: chunk.checksum,
                        },
                        data: chunk.data,
                    })
                    .await?;
                Ok(bytes)
            }
        })
    }

    fn transition(&self, session: &mut UploadSession, next: SessionState) {
        if session.advance(next) {
            self.emit(UploadEvent::StateChanged {
                file_id: session.file_id().to_string(),
                state: next,
            });
        }
    }

    fn finish(
        &self,
        session: &mut UploadSession,
        status: UploadStatus,
        progress: u8,
        abort_reason: Option<String>,
    ) -> UploadOutcome {
        self.transition(session, status.into());
        UploadOutcome {
            file_id: session.file_id().to_string(),
            status,
            failed_indices: session.failed_indices().keys().copied().collect(),
            failures: Vec::new(),
            uploaded_chunks: session.uploaded_count(),
            total_chunks: session.total_chunks(),
            progress,
            abort_reason,
        }
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.send(event);
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        return Err(UploadError::SessionCancelled);
    }
    Ok(())
}
