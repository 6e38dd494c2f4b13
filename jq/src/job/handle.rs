//! JobHandle - shared view of a job

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::Shared;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::handler::HandlerError;
use super::options::JobOptions;
use crate::domain::{JobId, JobOutcome, JobStatus};

/// Observable mutable state of a job, published on every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    pub status: JobStatus,
    pub status_text: String,
    /// Attempts left before a failure becomes terminal (ignored by repeating jobs)
    pub retries_remaining: u32,
    /// Run attempts started so far
    pub attempts: u32,
    /// Message of the most recent failed attempt
    pub last_error: Option<String>,
}

impl JobState {
    pub(crate) fn queued(retries_remaining: u32) -> Self {
        Self {
            status: JobStatus::Queued,
            status_text: JobStatus::Queued.to_string(),
            retries_remaining,
            attempts: 0,
            last_error: None,
        }
    }
}

struct JobShared {
    id: JobId,
    display_name: String,
    out_of_band: bool,
    repeat_delay: Duration,
    cancel: CancellationToken,
    state: watch::Receiver<JobState>,
    completion: Shared<oneshot::Receiver<JobOutcome>>,
}

/// Cloneable handle to a submitted job
///
/// Returned by submission and snapshots, and passed to the job's handler.
/// Handles compare equal when they refer to the same job.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobShared>,
}

impl JobHandle {
    pub(crate) fn new(
        display_name: String,
        options: &JobOptions,
        state: watch::Receiver<JobState>,
        completion: oneshot::Receiver<JobOutcome>,
    ) -> Self {
        Self {
            inner: Arc::new(JobShared {
                id: JobId::new(),
                display_name,
                out_of_band: options.out_of_band,
                repeat_delay: options.repeat_delay,
                cancel: CancellationToken::new(),
                state,
                completion: completion.shared(),
            }),
        }
    }

    /// A handle not attached to any queue
    #[cfg(test)]
    pub(crate) fn detached(display_name: &str, options: &JobOptions) -> Self {
        let (_state_tx, state_rx) = watch::channel(JobState::queued(options.retry_count));
        let (_completion_tx, completion_rx) = oneshot::channel();
        Self::new(display_name.to_string(), options, state_rx, completion_rx)
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn out_of_band(&self) -> bool {
        self.inner.out_of_band
    }

    pub fn repeat_delay(&self) -> Duration {
        self.inner.repeat_delay
    }

    /// Snapshot of the job's current state
    pub fn state(&self) -> JobState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.inner.state.borrow().status
    }

    pub fn status_text(&self) -> String {
        self.inner.state.borrow().status_text.clone()
    }

    pub fn retries_remaining(&self) -> u32 {
        self.inner.state.borrow().retries_remaining
    }

    /// Receiver that is notified on every state change of this job
    pub fn watch(&self) -> watch::Receiver<JobState> {
        self.inner.state.clone()
    }

    /// Raise the cancellation signal
    ///
    /// Idempotent. The status does not change here; it becomes `Canceled`
    /// once a run attempt or repeat wait observes the signal.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the cancellation signal is raised
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    /// `Err(HandlerError::Canceled)` if cancellation was requested
    pub fn check_cancelled(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            return Err(HandlerError::Canceled);
        }
        Ok(())
    }

    /// Sleep that ends early with `HandlerError::Canceled` when the job is canceled
    pub async fn sleep(&self, duration: Duration) -> Result<(), HandlerError> {
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(HandlerError::Canceled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Wait for the job's whole retry/repeat lifecycle to conclude
    ///
    /// Returns `None` if the queue stopped before the job finished.
    pub async fn completion(&self) -> Option<JobOutcome> {
        self.inner.completion.clone().await.ok()
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for JobHandle {}

impl std::hash::Hash for JobHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("JobHandle")
            .field("id", &self.inner.id)
            .field("display_name", &self.inner.display_name)
            .field("out_of_band", &self.inner.out_of_band)
            .field("status", &state.status)
            .field("retries_remaining", &state.retries_remaining)
            .finish()
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.inner.display_name, self.status_text())
    }
}
